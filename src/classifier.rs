//! Ordered intent rules for free-text user input
//!
//! Each agent owns a rule list evaluated top to bottom; the first matching
//! predicate wins. Input that matches nothing is `Intent::Content` and goes on
//! to the LLM-backed stages (evaluation or category classification).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// What the user meant by a message, before any LLM is consulted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Blank,
    Greeting,
    SuggestionRequest,
    HelpRequest,
    ProceedWithoutReferences,
    NoReferences,
    Restart,
    TooShort,
    Content,
}

/// Test applied to a message
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Empty after trimming
    Blank,
    /// Fewer than `n` characters after trimming
    ShorterThan(usize),
    /// Equal to one of the phrases after normalization
    Exact(&'static [&'static str]),
    /// Lowercased text contains one of the phrases
    Contains(&'static [&'static str]),
    /// Regex over the lowercased, trimmed text
    Pattern(Regex),
}

impl Predicate {
    pub fn matches(&self, text: &str) -> bool {
        match self {
            Predicate::Blank => text.trim().is_empty(),
            Predicate::ShorterThan(n) => text.trim().chars().count() < *n,
            Predicate::Exact(phrases) => {
                let normalized = normalize(text);
                phrases.iter().any(|p| *p == normalized)
            }
            Predicate::Contains(phrases) => {
                let lower = text.to_lowercase();
                phrases.iter().any(|p| lower.contains(p))
            }
            Predicate::Pattern(re) => re.is_match(text.trim().to_lowercase().as_str()),
        }
    }
}

/// A single `(predicate, label)` rule
#[derive(Debug, Clone)]
pub struct Rule {
    pub predicate: Predicate,
    pub intent: Intent,
}

impl Rule {
    pub fn new(predicate: Predicate, intent: Intent) -> Self {
        Self { predicate, intent }
    }
}

/// Ordered rule list
#[derive(Debug, Clone)]
pub struct IntentClassifier {
    rules: Vec<Rule>,
}

const COACH_GREETINGS: &[&str] = &["hi", "hello", "hey", "sup", "yo", "hiya", "howdy"];
const COACH_SUGGESTION_PHRASES: &[&str] = &[
    "suggest",
    "help me think",
    "give me ideas",
    "give me an idea",
    "some ideas",
    "any ideas",
    "random task",
    "random idea",
];
const COACH_HELP_PHRASES: &[&str] = &[
    "help",
    "help me",
    "i need help",
    "guide me",
    "what should i do",
    "what do i do",
    "i don't know",
    "i dont know",
    "?",
];
const NO_REFERENCE_PHRASES: &[&str] = &[
    "none",
    "no",
    "nope",
    "nothing",
    "n/a",
    "na",
    "no references",
    "no reference",
    "i have none",
    "i don't have any",
    "i dont have any",
    "i have no references",
    "i don't have any references",
];
const RESTART_PHRASES: &[&str] = &["restart", "start over", "reset", "new prompt", "start again"];
const REFINER_HELP_KEYWORDS: &[&str] = &[
    "framework",
    "help",
    "guide",
    "suggest",
    "recommend",
    "options",
    "what can you do",
];
const DOCUMENT_CUES: &[&str] = &[
    "from the document",
    "summarize the file",
    "what does it say about",
    "in the document",
    "based on the file",
    "according to the document",
    "upload",
    "document",
    "pdf",
    "analyze this",
    "what's in this",
];

/// Inputs shorter than this are treated as too thin to evaluate
const MIN_CONTENT_CHARS: usize = 5;

static PROCEED_WITHOUT_REFERENCES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(proceed|continue|move on|go ahead|carry on)\b.*\bwithout\b.*\b(references?|refs?|sources?)\b|^skip (the )?references?\b",
    )
    .expect("static pattern is valid")
});

static REFINER_GREETING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(hello|hi|hey|greetings|good (morning|afternoon|evening))\b")
        .expect("static pattern is valid")
});

impl IntentClassifier {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// First matching rule wins; anything unmatched is content
    pub fn classify(&self, text: &str) -> Intent {
        self.rules
            .iter()
            .find(|rule| rule.predicate.matches(text))
            .map_or(Intent::Content, |rule| rule.intent)
    }

    /// Guided coaching flow.
    ///
    /// Greetings come first, then help and suggestion phrasing, then the
    /// reference escape hatches. The short-input catch-all runs after the
    /// exact reference phrases so that "none" and "no" still reach the
    /// reference stage.
    pub fn coach() -> Self {
        Self::new(vec![
            Rule::new(Predicate::Blank, Intent::Blank),
            Rule::new(Predicate::Exact(COACH_GREETINGS), Intent::Greeting),
            Rule::new(
                Predicate::Contains(COACH_SUGGESTION_PHRASES),
                Intent::SuggestionRequest,
            ),
            Rule::new(Predicate::Exact(COACH_HELP_PHRASES), Intent::HelpRequest),
            Rule::new(
                Predicate::Pattern(PROCEED_WITHOUT_REFERENCES.clone()),
                Intent::ProceedWithoutReferences,
            ),
            Rule::new(Predicate::Exact(NO_REFERENCE_PHRASES), Intent::NoReferences),
            Rule::new(Predicate::Exact(RESTART_PHRASES), Intent::Restart),
            Rule::new(Predicate::ShorterThan(MIN_CONTENT_CHARS), Intent::TooShort),
        ])
    }

    /// One-shot refiner
    pub fn refiner() -> Self {
        Self::new(vec![
            Rule::new(Predicate::Blank, Intent::Blank),
            Rule::new(
                Predicate::Pattern(REFINER_GREETING.clone()),
                Intent::Greeting,
            ),
            Rule::new(
                Predicate::Contains(REFINER_HELP_KEYWORDS),
                Intent::HelpRequest,
            ),
        ])
    }

    /// Grammar correction
    pub fn grammar() -> Self {
        Self::new(vec![
            Rule::new(Predicate::Blank, Intent::Blank),
            Rule::new(Predicate::Exact(COACH_GREETINGS), Intent::Greeting),
            Rule::new(Predicate::ShorterThan(MIN_CONTENT_CHARS), Intent::TooShort),
        ])
    }
}

static COACH: LazyLock<IntentClassifier> = LazyLock::new(IntentClassifier::coach);
static REFINER: LazyLock<IntentClassifier> = LazyLock::new(IntentClassifier::refiner);
static GRAMMAR: LazyLock<IntentClassifier> = LazyLock::new(IntentClassifier::grammar);

/// Shared rule sets, built once
pub fn coach_rules() -> &'static IntentClassifier {
    &COACH
}

pub fn refiner_rules() -> &'static IntentClassifier {
    &REFINER
}

pub fn grammar_rules() -> &'static IntentClassifier {
    &GRAMMAR
}

/// Whether the text asks about uploaded material
pub fn mentions_documents(text: &str) -> bool {
    Predicate::Contains(DOCUMENT_CUES).matches(text)
}

/// Too little text to be worth judging
pub fn too_short(text: &str) -> bool {
    Predicate::ShorterThan(MIN_CONTENT_CHARS).matches(text)
}

/// Lowercase and trim, drop trailing punctuation, collapse inner whitespace
fn normalize(text: &str) -> String {
    let lower = text.trim().to_lowercase();
    let trimmed = lower.trim_end_matches(['.', '!', '?', ',', ';']);
    let trimmed = if trimmed.is_empty() { lower.as_str() } else { trimmed };
    trimmed.split_whitespace().collect::<Vec<_>>().join(" ")
}
