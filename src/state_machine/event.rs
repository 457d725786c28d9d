//! Events that can occur in a conversation

use super::state::{Category, Decision};
use crate::evaluator::Evaluation;
use crate::grammar::GrammarResult;
use crate::tools::ToolOutput;

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // Session events
    Begin,
    /// Finish work interrupted by a previous turn
    Resume,

    // User events
    UserInput {
        text: String,
        /// Caller says a document backs this prompt
        document_hint: bool,
    },
    MissingInput,

    // Collaborator results
    SuggestionsReady {
        text: String,
    },
    SuggestionsFailed {
        message: String,
    },
    GrammarChecked {
        original: String,
        result: GrammarResult,
    },
    GrammarFailed {
        original: String,
        message: String,
    },
    Evaluated {
        original: String,
        corrected: String,
        evaluation: Evaluation,
    },
    EvaluationFailed {
        message: String,
    },
    Classified {
        category: Category,
    },

    // Tool-call sub-protocol
    Decided {
        decision: Decision,
    },
    DecisionFailed {
        message: String,
    },
    ToolFinished {
        call_id: String,
        output: ToolOutput,
    },
    AnalysisReady {
        text: String,
    },
    AnalysisFailed {
        message: String,
    },
}

impl Event {
    pub fn user_input(text: impl Into<String>) -> Self {
        Event::UserInput {
            text: text.into(),
            document_hint: false,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::Begin => "begin",
            Event::Resume => "resume",
            Event::UserInput { .. } => "user_input",
            Event::MissingInput => "missing_input",
            Event::SuggestionsReady { .. } => "suggestions_ready",
            Event::SuggestionsFailed { .. } => "suggestions_failed",
            Event::GrammarChecked { .. } => "grammar_checked",
            Event::GrammarFailed { .. } => "grammar_failed",
            Event::Evaluated { .. } => "evaluated",
            Event::EvaluationFailed { .. } => "evaluation_failed",
            Event::Classified { .. } => "classified",
            Event::Decided { .. } => "decided",
            Event::DecisionFailed { .. } => "decision_failed",
            Event::ToolFinished { .. } => "tool_finished",
            Event::AnalysisReady { .. } => "analysis_ready",
            Event::AnalysisFailed { .. } => "analysis_failed",
        }
    }
}
