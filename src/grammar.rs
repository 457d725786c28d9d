//! Grammar correction through the LanguageTool HTTP API

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_LANGUAGETOOL_URL: &str = "https://api.languagetool.org/v2/check";
pub const DEFAULT_LANGUAGE: &str = "en-GB";

/// Outcome of one grammar pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrammarResult {
    pub original_text: String,
    pub corrected_text: String,
    pub corrections_made: Vec<String>,
    pub suggestions: Vec<String>,
}

impl GrammarResult {
    /// Result for text that needed no changes
    pub fn unchanged(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            original_text: text.clone(),
            corrected_text: text,
            corrections_made: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    pub fn changed(&self) -> bool {
        self.original_text != self.corrected_text
    }
}

#[derive(Debug, Error)]
pub enum GrammarError {
    #[error("grammar service unreachable: {0}")]
    Network(String),
    #[error("grammar service returned {status}: {body}")]
    Service { status: u16, body: String },
    #[error("unexpected grammar service reply: {0}")]
    Decode(String),
}

#[async_trait]
pub trait GrammarChecker: Send + Sync {
    async fn check(&self, text: &str) -> Result<GrammarResult, GrammarError>;
}

#[async_trait]
impl<T: GrammarChecker + ?Sized> GrammarChecker for Arc<T> {
    async fn check(&self, text: &str) -> Result<GrammarResult, GrammarError> {
        (**self).check(text).await
    }
}

/// A single issue reported by LanguageTool. Offsets count UTF-16 code units.
#[derive(Debug, Clone, Deserialize)]
pub struct GrammarMatch {
    pub message: String,
    pub offset: usize,
    pub length: usize,
    #[serde(default)]
    pub replacements: Vec<Replacement>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Replacement {
    pub value: String,
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    #[serde(default)]
    matches: Vec<GrammarMatch>,
}

pub struct LanguageToolChecker {
    client: Client,
    url: String,
    language: String,
}

impl LanguageToolChecker {
    pub fn new(url: impl Into<String>, language: impl Into<String>) -> Result<Self, GrammarError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| GrammarError::Network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            language: language.into(),
        })
    }
}

#[async_trait]
impl GrammarChecker for LanguageToolChecker {
    async fn check(&self, text: &str) -> Result<GrammarResult, GrammarError> {
        let response = self
            .client
            .post(&self.url)
            .form(&[("text", text), ("language", self.language.as_str())])
            .send()
            .await
            .map_err(|e| GrammarError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GrammarError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(GrammarError::Service {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: CheckResponse =
            serde_json::from_str(&body).map_err(|e| GrammarError::Decode(e.to_string()))?;

        tracing::debug!(matches = parsed.matches.len(), "LanguageTool check finished");
        Ok(apply_matches(text, &parsed.matches))
    }
}

/// Apply the first replacement of every match.
///
/// Matches are applied from the end of the text backwards so earlier
/// offsets stay valid. Overlapping or out-of-range matches, and matches that
/// would split a surrogate pair, are reported as suggestions instead of being
/// applied.
pub fn apply_matches(text: &str, matches: &[GrammarMatch]) -> GrammarResult {
    let mut units: Vec<u16> = text.encode_utf16().collect();
    let mut corrections = Vec::new();
    let mut suggestions = Vec::new();

    let mut ordered: Vec<&GrammarMatch> = matches.iter().collect();
    ordered.sort_by_key(|m| std::cmp::Reverse(m.offset));

    // Lowest offset already rewritten; later matches must end before it
    let mut boundary = units.len();

    for m in ordered {
        let Some(replacement) = m.replacements.first() else {
            suggestions.push(m.message.clone());
            continue;
        };
        let end = match m.offset.checked_add(m.length) {
            Some(end) if end <= boundary => end,
            _ => {
                suggestions.push(m.message.clone());
                continue;
            }
        };
        if splits_pair(&units, m.offset) || splits_pair(&units, end) {
            suggestions.push(m.message.clone());
            continue;
        }

        let bad = String::from_utf16_lossy(&units[m.offset..end]);
        units.splice(m.offset..end, replacement.value.encode_utf16());
        corrections.push(format!("'{bad}' → '{}'", replacement.value));
        boundary = m.offset;
    }

    // Report in reading order
    corrections.reverse();
    suggestions.reverse();

    GrammarResult {
        original_text: text.to_string(),
        corrected_text: String::from_utf16_lossy(&units),
        corrections_made: corrections,
        suggestions,
    }
}

/// Whether `index` falls between the halves of a surrogate pair
fn splits_pair(units: &[u16], index: usize) -> bool {
    units
        .get(index)
        .is_some_and(|unit| (0xDC00..=0xDFFF).contains(unit))
}
