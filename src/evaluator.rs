//! Structured judgment over user input
//!
//! The evaluator is a thin wrapper that asks the LLM for a JSON verdict.
//! How lenient it is lives entirely in the instruction text built by the
//! caller; this module only enforces the output shape.

use crate::llm::{LlmError, LlmRequest, LlmService};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

const DEFAULT_REJECTION_FEEDBACK: &str =
    "I couldn't quite tell what you meant here. Could you add a little more detail?";

/// Verdict on one piece of user input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    #[serde(alias = "is_correct")]
    pub accepted: bool,
    #[serde(default)]
    pub feedback: String,
    #[serde(default, alias = "updated_prompt")]
    pub suggested_rewrite: Option<String>,
    #[serde(default)]
    pub suggestions: Option<Vec<String>>,
}

impl Evaluation {
    #[cfg(test)]
    pub fn accept(feedback: impl Into<String>) -> Self {
        Self {
            accepted: true,
            feedback: feedback.into(),
            suggested_rewrite: None,
            suggestions: None,
        }
    }

    #[cfg(test)]
    pub fn reject(feedback: impl Into<String>) -> Self {
        Self {
            accepted: false,
            feedback: feedback.into(),
            suggested_rewrite: None,
            suggestions: None,
        }
    }

    #[cfg(test)]
    pub fn with_rewrite(mut self, rewrite: impl Into<String>) -> Self {
        self.suggested_rewrite = Some(rewrite.into());
        self
    }

    #[cfg(test)]
    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = Some(suggestions);
        self
    }

    /// Non-blank rewrite, if the model offered one
    pub fn rewrite(&self) -> Option<&str> {
        self.suggested_rewrite
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }

    /// Feedback to show the user; rejections never come back empty
    pub fn feedback_text(&self) -> &str {
        match self.feedback.trim() {
            "" if !self.accepted => DEFAULT_REJECTION_FEEDBACK,
            feedback => feedback,
        }
    }

    fn normalized(mut self) -> Self {
        self.feedback = self.feedback.trim().to_string();
        if !self.accepted && self.feedback.is_empty() {
            self.feedback = DEFAULT_REJECTION_FEEDBACK.to_string();
        }
        if let Some(suggestions) = self.suggestions.take() {
            let kept: Vec<String> = suggestions
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            self.suggestions = (!kept.is_empty()).then_some(kept);
        }
        self
    }
}

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("evaluation request failed: {0}")]
    Llm(#[from] LlmError),
    #[error("evaluation reply was not a valid verdict: {0}")]
    Malformed(String),
}

/// Judges whether input is good enough to move on
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, instruction: &str) -> Result<Evaluation, EvaluationError>;
}

#[async_trait]
impl<T: Evaluator + ?Sized> Evaluator for Arc<T> {
    async fn evaluate(&self, instruction: &str) -> Result<Evaluation, EvaluationError> {
        (**self).evaluate(instruction).await
    }
}

const OUTPUT_CONTRACT: &str = r#"Respond with a single JSON object and nothing else:
{"accepted": true|false, "feedback": "<encouraging feedback>", "suggested_rewrite": "<improved version or null>", "suggestions": ["<specific improvement>", ...]}
Only set "accepted" to false for empty, nonsensical, unrelated or harmful input.
Leave "suggested_rewrite" null unless you have a clearly better version."#;

/// Evaluator backed by an LLM
pub struct LlmEvaluator {
    llm: Arc<dyn LlmService>,
}

impl LlmEvaluator {
    pub fn new(llm: Arc<dyn LlmService>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Evaluator for LlmEvaluator {
    async fn evaluate(&self, instruction: &str) -> Result<Evaluation, EvaluationError> {
        let request = LlmRequest::simple(OUTPUT_CONTRACT, instruction).with_max_tokens(600);
        let response = self.llm.complete(&request).await?;
        parse_evaluation(&response.text())
    }
}

/// Pull the first JSON object out of a model reply
pub fn parse_evaluation(reply: &str) -> Result<Evaluation, EvaluationError> {
    let start = reply
        .find('{')
        .ok_or_else(|| EvaluationError::Malformed(format!("no JSON object in: {reply}")))?;
    let end = reply
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| EvaluationError::Malformed(format!("unterminated JSON in: {reply}")))?;
    let body = reply
        .get(start..=end)
        .ok_or_else(|| EvaluationError::Malformed(reply.to_string()))?;

    serde_json::from_str::<Evaluation>(body)
        .map(Evaluation::normalized)
        .map_err(|e| EvaluationError::Malformed(format!("{e}: {body}")))
}
