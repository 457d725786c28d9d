//! API request and response types

use crate::db::{ChatMessage, Role};
use crate::llm::ModelInfo;
use crate::runtime::TurnOutcome;
use crate::state_machine::state::DIRECT_REFINEMENT;
use serde::{Deserialize, Serialize};

/// One transcript entry as clients send and receive it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
}

impl HistoryEntry {
    /// `None` for roles the transcript does not know
    pub fn to_message(&self) -> Option<ChatMessage> {
        let role = Role::parse(self.role.trim().to_lowercase().as_str())?;
        Some(ChatMessage {
            role,
            ..ChatMessage::user(self.content.as_str())
        })
    }
}

impl From<&ChatMessage> for HistoryEntry {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: message.role.to_string(),
            content: message.content.clone(),
        }
    }
}

/// Request to the coaching agent
#[derive(Debug, Deserialize)]
pub struct CoachChatRequest {
    #[serde(default)]
    pub user_input: Option<String>,
    #[serde(default)]
    pub conversation_history: Vec<HistoryEntry>,
    #[serde(default)]
    pub thread_id: Option<String>,
}

/// Request to the refiner agent
#[derive(Debug, Deserialize)]
pub struct RefineChatRequest {
    #[serde(default)]
    pub original_prompt: Option<String>,
    #[serde(default)]
    pub conversation_history: Vec<HistoryEntry>,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub has_document: bool,
}

/// Request to the grammar agent
#[derive(Debug, Deserialize)]
pub struct GrammarChatRequest {
    #[serde(default)]
    pub user_input: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
}

/// Fields every agent returns
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub thread_id: String,
    pub agent_output: String,
    pub refined_prompt: Option<String>,
    pub conversation_history: Vec<HistoryEntry>,
    pub stage: String,
}

impl ChatResponse {
    pub fn from_outcome(thread_id: String, outcome: &TurnOutcome) -> Self {
        let state = &outcome.session.state;
        Self {
            thread_id,
            agent_output: outcome.agent_output.clone(),
            refined_prompt: state.refined_prompt().map(str::to_string),
            conversation_history: outcome.history.iter().map(HistoryEntry::from).collect(),
            stage: state.stage.name().to_string(),
        }
    }
}

/// Why the refiner rewrote a prompt the way it did
#[derive(Debug, Serialize)]
pub struct RefinementAnalysis {
    pub category: String,
    pub framework_used: String,
    pub reasoning: String,
    pub refined_prompt: String,
}

#[derive(Debug, Serialize)]
pub struct RefineChatResponse {
    #[serde(flatten)]
    pub chat: ChatResponse,
    pub prompt_category: Option<String>,
    pub framework_used: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refinement_analysis: Option<RefinementAnalysis>,
}

impl RefineChatResponse {
    pub fn from_outcome(thread_id: String, outcome: &TurnOutcome) -> Self {
        let refinement = outcome.session.state.refinement.as_ref();
        let analysis = refinement.and_then(|r| {
            let refined_prompt = r.refined_prompt.clone()?;
            let framework = r.framework_used.as_deref().unwrap_or(DIRECT_REFINEMENT);
            Some(RefinementAnalysis {
                category: r.category.as_str().to_string(),
                framework_used: framework.to_string(),
                reasoning: format!(
                    "Applied {framework} framework for {} improvement",
                    r.category.as_str()
                ),
                refined_prompt,
            })
        });

        Self {
            chat: ChatResponse::from_outcome(thread_id, outcome),
            prompt_category: refinement.map(|r| r.category.as_str().to_string()),
            framework_used: refinement.and_then(|r| r.framework_used.clone()),
            refinement_analysis: analysis,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GrammarChatResponse {
    #[serde(flatten)]
    pub chat: ChatResponse,
    pub corrected_text: Option<String>,
    pub corrections_made: Vec<String>,
    pub suggestions: Vec<String>,
}

impl GrammarChatResponse {
    pub fn from_outcome(thread_id: String, outcome: &TurnOutcome) -> Self {
        let grammar = outcome.session.state.grammar.as_ref();
        Self {
            chat: ChatResponse::from_outcome(thread_id, outcome),
            corrected_text: grammar.map(|g| g.corrected_text.clone()),
            corrections_made: grammar.map(|g| g.corrections_made.clone()).unwrap_or_default(),
            suggestions: grammar.map(|g| g.suggestions.clone()).unwrap_or_default(),
        }
    }
}

/// Response for thread creation
#[derive(Debug, Serialize)]
pub struct ThreadResponse {
    pub thread_id: String,
}

/// Request to add a document to the refiner's context
#[derive(Debug, Deserialize)]
pub struct DocumentUploadRequest {
    pub filename: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct DocumentUploadResponse {
    pub chunks: usize,
}

/// What `GET /` describes
#[derive(Debug, Serialize)]
pub struct ServiceIndex {
    pub service: &'static str,
    pub version: &'static str,
    pub agents: Vec<&'static str>,
    pub models: Vec<ModelInfo>,
    pub default_model: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
