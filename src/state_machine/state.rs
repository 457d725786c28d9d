//! Conversation state types

use crate::grammar::GrammarResult;
use crate::llm::LlmResponse;
use crate::tools::ToolCategory;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Agent flows and stages
// ============================================================================

/// Which agent owns a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flow {
    Coach,
    Refiner,
    Grammar,
}

impl Flow {
    pub fn as_str(self) -> &'static str {
        match self {
            Flow::Coach => "coach",
            Flow::Refiner => "refiner",
            Flow::Grammar => "grammar",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "coach" => Some(Flow::Coach),
            "refiner" => Some(Flow::Refiner),
            "grammar" => Some(Flow::Grammar),
            _ => None,
        }
    }
}

/// Current named state of a dialogue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Stage {
    /// Fresh session, nothing said yet
    #[default]
    Start,

    // Guided coaching
    AwaitingTaskInput,
    AwaitingContextInput,
    AwaitingReferenceInput,
    AwaitingFinalPrompt,
    /// Final prompt accepted, polishing tool call in progress
    ReadyToRefine,
    Completed,

    /// Refiner waits here between prompts
    AwaitingPrompt,

    /// Grammar agent waits here between texts
    AwaitingText,

    /// The turn had no user input. The next message resumes `resume`.
    Error { message: String, resume: Box<Stage> },
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Start => "start",
            Stage::AwaitingTaskInput => "awaiting_task_input",
            Stage::AwaitingContextInput => "awaiting_context_input",
            Stage::AwaitingReferenceInput => "awaiting_reference_input",
            Stage::AwaitingFinalPrompt => "awaiting_final_prompt",
            Stage::ReadyToRefine => "ready_to_refine",
            Stage::Completed => "completed",
            Stage::AwaitingPrompt => "awaiting_prompt",
            Stage::AwaitingText => "awaiting_text",
            Stage::Error { .. } => "error",
        }
    }

    /// Coaching stage that collects a field, if this is one
    pub fn input_stage(&self) -> Option<InputStage> {
        match self {
            Stage::AwaitingTaskInput => Some(InputStage::Task),
            Stage::AwaitingContextInput => Some(InputStage::Context),
            Stage::AwaitingReferenceInput => Some(InputStage::References),
            Stage::AwaitingFinalPrompt => Some(InputStage::FinalPrompt),
            _ => None,
        }
    }
}

/// The four field-collecting coaching stages, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputStage {
    Task,
    Context,
    References,
    FinalPrompt,
}

impl InputStage {
    #[cfg(test)]
    pub const ALL: [InputStage; 4] = [
        InputStage::Task,
        InputStage::Context,
        InputStage::References,
        InputStage::FinalPrompt,
    ];

    pub fn stage(self) -> Stage {
        match self {
            InputStage::Task => Stage::AwaitingTaskInput,
            InputStage::Context => Stage::AwaitingContextInput,
            InputStage::References => Stage::AwaitingReferenceInput,
            InputStage::FinalPrompt => Stage::AwaitingFinalPrompt,
        }
    }

    /// Stage entered once this one's input is accepted
    pub fn next(self) -> Stage {
        match self {
            InputStage::Task => Stage::AwaitingContextInput,
            InputStage::Context => Stage::AwaitingReferenceInput,
            InputStage::References => Stage::AwaitingFinalPrompt,
            InputStage::FinalPrompt => Stage::ReadyToRefine,
        }
    }
}

// ============================================================================
// Collected data
// ============================================================================

/// User input as typed, paired with the version that was kept
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedField {
    pub original: String,
    pub value: String,
}

impl CapturedField {
    #[cfg(test)]
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            original: value.clone(),
            value,
        }
    }
}

/// Fields accumulated by the coaching flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CollectedFields {
    #[serde(default)]
    pub task: Option<CapturedField>,
    #[serde(default)]
    pub context: Option<CapturedField>,
    #[serde(default)]
    pub references: Vec<CapturedField>,
    #[serde(default)]
    pub final_prompt: Option<CapturedField>,
    /// Output of the polishing tool, when it ran
    #[serde(default)]
    pub polished: Option<String>,
}

impl CollectedFields {
    pub fn task_value(&self) -> &str {
        self.task.as_ref().map_or("", |f| f.value.as_str())
    }

    pub fn context_value(&self) -> &str {
        self.context.as_ref().map_or("", |f| f.value.as_str())
    }

    pub fn final_prompt_value(&self) -> &str {
        self.final_prompt.as_ref().map_or("", |f| f.value.as_str())
    }

    /// Record an accepted field for `stage`
    pub fn store(&mut self, stage: InputStage, field: CapturedField) {
        match stage {
            InputStage::Task => self.task = Some(field),
            InputStage::Context => self.context = Some(field),
            InputStage::References => self.references.push(field),
            InputStage::FinalPrompt => self.final_prompt = Some(field),
        }
    }

    pub fn get(&self, stage: InputStage) -> Option<&CapturedField> {
        match stage {
            InputStage::Task => self.task.as_ref(),
            InputStage::Context => self.context.as_ref(),
            InputStage::References => self.references.last(),
            InputStage::FinalPrompt => self.final_prompt.as_ref(),
        }
    }
}

/// Refiner label for what a prompt most needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    #[default]
    Clarity,
    Precision,
    Creative,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Clarity => "clarity",
            Category::Precision => "precision",
            Category::Creative => "creative",
        }
    }

    /// Map a model's label onto the fixed set; anything else is clarity
    pub fn from_label(label: &str) -> Self {
        let cleaned = label
            .trim()
            .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c.is_ascii_punctuation())
            .to_lowercase();
        match cleaned.as_str() {
            "precision" => Category::Precision,
            "creative" => Category::Creative,
            _ => Category::Clarity,
        }
    }

    pub fn tool_category(self) -> ToolCategory {
        match self {
            Category::Clarity => ToolCategory::Clarity,
            Category::Precision => ToolCategory::Precision,
            Category::Creative => ToolCategory::Creative,
        }
    }
}

/// Name recorded when the model refines a prompt without calling a tool
pub const DIRECT_REFINEMENT: &str = "direct_refinement";

/// One refiner pass over a prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefinementOutcome {
    pub original_prompt: String,
    pub category: Category,
    #[serde(default)]
    pub framework_used: Option<String>,
    #[serde(default)]
    pub refined_prompt: Option<String>,
    /// Document search is in scope for this pass
    #[serde(default)]
    pub has_document: bool,
}

impl RefinementOutcome {
    pub fn new(original_prompt: impl Into<String>, has_document: bool) -> Self {
        Self {
            original_prompt: original_prompt.into(),
            category: Category::default(),
            framework_used: None,
            refined_prompt: None,
            has_document,
        }
    }

    /// Tool categories the model may choose from
    pub fn scope(&self) -> Vec<ToolCategory> {
        let mut scope = vec![self.category.tool_category()];
        if self.has_document {
            scope.push(ToolCategory::Rag);
        }
        scope
    }
}

// ============================================================================
// Tool-call sub-protocol
// ============================================================================

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
    /// Categories offered when the model made this call; the executor
    /// refuses any tool outside them
    #[serde(default)]
    pub scope: Vec<ToolCategory>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
            scope: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_scope(mut self, scope: &[ToolCategory]) -> Self {
        self.scope = scope.to_vec();
        self
    }
}

/// What the model chose to do when offered tools
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Respond(String),
    Invoke(ToolCall),
}

impl Decision {
    /// The first tool use wins; any further ones are ignored. `scope` is
    /// what the model was offered.
    pub fn from_response(response: &LlmResponse, scope: &[ToolCategory]) -> Self {
        match response.tool_uses().first() {
            Some((id, name, input)) => Decision::Invoke(
                ToolCall::new(*id, *name, (*input).clone()).with_scope(scope),
            ),
            None => Decision::Respond(response.text()),
        }
    }
}

// ============================================================================
// Conversation State
// ============================================================================

/// Persisted snapshot of a dialogue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ConvState {
    pub stage: Stage,
    #[serde(default)]
    pub fields: CollectedFields,
    #[serde(default)]
    pub refinement: Option<RefinementOutcome>,
    #[serde(default)]
    pub grammar: Option<GrammarResult>,
    /// At most one tool call may be outstanding
    #[serde(default)]
    pub pending_tool: Option<ToolCall>,
}

impl ConvState {
    pub fn at(stage: Stage) -> Self {
        Self {
            stage,
            ..Self::default()
        }
    }

    /// Work interrupted mid-turn that must finish before new input
    pub fn needs_resume(&self) -> bool {
        self.pending_tool.is_some() || self.stage == Stage::ReadyToRefine
    }

    /// Refined prompt to report to the caller, if any
    pub fn refined_prompt(&self) -> Option<&str> {
        match &self.refinement {
            Some(outcome) => outcome.refined_prompt.as_deref(),
            None => self.fields.final_prompt.as_ref().map(|f| f.value.as_str()),
        }
    }
}

/// Immutable per-conversation configuration
#[derive(Debug, Clone)]
pub struct ConvContext {
    pub thread_id: String,
    pub flow: Flow,
    /// Whether the document provider currently holds anything
    pub documents_available: bool,
}

impl ConvContext {
    pub fn new(thread_id: impl Into<String>, flow: Flow, documents_available: bool) -> Self {
        Self {
            thread_id: thread_id.into(),
            flow,
            documents_available,
        }
    }
}
