//! Effects produced by state transitions

use crate::db::ChatMessage;
use crate::state_machine::state::ToolCall;
use crate::tools::ToolCategory;

/// Effects to be executed after state transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Append a message to the session transcript
    AppendMessage(ChatMessage),

    /// Persist the new state
    PersistState,

    /// Ask the model for task ideas
    RequestSuggestions,

    /// Run the grammar checker over user input
    CorrectGrammar { text: String },

    /// Ask the evaluator to judge input
    Evaluate {
        instruction: String,
        original: String,
        corrected: String,
    },

    /// Ask the model to label a prompt
    ClassifyCategory { prompt: String },

    /// Offer the model the tools in `scope` and let it choose
    RequestDecision {
        system: String,
        prompt: String,
        scope: Vec<ToolCategory>,
        /// Send the visible transcript along with the prompt
        include_history: bool,
    },

    /// Execute the pending tool call
    ExecuteTool { call: ToolCall },

    /// Ask the model for a free-text report
    RequestAnalysis { system: String, prompt: String },
}

impl Effect {
    pub fn reply(text: impl Into<String>) -> Self {
        Effect::AppendMessage(ChatMessage::assistant(text))
    }

    pub fn execute_tool(call: ToolCall) -> Self {
        Effect::ExecuteTool { call }
    }
}
