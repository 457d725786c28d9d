//! Refinement tools
//!
//! Tools are stateless; everything a call needs arrives through `ToolContext`.

mod document_search;
mod frameworks;
mod grammar_checker;
mod web_search;

pub use document_search::DocumentSearchTool;
pub use frameworks::{FrameworkTool, FRAMEWORKS};
pub use grammar_checker::GrammarCheckerTool;
pub use web_search::WebSearchTool;

use crate::documents::DocumentContextProvider;
use crate::grammar::GrammarChecker;
use crate::llm::{LlmService, ToolDefinition};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Result from tool execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_data: Option<Value>,
}

impl ToolOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            display_data: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: message.into(),
            display_data: None,
        }
    }

    pub fn with_display(mut self, data: Value) -> Self {
        self.display_data = Some(data);
        self
    }

    /// Usable result: the tool succeeded and said something
    pub fn succeeded(&self) -> bool {
        self.success && !self.output.trim().is_empty()
    }
}

/// What a tool is for; the refiner offers the model one category at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Clarity,
    Precision,
    Creative,
    Rag,
    Polish,
    Research,
}

/// All context needed for a tool invocation.
///
/// Created fresh for each tool call. Tools should derive all context from
/// this struct.
#[derive(Clone)]
pub struct ToolContext {
    /// The thread this tool is executing within
    pub thread_id: String,

    /// Model used by tools that rewrite text
    pub llm: Arc<dyn LlmService>,

    pub grammar: Arc<dyn GrammarChecker>,

    pub documents: Arc<dyn DocumentContextProvider>,
}

impl ToolContext {
    pub fn new(
        thread_id: impl Into<String>,
        llm: Arc<dyn LlmService>,
        grammar: Arc<dyn GrammarChecker>,
        documents: Arc<dyn DocumentContextProvider>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            llm,
            grammar,
            documents,
        }
    }
}

/// Trait for tools the model may call
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name
    fn name(&self) -> &str;

    /// Tool description for LLM
    fn description(&self) -> String;

    fn category(&self) -> ToolCategory;

    /// JSON schema for tool input
    fn input_schema(&self) -> Value;

    /// Execute the tool with all context provided via `ToolContext`.
    ///
    /// Failures are reported in the output, never raised.
    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput;
}

/// Collection of tools available to the agents
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        Self { tools }
    }

    /// Frameworks, document search and grammar polish, plus web search
    /// when a search key is configured
    pub fn standard(web_search: Option<WebSearchTool>) -> Self {
        let mut tools: Vec<Arc<dyn Tool>> = FRAMEWORKS
            .iter()
            .map(|framework| Arc::new(FrameworkTool::new(framework)) as Arc<dyn Tool>)
            .collect();
        tools.push(Arc::new(DocumentSearchTool));
        tools.push(Arc::new(GrammarCheckerTool));
        if let Some(search) = web_search {
            tools.push(Arc::new(search));
        }
        Self { tools }
    }

    /// Definitions for the tools in `scope`, in registration order
    pub fn definitions(&self, scope: &[ToolCategory]) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .filter(|t| scope.contains(&t.category()))
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Execute a tool by name; `None` when no such tool is registered
    pub async fn execute(&self, name: &str, input: Value, ctx: ToolContext) -> Option<ToolOutput> {
        let tool = self.tools.iter().find(|t| t.name() == name)?;
        Some(tool.run(input, ctx).await)
    }
}

/// Schema shared by tools that take a single text argument
fn text_argument_schema(field: &str, description: &str) -> Value {
    serde_json::json!({
        "type": "object",
        "required": [field],
        "properties": {
            field: {
                "type": "string",
                "description": description
            }
        }
    })
}

/// Pull a required string argument out of tool input
fn string_argument<'a>(input: &'a Value, field: &str) -> Option<&'a str> {
    input.get(field).and_then(Value::as_str)
}
