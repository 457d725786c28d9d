//! Grammar checker tool - polishes a finished prompt

use super::{string_argument, text_argument_schema, Tool, ToolCategory, ToolContext, ToolOutput};
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct GrammarCheckerTool;

#[async_trait]
impl Tool for GrammarCheckerTool {
    fn name(&self) -> &'static str {
        "grammar_checker"
    }

    fn description(&self) -> String {
        "Checks the provided text for grammar and spelling errors and returns a corrected version. Use this to polish and refine a final prompt or any user-provided text.".to_string()
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Polish
    }

    fn input_schema(&self) -> Value {
        text_argument_schema("text", "The text to be checked for grammar and spelling.")
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput {
        let Some(text) = string_argument(&input, "text").filter(|t| !t.trim().is_empty()) else {
            return ToolOutput::error("Invalid input: text is required");
        };

        match ctx.grammar.check(text).await {
            Ok(result) => ToolOutput::success(format!(
                "Grammar check complete. Here is the corrected text:\n---\n{}",
                result.corrected_text
            ))
            .with_display(json!({ "corrections": result.corrections_made })),
            Err(e) => ToolOutput::error(format!("Error during grammar check: {e}")),
        }
    }
}
