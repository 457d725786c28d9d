//! Document search tool - retrieval over uploaded documents

use super::{string_argument, text_argument_schema, Tool, ToolCategory, ToolContext, ToolOutput};
use crate::documents::Relevance;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt::Write as _;

const TOP_K: usize = 5;
/// Hits at or beyond this distance are dropped
const MAX_DISTANCE: f32 = 0.8;

pub struct DocumentSearchTool;

#[async_trait]
impl Tool for DocumentSearchTool {
    fn name(&self) -> &'static str {
        "document_search"
    }

    fn description(&self) -> String {
        "Searches uploaded documents for context to help refine a prompt. Use this when you need information from a file or want to reference uploaded content.".to_string()
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Rag
    }

    fn input_schema(&self) -> Value {
        text_argument_schema("query", "What to look for in the uploaded documents")
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput {
        let Some(query) = string_argument(&input, "query").filter(|q| !q.trim().is_empty()) else {
            return ToolOutput::error("Invalid input: query is required");
        };

        if !ctx.documents.has_context() {
            return ToolOutput::error(
                "No documents have been uploaded yet. Please upload a document first.",
            );
        }

        let hits = match ctx.documents.search(query, TOP_K).await {
            Ok(hits) => hits,
            Err(e) => return ToolOutput::error(format!("Error searching documents: {e}")),
        };
        if hits.is_empty() {
            return ToolOutput::error(
                "No relevant content found in uploaded documents for your query.",
            );
        }

        let relevant: Vec<_> = hits.into_iter().filter(|h| h.score < MAX_DISTANCE).collect();
        if relevant.is_empty() {
            return ToolOutput::error(
                "No highly relevant content found in uploaded documents for your query.",
            );
        }

        let mut context = String::from("Found relevant content from uploaded documents:\n\n");
        for (i, hit) in relevant.iter().enumerate() {
            let _ = writeln!(
                context,
                "**Source {}** (from {}, relevance: {}):\n{}\n",
                i + 1,
                hit.source,
                Relevance::from_distance(hit.score).label(),
                hit.text
            );
        }

        tracing::debug!(thread_id = %ctx.thread_id, hits = relevant.len(), "Document search");
        ToolOutput::success(context.trim_end()).with_display(json!({ "sources": relevant }))
    }
}
