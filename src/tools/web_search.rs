//! Web search tool backed by the Tavily search API

use super::{string_argument, text_argument_schema, Tool, ToolCategory, ToolContext, ToolOutput};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const TAVILY_URL: &str = "https://api.tavily.com/search";
const MAX_RESULTS: u32 = 3;

pub struct WebSearchTool {
    client: Client,
    api_key: String,
    url: String,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: u32,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    title: String,
    url: String,
}

impl WebSearchTool {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_url(api_key, TAVILY_URL)
    }

    fn with_url(api_key: impl Into<String>, url: impl Into<String>) -> Self {
        // A builder failure only loses the timeout
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: api_key.into(),
            url: url.into(),
        }
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, String> {
        let response = self
            .client
            .post(&self.url)
            .json(&SearchRequest {
                api_key: &self.api_key,
                query,
                max_results: MAX_RESULTS,
            })
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("HTTP {}: {body}", status.as_u16()));
        }

        let parsed: SearchResponse = response.json().await.map_err(|e| e.to_string())?;
        Ok(parsed.results)
    }
}

/// Bulleted `- title: url` list
fn format_hits(hits: &[SearchHit]) -> String {
    let lines: Vec<String> = hits
        .iter()
        .map(|hit| format!("- {}: {}", hit.title, hit.url))
        .collect();
    format!("Search results:\n{}", lines.join("\n"))
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &'static str {
        "web_search"
    }

    fn description(&self) -> String {
        "Use this tool to search the web for relevant information. Input should be a search query.".to_string()
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Research
    }

    fn input_schema(&self) -> Value {
        text_argument_schema("query", "The search query")
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput {
        let Some(query) = string_argument(&input, "query").filter(|q| !q.trim().is_empty()) else {
            return ToolOutput::error("Invalid input: query is required");
        };

        match self.search(query).await {
            Ok(hits) if hits.is_empty() => ToolOutput::error("No results found."),
            Ok(hits) => {
                tracing::debug!(thread_id = %ctx.thread_id, results = hits.len(), "Web search");
                ToolOutput::success(format_hits(&hits))
            }
            Err(e) => ToolOutput::error(format!("Error during web search: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::tests::test_context;
    use serde_json::json;

    #[test]
    fn test_format_hits() {
        let hits = vec![
            SearchHit {
                title: "Prompt guide".to_string(),
                url: "https://example.com/guide".to_string(),
            },
            SearchHit {
                title: "Frameworks".to_string(),
                url: "https://example.com/frameworks".to_string(),
            },
        ];
        assert_eq!(
            format_hits(&hits),
            "Search results:\n- Prompt guide: https://example.com/guide\n- Frameworks: https://example.com/frameworks"
        );
    }

    #[test]
    fn test_response_decoding_ignores_extra_fields() {
        let parsed: SearchResponse = serde_json::from_value(json!({
            "query": "rust",
            "results": [{"title": "Rust", "url": "https://rust-lang.org", "content": "...", "score": 0.9}]
        }))
        .unwrap();
        assert_eq!(parsed.results.len(), 1);
        assert_eq!(parsed.results[0].url, "https://rust-lang.org");
    }

    #[tokio::test]
    async fn test_unreachable_service_is_reported() {
        let tool = WebSearchTool::with_url("key", "http://127.0.0.1:9/search");
        let output = tool.run(json!({"query": "prompt tips"}), test_context()).await;
        assert!(!output.success);
        assert!(output.output.starts_with("Error during web search"));
    }
}
