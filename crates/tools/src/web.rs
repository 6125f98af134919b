//! Web search through the Tavily search API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

use chat_agent_core::tool::parse_arguments;
use chat_agent_core::{Tool, ToolError};

pub const TAVILY_ENDPOINT: &str = "https://api.tavily.com";

const DEFAULT_MAX_RESULTS: u32 = 5;
const SNIPPET_CHARS: usize = 300;

/// Search the web and return titled, linked snippets.
pub struct WebSearchTool {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl WebSearchTool {
    pub fn new(api_key: impl Into<String>, base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            endpoint: format!("{}/search", base_url.trim_end_matches('/')),
        }
    }

    async fn search(&self, query: &str, max_results: u32) -> Result<SearchResponse, ToolError> {
        let body = SearchRequest {
            api_key: &self.api_key,
            query,
            max_results,
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| ToolError::Execution(format!("Error searching the web: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ToolError::Execution(format!(
                "Error searching the web: {} - {}",
                status,
                text.trim()
            )));
        }

        resp.json()
            .await
            .map_err(|e| ToolError::Execution(format!("Error searching the web: {e}")))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebSearchArgs {
    query: String,
    max_results: Option<u32>,
}

#[derive(Serialize)]
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
    #[serde(default)]
    title: String,
    url: String,
    #[serde(default)]
    content: String,
}

fn format_results(query: &str, hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return format!("No results found for \"{query}\".");
    }

    let mut out = format!("Search results for \"{query}\":");
    for (i, hit) in hits.iter().enumerate() {
        out.push_str(&format!("\n{}. {} ({})", i + 1, hit.title, hit.url));
        let snippet: String = hit.content.chars().take(SNIPPET_CHARS).collect();
        if !snippet.is_empty() {
            out.push_str(&format!("\n   {}", snippet.replace('\n', " ")));
        }
    }
    out
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for up-to-date information"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "The search query"},
                "maxResults": {
                    "type": "integer",
                    "description": "Number of results to return (1-10, default 5)"
                }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    async fn call(&self, arguments: Value) -> Result<String, ToolError> {
        let args: WebSearchArgs = parse_arguments(self.name(), arguments)?;
        let max_results = args.max_results.unwrap_or(DEFAULT_MAX_RESULTS).clamp(1, 10);
        info!(query = %args.query, max_results, "Searching the web");

        let response = self.search(&args.query, max_results).await?;
        debug!(hits = response.results.len(), "Web search finished");
        Ok(format_results(&args.query, &response.results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_format_results() {
        let hits = vec![
            SearchHit {
                title: "Rust".into(),
                url: "https://www.rust-lang.org".into(),
                content: "A language empowering everyone\nto build software.".into(),
            },
            SearchHit {
                title: "Tokio".into(),
                url: "https://tokio.rs".into(),
                content: String::new(),
            },
        ];
        assert_eq!(
            format_results("rust", &hits),
            "Search results for \"rust\":\n\
             1. Rust (https://www.rust-lang.org)\n   \
             A language empowering everyone to build software.\n\
             2. Tokio (https://tokio.rs)"
        );
        assert_eq!(format_results("x", &[]), "No results found for \"x\".");
    }

    #[tokio::test]
    async fn test_search_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(body_partial_json(json!({
                "api_key": "tvly-test",
                "query": "rust async",
                "max_results": 10
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"title": "Async Book", "url": "https://rust-lang.github.io/async-book", "content": "Async programming in Rust"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tool = WebSearchTool::new("tvly-test", &server.uri());
        let out = tool
            .call(json!({"query": "rust async", "maxResults": 50}))
            .await
            .unwrap();
        assert!(out.starts_with("Search results for \"rust async\":"));
        assert!(out.contains("1. Async Book (https://rust-lang.github.io/async-book)"));
    }

    #[tokio::test]
    async fn test_search_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
            .mount(&server)
            .await;

        let tool = WebSearchTool::new("bad", &server.uri());
        let err = tool.call(json!({"query": "x"})).await.unwrap_err();
        assert!(err.to_string().contains("401"));
        assert!(err.to_string().contains("invalid key"));
    }
}
