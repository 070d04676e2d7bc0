//! Query (orchestrator) service client
//!
//! Sends the user's text with the prior conversation history and returns the
//! assistant's answer together with any tool invocations made while answering.

use std::fmt::Write as _;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Service;
use crate::conversation::ConversationMessage;
use crate::http::{endpoint, failure_detail};
use crate::{Error, Result};

/// Query path on the orchestrator service
const QUERY_PATH: &str = "/v1/query";

/// A tool invoked while answering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool name
    pub tool: String,

    /// Arguments passed to the tool
    #[serde(default)]
    pub args: serde_json::Map<String, serde_json::Value>,
}

/// The value a tool returned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Tool name
    pub tool: String,

    /// Opaque result value
    #[serde(default)]
    pub result: serde_json::Value,
}

/// Answer to one query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Assistant text
    #[serde(rename = "response")]
    pub response_text: String,

    /// Tool invocations, in call order
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,

    /// Tool results, in completion order
    #[serde(default)]
    pub tool_results: Vec<ToolResult>,
}

impl QueryResult {
    /// Answer without tool activity
    #[must_use]
    pub fn text(response_text: impl Into<String>) -> Self {
        Self {
            response_text: response_text.into(),
            ..Self::default()
        }
    }

    /// Pair each tool call with a result of the same name
    ///
    /// Results carry no call id, so a tool invoked twice gets the first
    /// matching result both times.
    #[must_use]
    pub fn tool_pairs(&self) -> Vec<(&ToolCall, Option<&ToolResult>)> {
        self.tool_calls
            .iter()
            .map(|call| {
                let result = self.tool_results.iter().find(|r| r.tool == call.tool);
                (call, result)
            })
            .collect()
    }

    /// Human-readable summary of the tool calls, empty when none were made
    #[must_use]
    pub fn render_tool_calls(&self) -> String {
        let mut out = String::new();
        for (call, result) in self.tool_pairs() {
            let _ = write!(out, "[tool] {}", call.tool);
            if !call.args.is_empty() {
                let args = serde_json::to_string(&call.args).unwrap_or_default();
                let _ = write!(out, " {args}");
            }
            out.push('\n');

            if let Some(result) = result {
                let rendered = match &result.result {
                    serde_json::Value::String(s) => s.clone(),
                    other => serde_json::to_string_pretty(other).unwrap_or_default(),
                };
                for line in rendered.lines() {
                    let _ = writeln!(out, "  {line}");
                }
            }
        }
        out
    }
}

/// Answers user text in the context of the prior history
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Send a query
    ///
    /// # Errors
    ///
    /// Returns `QueryFailed` on any service or transport failure
    async fn query(&self, text: &str, history: &[ConversationMessage]) -> Result<QueryResult>;
}

/// HTTP client for the orchestrator service
pub struct QueryClient {
    client: reqwest::Client,
    base_url: String,
}

impl QueryClient {
    /// Create a client for the service at `base_url`
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl QueryBackend for QueryClient {
    async fn query(&self, text: &str, history: &[ConversationMessage]) -> Result<QueryResult> {
        #[derive(Serialize)]
        struct QueryRequest<'a> {
            query: &'a str,
            conversation_history: &'a [ConversationMessage],
        }

        let service = Service::Query.name();
        tracing::debug!(
            chars = text.len(),
            history_len = history.len(),
            "sending query"
        );

        let request = QueryRequest {
            query: text,
            conversation_history: history,
        };

        let response = self
            .client
            .post(endpoint(&self.base_url, QUERY_PATH))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "query request failed");
                Error::QueryFailed(e.to_string())
            })?;

        if !response.status().is_success() {
            let detail = failure_detail(service, response).await;
            tracing::error!(detail = %detail, "query service error");
            return Err(Error::QueryFailed(detail));
        }

        let result: QueryResult = response
            .json()
            .await
            .map_err(|e| Error::QueryFailed(format!("invalid {service} response: {e}")))?;

        tracing::debug!(
            response_chars = result.response_text.len(),
            tool_calls = result.tool_calls.len(),
            "query complete"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn call(tool: &str) -> ToolCall {
        ToolCall {
            tool: tool.to_string(),
            args: serde_json::Map::new(),
        }
    }

    fn result(tool: &str, value: serde_json::Value) -> ToolResult {
        ToolResult {
            tool: tool.to_string(),
            result: value,
        }
    }

    #[test]
    fn parses_service_response() {
        let body = json!({
            "response": "980000 CHF",
            "tool_calls": [{"tool": "get_fact", "args": {"key": "versicherungssumme"}}],
            "tool_results": [{"tool": "get_fact", "result": "980000"}]
        });
        let parsed: QueryResult = serde_json::from_value(body).unwrap();

        assert_eq!(parsed.response_text, "980000 CHF");
        assert_eq!(parsed.tool_calls[0].args["key"], "versicherungssumme");
        assert_eq!(parsed.tool_results[0].result, json!("980000"));
    }

    #[test]
    fn tool_lists_default_to_empty() {
        let parsed: QueryResult = serde_json::from_value(json!({"response": "hi"})).unwrap();
        assert_eq!(parsed, QueryResult::text("hi"));
    }

    #[test]
    fn pairs_by_name_with_missing_result() {
        let result = QueryResult {
            response_text: String::new(),
            tool_calls: vec![call("search"), call("calendar")],
            tool_results: vec![result("search", json!(["a", "b"]))],
        };

        let pairs = result.tool_pairs();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].1.map(|r| &r.result), Some(&json!(["a", "b"])));
        assert!(pairs[1].1.is_none());
    }

    #[test]
    fn repeated_tool_gets_first_result() {
        let result = QueryResult {
            response_text: String::new(),
            tool_calls: vec![call("search"), call("search")],
            tool_results: vec![result("search", json!(1)), result("search", json!(2))],
        };

        let pairs = result.tool_pairs();
        assert_eq!(pairs[0].1.unwrap().result, json!(1));
        assert_eq!(pairs[1].1.unwrap().result, json!(1));
    }

    #[test]
    fn renders_args_and_results() {
        let mut args = serde_json::Map::new();
        args.insert("key".to_string(), json!("plz"));
        let result = QueryResult {
            response_text: "8001".to_string(),
            tool_calls: vec![ToolCall {
                tool: "get_fact".to_string(),
                args,
            }],
            tool_results: vec![result("get_fact", json!("8001"))],
        };

        assert_eq!(
            result.render_tool_calls(),
            "[tool] get_fact {\"key\":\"plz\"}\n  8001\n"
        );
        assert_eq!(QueryResult::text("x").render_tool_calls(), "");
    }
}
