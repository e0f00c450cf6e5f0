use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, ErrorDetails};
use crate::spend::estimate_tokens;

/// Tools exposed to visitors. Anything else on the tool route 404s before
/// the backend is contacted.
pub const KNOWN_TOOLS: &[&str] = &["fit", "resume", "interview"];

pub fn is_known_tool(tool: &str) -> bool {
    KNOWN_TOOLS.contains(&tool)
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// What a tool run produced, plus what it cost.
#[derive(Clone, Debug)]
pub struct ToolOutcome {
    pub output: serde_json::Value,
    pub usage: TokenUsage,
}

/// Seam to the LLM subsystem. The gateway only governs access and cost;
/// prompt construction and model calls live behind this trait.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, tool: &str, payload: &serde_json::Value) -> Result<ToolOutcome, Error>;
}

/// Production runner: forwards the payload to the tool backend over HTTP.
pub struct HttpToolRunner {
    client: Client,
    base_url: Url,
}

#[derive(Deserialize)]
struct BackendResponse {
    output: serde_json::Value,
    usage: Option<TokenUsage>,
}

impl HttpToolRunner {
    pub fn new(client: Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    fn tool_url(&self, tool: &str) -> Result<Url, Error> {
        self.base_url.join(tool).map_err(|e| {
            Error::new(ErrorDetails::InternalError {
                message: format!("Failed to build tool backend URL for `{tool}`: {e}"),
            })
        })
    }
}

#[async_trait]
impl ToolRunner for HttpToolRunner {
    async fn run(&self, tool: &str, payload: &serde_json::Value) -> Result<ToolOutcome, Error> {
        let url = self.tool_url(tool)?;
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                Error::new(ErrorDetails::ToolBackend {
                    message: format!("Request to tool backend failed: {e}"),
                })
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::new(ErrorDetails::ToolBackend {
                message: format!("Tool backend returned {status} for `{tool}`"),
            }));
        }

        let body: BackendResponse = response.json().await.map_err(|e| {
            Error::new(ErrorDetails::ToolBackend {
                message: format!("Failed to parse tool backend response: {e}"),
            })
        })?;

        let usage = body
            .usage
            .unwrap_or_else(|| estimate_usage(payload, &body.output));
        Ok(ToolOutcome {
            output: body.output,
            usage,
        })
    }
}

/// Fallback when the backend reports no usage: size-based token estimate
/// from the payloads, matching how costs are estimated downstream.
fn estimate_usage(payload: &serde_json::Value, output: &serde_json::Value) -> TokenUsage {
    TokenUsage {
        input_tokens: estimate_tokens(&payload.to_string()),
        output_tokens: estimate_tokens(&output.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_known_tools() {
        assert!(is_known_tool("fit"));
        assert!(is_known_tool("resume"));
        assert!(is_known_tool("interview"));
        assert!(!is_known_tool("admin"));
        assert!(!is_known_tool(""));
    }

    #[test]
    fn test_estimate_usage_from_payload_sizes() {
        let payload = json!({"jobPosting": "a".repeat(400)});
        let output = json!({"report": "b".repeat(100)});
        let usage = estimate_usage(&payload, &output);
        // 4 bytes per token, json framing included
        assert!(usage.input_tokens >= 100);
        assert!(usage.output_tokens >= 25);
        assert!(usage.input_tokens > usage.output_tokens);
    }

    #[test]
    fn test_tool_url_join() {
        let runner = HttpToolRunner::new(
            Client::new(),
            Url::parse("http://backend.internal:8080/tools/").unwrap(),
        );
        assert_eq!(
            runner.tool_url("fit").unwrap().as_str(),
            "http://backend.internal:8080/tools/fit"
        );
    }
}
