/// Built-in action dispatcher
///
/// Default `ActionDispatcher` implementation backing Execute nodes when no
/// external dispatcher is wired in. Ships three actions:
/// - echo: returns its "text" parameter (smoke tests, context plumbing)
/// - log: writes its parameters to the tracing log
/// - http_request: outbound HTTP call with method/url/body parameters
///
/// Unknown action types come back as failed outcomes, not hard errors, so
/// the owning node fails while the run keeps walking.

use crate::runtime::dispatch::{ActionDispatcher, ActionOutcome, ActionParameter};
use anyhow::Result;
use async_trait::async_trait;

/// Dispatcher for the built-in action catalog.
pub struct BuiltinActionDispatcher {
    client: reqwest::Client,
}

impl BuiltinActionDispatcher {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }

    fn parameter<'a>(parameters: &'a [ActionParameter], name: &str) -> Option<&'a str> {
        parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }

    /// Outbound HTTP request with status-aware success flag.
    ///
    /// Parameters: url (required), method (default GET), body (optional,
    /// sent for POST/PUT/PATCH), content_type (default application/json
    /// when a body is present).
    async fn http_request(&self, parameters: &[ActionParameter]) -> ActionOutcome {
        let Some(url) = Self::parameter(parameters, "url") else {
            return ActionOutcome::err("http_request requires a 'url' parameter");
        };
        let method = Self::parameter(parameters, "method").unwrap_or("GET");

        tracing::debug!("🌐 HTTP request: {} {}", method, url);

        let mut request = match method.to_uppercase().as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "DELETE" => self.client.delete(url),
            "PATCH" => self.client.patch(url),
            other => {
                return ActionOutcome::err(format!("unsupported HTTP method: {}", other));
            }
        };

        if let Some(body) = Self::parameter(parameters, "body") {
            if matches!(method.to_uppercase().as_str(), "POST" | "PUT" | "PATCH") {
                let content_type =
                    Self::parameter(parameters, "content_type").unwrap_or("application/json");
                request = request
                    .header("Content-Type", content_type)
                    .body(body.to_string());
            }
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return ActionOutcome::err(format!("HTTP request failed: {}", e)),
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        tracing::debug!("📡 HTTP response: {} ({} bytes)", status, body.len());

        if status.is_success() {
            ActionOutcome::ok(body)
        } else {
            ActionOutcome {
                success: false,
                result_text: body,
                error: Some(format!("HTTP status {}", status.as_u16())),
            }
        }
    }
}

impl Default for BuiltinActionDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionDispatcher for BuiltinActionDispatcher {
    async fn invoke(
        &self,
        action_type: &str,
        parameters: &[ActionParameter],
    ) -> Result<ActionOutcome> {
        let outcome = match action_type {
            "echo" => {
                let text = Self::parameter(parameters, "text").unwrap_or_default();
                ActionOutcome::ok(text)
            }
            "log" => {
                for parameter in parameters {
                    tracing::info!("📝 [{}] {}", parameter.name, parameter.value);
                }
                ActionOutcome::ok(format!("logged {} parameters", parameters.len()))
            }
            "http_request" => self.http_request(parameters).await,
            other => ActionOutcome::err(format!("unknown action type: {}", other)),
        };
        Ok(outcome)
    }
}
