//! HTTP transport: posts turns and metadata as JSON to a chat endpoint.
//!
//! Request body: `{"messages": [{role, content}], "mode": ..., ...metadata}`.
//! Success body: `{"reply": "..."}` or `{"content": "..."}`; a plain-text
//! body is accepted as the reply. HTTP 402, `quotaExceeded: true` or
//! `code: "quota_exceeded"` are reported as quota exhaustion.
//!
//! The endpoint is an app-side proxy that needs the workflow metadata next
//! to the turns and answers with plain reply text, so this posts directly
//! with reqwest rather than going through a provider client like rig.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{ConfigError, TransportError};

use super::{ChatTurn, GenerationRequest, GenerationTransport, RequestMetadata};

const TRANSPORT_NAME: &str = "http";

/// Connection settings for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub endpoint: String,
    pub api_key: Option<SecretString>,
    pub timeout: Duration,
}

impl TransportConfig {
    /// Read `GUIDED_CHAT_ENDPOINT` (required) and `GUIDED_CHAT_API_KEY`.
    pub fn from_env(timeout: Duration) -> Result<Self, ConfigError> {
        let endpoint = std::env::var("GUIDED_CHAT_ENDPOINT")
            .map_err(|_| ConfigError::MissingEnvVar("GUIDED_CHAT_ENDPOINT".to_string()))?;
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                key: "GUIDED_CHAT_ENDPOINT".to_string(),
                message: format!("expected an http(s) URL, got {endpoint}"),
            });
        }
        let api_key = std::env::var("GUIDED_CHAT_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from);
        Ok(Self {
            endpoint,
            api_key,
            timeout,
        })
    }
}

#[derive(Serialize)]
struct RequestBody<'a> {
    messages: &'a [ChatTurn],
    #[serde(flatten)]
    metadata: &'a RequestMetadata,
}

/// Transport backed by `reqwest`.
pub struct HttpTransport {
    client: reqwest::Client,
    config: TransportConfig,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TransportError::RequestFailed {
                transport: TRANSPORT_NAME.to_string(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl GenerationTransport for HttpTransport {
    fn name(&self) -> &str {
        TRANSPORT_NAME
    }

    async fn generate(&self, request: GenerationRequest) -> Result<String, TransportError> {
        let body = RequestBody {
            messages: &request.turns,
            metadata: &request.metadata,
        };

        let mut builder = self.client.post(&self.config.endpoint).json(&body);
        if let Some(ref key) = self.config.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout {
                    transport: TRANSPORT_NAME.to_string(),
                    timeout: self.config.timeout,
                }
            } else {
                TransportError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        debug!(status = %status, bytes = text.len(), "Generation response received");

        interpret_response(status, &text)
    }
}

/// Map an HTTP status and body to the reply text or a classified error.
fn interpret_response(status: StatusCode, text: &str) -> Result<String, TransportError> {
    let body: Value = serde_json::from_str(text).unwrap_or(Value::Null);

    let flagged_quota = body
        .get("quotaExceeded")
        .and_then(Value::as_bool)
        .unwrap_or(false)
        || body.get("code").and_then(Value::as_str) == Some("quota_exceeded");

    if status == StatusCode::PAYMENT_REQUIRED || flagged_quota {
        return Err(TransportError::QuotaExceeded {
            message: error_message(&body).unwrap_or_else(|| format!("HTTP {status}")),
        });
    }

    if !status.is_success() {
        return Err(TransportError::RequestFailed {
            transport: TRANSPORT_NAME.to_string(),
            reason: format!(
                "HTTP {status}: {}",
                error_message(&body).unwrap_or_else(|| text.trim().to_string())
            ),
        });
    }

    if let Some(reply) = body
        .get("reply")
        .or_else(|| body.get("content"))
        .and_then(Value::as_str)
    {
        return Ok(reply.to_string());
    }

    // Non-JSON success bodies are the reply itself.
    if body.is_null() && !text.trim().is_empty() {
        return Ok(text.to_string());
    }

    Err(TransportError::InvalidResponse {
        transport: TRANSPORT_NAME.to_string(),
        reason: "response has no reply text".to_string(),
    })
}

fn error_message(body: &Value) -> Option<String> {
    match body.get("error") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(obj @ Value::Object(_)) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(String::from),
        _ => body.get("message").and_then(Value::as_str).map(String::from),
    }
}
