//! Model provider client.
//!
//! [`ModelClient`] is the seam between report generation and the HTTP call to the provider.
//! [`OpenAiClient`] is the production implementation; tests substitute a scripted client.
//! [`call_with_retry`] owns the retry policy: HTTP 429 is retried with exponential backoff and
//! jitter, credential and quota rejections fail at once, and everything else fails without retry.

use crate::documents::TokenUsage;
use crate::{IntakeError, IntakeResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// One role-tagged prompt turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptTurn {
    pub role: &'static str,
    pub content: String,
}

impl PromptTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

/// JSON body POSTed to the provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelRequest {
    pub model: String,
    pub input: Vec<PromptTurn>,
    pub max_output_tokens: u32,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,
}

/// Why a single attempt failed.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptFailure {
    /// Non-2xx response, with the provider's error code and message when it sent them.
    Status {
        status: u16,
        code: Option<String>,
        message: Option<String>,
    },
    /// The request never produced a response (connect error, timeout).
    Transport(String),
    /// A 2xx response whose body was not JSON.
    InvalidBody(String),
}

pub type ModelFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, AttemptFailure>> + Send + 'a>>;

pub trait ModelClient: Send + Sync {
    /// Whether credentials are present. An unconfigured client is never called.
    fn is_configured(&self) -> bool;

    /// Make one attempt, returning the decoded JSON body of a 2xx response.
    fn send<'a>(&'a self, request: &'a ModelRequest) -> ModelFuture<'a>;
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    code: Option<String>,
    message: Option<String>,
}

/// Client for an OpenAI-compatible responses endpoint.
pub struct OpenAiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl OpenAiClient {
    /// Build a client with a per-request `timeout`.
    ///
    /// A missing or blank `api_key` yields an unconfigured client.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> IntakeResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(IntakeError::HttpClient)?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    async fn post(&self, request: &ModelRequest) -> Result<Value, AttemptFailure> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(AttemptFailure::Transport("API key not configured".into()));
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| AttemptFailure::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<Value>()
                .await
                .map_err(|e| AttemptFailure::InvalidBody(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ErrorEnvelope>(&body)
            .ok()
            .and_then(|e| e.error);
        let (code, message) = match detail {
            Some(d) => (d.code, d.message),
            None => (None, None),
        };
        tracing::error!(
            status = status.as_u16(),
            code = code.as_deref().unwrap_or(""),
            message = message.as_deref().unwrap_or(&body),
            "model provider returned an error"
        );
        Err(AttemptFailure::Status {
            status: status.as_u16(),
            code,
            message,
        })
    }
}

impl ModelClient for OpenAiClient {
    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn send<'a>(&'a self, request: &'a ModelRequest) -> ModelFuture<'a> {
        Box::pin(self.post(request))
    }
}

/// Backoff settings for rate-limited attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1`: `base * 2^attempt` plus random jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..jitter_ms)
        };
        exp.saturating_add(Duration::from_millis(jitter))
    }
}

/// Call the model, retrying rate-limited attempts according to `policy`.
///
/// At most `policy.max_retries + 1` attempts are made.
///
/// # Errors
///
/// - `UpstreamQuotaExceeded` for an `insufficient_quota` code.
/// - `UpstreamInvalidCredentials` for HTTP 401 or an `invalid_api_key` code.
/// - `RateLimited` when every attempt was answered with HTTP 429.
/// - `UpstreamFailed` for any other non-2xx status.
/// - `UpstreamTransport` or `MalformedResponse` when no usable response arrived.
pub async fn call_with_retry(
    client: &dyn ModelClient,
    request: &ModelRequest,
    policy: &RetryPolicy,
) -> IntakeResult<Value> {
    let mut attempt: u32 = 0;
    loop {
        let failure = match client.send(request).await {
            Ok(body) => return Ok(body),
            Err(failure) => failure,
        };

        match failure {
            AttemptFailure::Status { code, .. } if code.as_deref() == Some("insufficient_quota") => {
                return Err(IntakeError::UpstreamQuotaExceeded);
            }
            AttemptFailure::Status { status, code, .. }
                if status == 401 || code.as_deref() == Some("invalid_api_key") =>
            {
                return Err(IntakeError::UpstreamInvalidCredentials);
            }
            AttemptFailure::Status { status: 429, .. } => {
                if attempt >= policy.max_retries {
                    return Err(IntakeError::RateLimited {
                        attempts: attempt + 1,
                    });
                }
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "model provider rate limited, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            AttemptFailure::Status { status, .. } => {
                return Err(IntakeError::UpstreamFailed { status });
            }
            AttemptFailure::Transport(reason) => {
                return Err(IntakeError::UpstreamTransport(reason));
            }
            AttemptFailure::InvalidBody(reason) => {
                return Err(IntakeError::MalformedResponse(reason));
            }
        }
    }
}

/// Text output of a response, from whichever shape the provider used.
///
/// Tries `output_text`, then `output[].content[].text`, then `choices[].message.content`
/// (string or parts). Whitespace-only text counts as empty.
pub fn extract_text(body: &Value) -> Option<String> {
    fn parts_text(parts: &[Value]) -> String {
        parts
            .iter()
            .map(|p| p.get("text").and_then(Value::as_str).unwrap_or(""))
            .collect::<Vec<_>>()
            .join("\n")
    }

    let non_empty = |s: String| (!s.trim().is_empty()).then_some(s);

    if let Some(text) = body
        .get("output_text")
        .and_then(Value::as_str)
        .and_then(|s| non_empty(s.to_owned()))
    {
        return Some(text);
    }

    if let Some(items) = body.get("output").and_then(Value::as_array) {
        let text = items
            .iter()
            .map(|item| {
                item.get("content")
                    .and_then(Value::as_array)
                    .map(|c| parts_text(c))
                    .unwrap_or_default()
            })
            .collect::<Vec<_>>()
            .join("\n");
        if let Some(text) = non_empty(text) {
            return Some(text);
        }
    }

    if let Some(choices) = body.get("choices").and_then(Value::as_array) {
        let text = choices
            .iter()
            .map(|choice| match choice.pointer("/message/content") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Array(parts)) => parts_text(parts),
                _ => String::new(),
            })
            .collect::<Vec<_>>()
            .join("\n");
        if let Some(text) = non_empty(text) {
            return Some(text);
        }
    }

    None
}

/// Token usage, accepting both `prompt_/completion_tokens` and `input_/output_tokens`.
///
/// The total is derived when the provider omits it but reports both halves.
pub fn extract_usage(body: &Value) -> Option<TokenUsage> {
    let usage = body.get("usage").filter(|u| u.is_object())?;
    let count = |a: &str, b: &str| {
        usage
            .get(a)
            .and_then(Value::as_u64)
            .or_else(|| usage.get(b).and_then(Value::as_u64))
    };
    let input_tokens = count("prompt_tokens", "input_tokens");
    let output_tokens = count("completion_tokens", "output_tokens");
    let total_tokens = usage
        .get("total_tokens")
        .and_then(Value::as_u64)
        .or_else(|| Some(input_tokens? + output_tokens?));
    Some(TokenUsage {
        input_tokens,
        output_tokens,
        total_tokens,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Replays a fixed sequence of attempt results and counts calls.
    pub(crate) struct ScriptedClient {
        configured: bool,
        replies: Mutex<VecDeque<Result<Value, AttemptFailure>>>,
        calls: AtomicU32,
        last_request: Mutex<Option<ModelRequest>>,
    }

    impl ScriptedClient {
        pub(crate) fn new(replies: Vec<Result<Value, AttemptFailure>>) -> Self {
            Self {
                configured: true,
                replies: Mutex::new(replies.into()),
                calls: AtomicU32::new(0),
                last_request: Mutex::new(None),
            }
        }

        pub(crate) fn unconfigured() -> Self {
            Self {
                configured: false,
                ..Self::new(Vec::new())
            }
        }

        pub(crate) fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        pub(crate) fn last_request(&self) -> Option<ModelRequest> {
            self.last_request.lock().unwrap().clone()
        }
    }

    pub(crate) fn status(status: u16, code: Option<&str>) -> Result<Value, AttemptFailure> {
        Err(AttemptFailure::Status {
            status,
            code: code.map(str::to_owned),
            message: None,
        })
    }

    impl ModelClient for ScriptedClient {
        fn is_configured(&self) -> bool {
            self.configured
        }

        fn send<'a>(&'a self, request: &'a ModelRequest) -> ModelFuture<'a> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request.clone());
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AttemptFailure::Transport("script exhausted".into())));
            Box::pin(async move { reply })
        }
    }
}
