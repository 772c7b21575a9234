//! Transport Client
//!
//! One completion round trip to one provider endpoint. The
//! [`CompletionClient`] trait is the only seam between the dispatch logic
//! and the network: production code uses [`HttpCompletionClient`], tests
//! swap in a scripted fake. The client is stateless; statistics live in
//! the catalog and are recorded by the dispatcher, never here.
//!
//! Provider families differ in endpoint path, auth header and response
//! envelope; [`ProviderFamily`] is a closed enum with one URL/body/content
//! mapping per variant. Adding a provider means adding a variant and its
//! three match arms, not touching any call site.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::catalog::ModelDescriptor;
use crate::error::TransportError;
use crate::validate::StructuredFormat;

/// Version header Anthropic requires on every request.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Cap on provider error text carried inside a rejection.
const REJECTION_MESSAGE_LIMIT: usize = 300;

// ============================================================================
// Call and Completion Types
// ============================================================================

/// One completion call: the prompt plus its execution constraints.
#[derive(Clone, Debug)]
pub struct CompletionCall {
    pub prompt: String,
    /// Structured-output hint forwarded to providers that support one.
    pub format: Option<StructuredFormat>,
    /// Hard deadline for the whole round trip.
    pub timeout: Duration,
}

impl CompletionCall {
    pub fn new(prompt: impl Into<String>, timeout: Duration) -> Self {
        Self {
            prompt: prompt.into(),
            format: None,
            timeout,
        }
    }

    #[must_use]
    pub fn with_format(mut self, format: StructuredFormat) -> Self {
        self.format = Some(format);
        self
    }
}

/// Raw outcome of one successful round trip.
#[derive(Clone, Debug)]
pub struct Completion {
    /// Completion text exactly as the provider returned it.
    pub content: String,
    /// Model that produced the completion.
    pub model: String,
    /// Wall-clock duration of the round trip.
    pub latency: Duration,
    /// Total token usage when the provider reports it.
    pub tokens_used: Option<u32>,
}

/// The network seam of the dispatch core.
///
/// Implementations perform exactly one round trip per invocation, respect
/// `call.timeout` exactly (cancelling the in-flight request when it
/// elapses), and keep no per-call state.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        model: &ModelDescriptor,
        call: &CompletionCall,
    ) -> Result<Completion, TransportError>;
}

// ============================================================================
// Provider Families
// ============================================================================

/// Wire protocol family of a provider endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderFamily {
    /// OpenAI-style chat completions (OpenAI, OpenRouter, Groq, ...).
    OpenAi,
    /// Anthropic messages API.
    Anthropic,
    /// Local Ollama daemon.
    Ollama,
}

impl ProviderFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Ollama => "ollama",
        }
    }
}

impl fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved endpoint for one configured provider.
#[derive(Clone)]
pub struct ProviderEndpoint {
    pub family: ProviderFamily,
    pub base_url: String,
    pub api_key: Option<String>,
}

impl ProviderEndpoint {
    pub fn new(family: ProviderFamily, base_url: impl Into<String>) -> Self {
        Self {
            family,
            base_url: base_url.into(),
            api_key: None,
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

impl fmt::Debug for ProviderEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderEndpoint")
            .field("family", &self.family)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// ============================================================================
// HTTP Client
// ============================================================================

/// Production [`CompletionClient`] over a pooled `reqwest` client.
///
/// Per-call timeouts are enforced by `reqwest`'s request timeout, which
/// tears down the connection when the deadline elapses rather than leaving
/// it in flight.
pub struct HttpCompletionClient {
    client: reqwest::Client,
    providers: HashMap<String, ProviderEndpoint>,
}

impl HttpCompletionClient {
    pub fn new(providers: HashMap<String, ProviderEndpoint>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()
                .expect("Failed to create HTTP client"),
            providers,
        }
    }

    /// Build endpoints from configuration, resolving API keys from the
    /// environment variables named by `api_key_env`. Keys never come from
    /// the config document itself.
    pub fn from_config(config: &crate::config::RelayConfig) -> Self {
        let mut providers = HashMap::new();
        for provider in &config.providers {
            let mut endpoint = ProviderEndpoint::new(provider.family, provider.base_url.clone());
            if let Some(var) = &provider.api_key_env {
                match std::env::var(var) {
                    Ok(key) if !key.is_empty() => endpoint = endpoint.with_api_key(key),
                    _ => warn!(
                        provider = %provider.name,
                        env_var = %var,
                        "API key environment variable unset; requests will go out unauthenticated"
                    ),
                }
            }
            providers.insert(provider.name.clone(), endpoint);
        }
        Self::new(providers)
    }

    fn endpoint_for(&self, provider: &str) -> Result<&ProviderEndpoint, TransportError> {
        self.providers
            .get(provider)
            .ok_or_else(|| TransportError::UnknownProvider(provider.to_string()))
    }

    fn apply_auth(
        &self,
        request: reqwest::RequestBuilder,
        endpoint: &ProviderEndpoint,
    ) -> reqwest::RequestBuilder {
        match (endpoint.family, &endpoint.api_key) {
            (ProviderFamily::OpenAi, Some(key)) => {
                request.header("Authorization", format!("Bearer {key}"))
            }
            (ProviderFamily::Anthropic, Some(key)) => request
                .header("x-api-key", key.clone())
                .header("anthropic-version", ANTHROPIC_VERSION),
            (ProviderFamily::Anthropic, None) => {
                request.header("anthropic-version", ANTHROPIC_VERSION)
            }
            _ => request,
        }
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(
        &self,
        model: &ModelDescriptor,
        call: &CompletionCall,
    ) -> Result<Completion, TransportError> {
        let endpoint = self.endpoint_for(&model.provider)?;
        let url = request_url(endpoint.family, &endpoint.base_url);
        let body = request_body(endpoint.family, model, call);

        debug!(
            model = %model.name,
            provider = %model.provider,
            timeout = ?call.timeout,
            "sending completion request"
        );

        let started = Instant::now();
        let request = self
            .client
            .post(&url)
            .timeout(call.timeout)
            .json(&body);
        let response = self
            .apply_auth(request, endpoint)
            .send()
            .await
            .map_err(|e| classify(e, call.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            return Err(rejection(status, text, retry_after));
        }

        let text = response
            .text()
            .await
            .map_err(|e| classify(e, call.timeout))?;
        let payload: Value = serde_json::from_str(&text).map_err(|_| {
            TransportError::ProviderRejected {
                status: status.as_u16(),
                message: "malformed response envelope".to_string(),
            }
        })?;

        let content =
            extract_content(endpoint.family, &payload).ok_or_else(|| {
                TransportError::ProviderRejected {
                    status: status.as_u16(),
                    message: "response missing completion content".to_string(),
                }
            })?;

        Ok(Completion {
            content,
            model: model.name.clone(),
            latency: started.elapsed(),
            tokens_used: extract_usage(endpoint.family, &payload),
        })
    }
}

// ============================================================================
// Wire Mapping
// ============================================================================

fn request_url(family: ProviderFamily, base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    match family {
        ProviderFamily::OpenAi => format!("{base}/chat/completions"),
        ProviderFamily::Anthropic => format!("{base}/v1/messages"),
        ProviderFamily::Ollama => format!("{base}/api/generate"),
    }
}

fn request_body(family: ProviderFamily, model: &ModelDescriptor, call: &CompletionCall) -> Value {
    match family {
        ProviderFamily::OpenAi => {
            let mut body = json!({
                "model": model.name,
                "messages": [{"role": "user", "content": call.prompt}],
                "max_tokens": model.max_tokens,
                "temperature": model.temperature,
            });
            if call.format == Some(StructuredFormat::Json) {
                body["response_format"] = json!({"type": "json_object"});
            }
            body
        }
        ProviderFamily::Anthropic => json!({
            "model": model.name,
            "messages": [{"role": "user", "content": call.prompt}],
            "max_tokens": model.max_tokens,
            "temperature": model.temperature,
        }),
        ProviderFamily::Ollama => {
            let mut body = json!({
                "model": model.name,
                "prompt": call.prompt,
                "stream": false,
                "options": {
                    "temperature": model.temperature,
                    "num_predict": model.max_tokens,
                },
            });
            if call.format == Some(StructuredFormat::Json) {
                body["format"] = json!("json");
            }
            body
        }
    }
}

fn extract_content(family: ProviderFamily, payload: &Value) -> Option<String> {
    let content = match family {
        ProviderFamily::OpenAi => payload
            .get("choices")?
            .get(0)?
            .get("message")?
            .get("content")?
            .as_str()?,
        ProviderFamily::Anthropic => payload.get("content")?.get(0)?.get("text")?.as_str()?,
        ProviderFamily::Ollama => payload.get("response")?.as_str()?,
    };
    Some(content.to_string())
}

fn extract_usage(family: ProviderFamily, payload: &Value) -> Option<u32> {
    let total = match family {
        ProviderFamily::OpenAi => payload.get("usage")?.get("total_tokens")?.as_u64()?,
        ProviderFamily::Anthropic => {
            let usage = payload.get("usage")?;
            usage.get("input_tokens")?.as_u64()? + usage.get("output_tokens")?.as_u64()?
        }
        ProviderFamily::Ollama => payload.get("eval_count")?.as_u64()?,
    };
    Some(total as u32)
}

fn classify(error: reqwest::Error, timeout: Duration) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout { timeout }
    } else {
        TransportError::Network(error.to_string())
    }
}

fn rejection(status: StatusCode, body: String, retry_after: Option<Duration>) -> TransportError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        TransportError::RateLimited { retry_after }
    } else {
        TransportError::ProviderRejected {
            status: status.as_u16(),
            message: condense(&body),
        }
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn condense(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= REJECTION_MESSAGE_LIMIT {
        trimmed.to_string()
    } else {
        let mut out: String = trimmed.chars().take(REJECTION_MESSAGE_LIMIT).collect();
        out.push_str("...");
        out
    }
}
