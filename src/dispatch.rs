//! Dispatcher
//!
//! The strategy engine tying the core together. A request either walks the
//! fallback chain (every enabled model, tier by tier, stopping at the first
//! valid response) or races the configured parallel pair and lets the
//! evaluator pick between two valid outputs. All per-model failures are
//! recovered here; the caller sees exactly one error shape, "all models
//! failed", and otherwise a single response.
//!
//! ```text
//!                    ┌────────────────────────────────────┐
//!                    │             Dispatcher             │
//!    request ───────▶│  use_parallel?                     │
//!                    │   ├─ no ──▶ fallback chain         │
//!                    │   │         Primary → Duplicate →  │
//!                    │   │         Reserve → Fallback     │
//!                    │   └─ yes ─▶ race fixed pair        │
//!                    │             ├─ 0 valid → chain     │
//!                    │             ├─ 1 valid → return    │
//!                    │             └─ 2 valid → evaluator │
//!                    └────────────────────────────────────┘
//! ```
//!
//! Each attempt records exactly one outcome in the catalog, so the health
//! statistics stay honest no matter which strategy ran.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, warn};

use crate::catalog::{ModelCatalog, ModelEntry, ModelRole};
use crate::error::{Attempt, DispatchError, ErrorKind};
use crate::evaluate::ResponseEvaluator;
use crate::transport::{CompletionCall, CompletionClient};
use crate::validate::{validate_and_extract, StructuredFormat};

/// Ceiling for exponential retry backoff.
const MAX_BACKOFF_MS: u64 = 10_000;

// ============================================================================
// Request and Response Types
// ============================================================================

/// One unit of work submitted to the dispatcher. Immutable once built.
#[derive(Clone, Debug)]
pub struct GenerationRequest {
    /// Correlation id carried through the logs.
    pub request_id: String,
    pub prompt: String,
    /// Contract the response must satisfy, if any.
    pub structured_format: Option<StructuredFormat>,
    /// Order each tier fastest-first instead of registration order.
    pub prefer_fastest: bool,
    /// Race the configured pair instead of walking the chain.
    pub use_parallel: bool,
    /// Per-request override of the configured call timeout.
    pub timeout: Option<Duration>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            prompt: prompt.into(),
            structured_format: None,
            prefer_fastest: false,
            use_parallel: false,
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_json_output(mut self) -> Self {
        self.structured_format = Some(StructuredFormat::Json);
        self
    }

    #[must_use]
    pub fn fastest_first(mut self) -> Self {
        self.prefer_fastest = true;
        self
    }

    #[must_use]
    pub fn parallel(mut self) -> Self {
        self.use_parallel = true;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Outcome of one attempt against one model.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelResponse {
    pub model_name: String,
    /// Response text, already extracted when a contract applied.
    pub content: String,
    pub success: bool,
    /// Present iff `success` is false.
    pub error_kind: Option<ErrorKind>,
    pub response_time: Duration,
    /// Populated only when the evaluator ran.
    pub score: Option<f64>,
}

impl ModelResponse {
    pub fn succeeded(
        model_name: impl Into<String>,
        content: impl Into<String>,
        response_time: Duration,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            content: content.into(),
            success: true,
            error_kind: None,
            response_time,
            score: None,
        }
    }

    pub fn failed(model_name: impl Into<String>, error: ErrorKind, response_time: Duration) -> Self {
        Self {
            model_name: model_name.into(),
            content: String::new(),
            success: false,
            error_kind: Some(error),
            response_time,
            score: None,
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Runtime knobs for the dispatcher.
#[derive(Clone, Debug)]
pub struct DispatchConfig {
    /// Deadline per transport call.
    pub request_timeout: Duration,
    /// Extra transport calls allowed per candidate on transient failures.
    pub retry_attempts: u32,
    /// Base backoff between those calls; grows exponentially with jitter.
    pub retry_backoff: Duration,
    /// The fixed best-of-two pair, when configured.
    pub parallel_models: Option<(String, String)>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(120),
            retry_attempts: 1,
            retry_backoff: Duration::from_millis(200),
            parallel_models: None,
        }
    }
}

impl DispatchConfig {
    pub fn from_config(config: &crate::config::RelayConfig) -> Self {
        Self {
            request_timeout: config.timeout(),
            retry_attempts: config.retry_attempts,
            retry_backoff: Duration::from_millis(200),
            parallel_models: config
                .parallel_pair()
                .map(|(a, b)| (a.to_string(), b.to_string())),
        }
    }
}

/// Routes generation requests across the catalog.
pub struct Dispatcher {
    catalog: Arc<ModelCatalog>,
    transport: Arc<dyn CompletionClient>,
    evaluator: Option<ResponseEvaluator>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        catalog: Arc<ModelCatalog>,
        transport: Arc<dyn CompletionClient>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            catalog,
            transport,
            evaluator: None,
            config,
        }
    }

    /// Attach the best-of-two evaluator. Without one, a double-valid race
    /// falls back to the first response.
    #[must_use]
    pub fn with_evaluator(mut self, evaluator: ResponseEvaluator) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// The single entry point: produce one response or the terminal
    /// all-models-failed error.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<ModelResponse, DispatchError> {
        debug!(
            request_id = %request.request_id,
            parallel = request.use_parallel,
            prefer_fastest = request.prefer_fastest,
            structured = request.structured_format.is_some(),
            "dispatching request"
        );
        if request.use_parallel {
            self.parallel_race(request).await
        } else {
            self.fallback_chain(request).await
        }
    }

    // ------------------------------------------------------------------
    // Fallback chain
    // ------------------------------------------------------------------

    async fn fallback_chain(
        &self,
        request: &GenerationRequest,
    ) -> Result<ModelResponse, DispatchError> {
        let mut attempts: Vec<Attempt> = Vec::new();

        for role in ModelRole::ORDERED {
            let tier = if request.prefer_fastest {
                self.catalog.select_by_role_fastest(role)
            } else {
                self.catalog.select_by_role(role)
            };

            for entry in tier {
                let response = self.attempt(&entry, request).await;
                if response.success {
                    debug!(
                        request_id = %request.request_id,
                        model = %response.model_name,
                        role = %role,
                        "request served"
                    );
                    return Ok(response);
                }
                let kind = response.error_kind.unwrap_or(ErrorKind::Network);
                attempts.push(Attempt::new(response.model_name, kind));
            }
        }

        warn!(
            request_id = %request.request_id,
            attempted = attempts.len(),
            "all eligible models failed"
        );
        Err(DispatchError::AllModelsFailed { attempts })
    }

    // ------------------------------------------------------------------
    // Parallel best-of-two
    // ------------------------------------------------------------------

    async fn parallel_race(
        &self,
        request: &GenerationRequest,
    ) -> Result<ModelResponse, DispatchError> {
        let Some((first, second)) = self.resolve_pair() else {
            debug!(
                request_id = %request.request_id,
                "parallel pair unavailable; using fallback chain"
            );
            return self.fallback_chain(request).await;
        };

        debug!(
            request_id = %request.request_id,
            first = %first.name(),
            second = %second.name(),
            "racing parallel pair"
        );
        // Both calls run to completion independently; a slow or failing
        // side never cancels the other.
        let (a, b) = tokio::join!(self.attempt(&first, request), self.attempt(&second, request));

        let mut valid: Vec<ModelResponse> = [a, b].into_iter().filter(|r| r.success).collect();
        match valid.len() {
            0 => {
                debug!(
                    request_id = %request.request_id,
                    "parallel pair produced no valid response; degrading to fallback chain"
                );
                self.fallback_chain(request).await
            }
            1 => Ok(valid.swap_remove(0)),
            _ => match &self.evaluator {
                Some(evaluator) => Ok(evaluator.select_best(&request.prompt, valid).await),
                None => {
                    warn!(
                        request_id = %request.request_id,
                        "no evaluator configured; returning first parallel response"
                    );
                    Ok(valid.swap_remove(0))
                }
            },
        }
    }

    /// Both members of the configured pair, provided they are registered
    /// and currently enabled. Anything less degrades to the chain.
    fn resolve_pair(&self) -> Option<(Arc<ModelEntry>, Arc<ModelEntry>)> {
        let (first, second) = self.config.parallel_models.as_ref()?;
        if first == second {
            return None;
        }
        let a = self.catalog.get(first)?;
        let b = self.catalog.get(second)?;
        (a.is_enabled() && b.is_enabled()).then_some((a, b))
    }

    // ------------------------------------------------------------------
    // Single attempt
    // ------------------------------------------------------------------

    /// One candidate attempt: transport call (with transient-kind retry),
    /// validation, and exactly one catalog outcome record.
    async fn attempt(&self, entry: &Arc<ModelEntry>, request: &GenerationRequest) -> ModelResponse {
        let descriptor = entry.descriptor();
        let timeout = request.timeout.unwrap_or(self.config.request_timeout);
        let mut call = CompletionCall::new(request.prompt.clone(), timeout);
        if let Some(format) = request.structured_format {
            call = call.with_format(format);
        }

        let started = Instant::now();
        let mut retries = 0u32;
        let outcome = loop {
            match self.transport.complete(descriptor, &call).await {
                Ok(completion) => break Ok(completion),
                Err(err) => {
                    let transient =
                        matches!(err.kind(), ErrorKind::Network | ErrorKind::RateLimited);
                    if transient && retries < self.config.retry_attempts {
                        retries += 1;
                        let backoff = retry_backoff(self.config.retry_backoff, retries);
                        debug!(
                            model = %descriptor.name,
                            retry = retries,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %err,
                            "retrying transient transport failure"
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    break Err(err);
                }
            }
        };

        match outcome {
            Ok(completion) => {
                match validate_and_extract(&completion.content, request.structured_format) {
                    Some(payload) => {
                        self.catalog
                            .record_outcome(&descriptor.name, true, completion.latency);
                        ModelResponse::succeeded(descriptor.name.clone(), payload, completion.latency)
                    }
                    None => {
                        let elapsed = started.elapsed();
                        self.catalog.record_outcome(&descriptor.name, false, elapsed);
                        debug!(
                            model = %descriptor.name,
                            "output failed structured-output validation"
                        );
                        ModelResponse::failed(
                            descriptor.name.clone(),
                            ErrorKind::InvalidOutput,
                            elapsed,
                        )
                    }
                }
            }
            Err(err) => {
                let elapsed = started.elapsed();
                self.catalog.record_outcome(&descriptor.name, false, elapsed);
                debug!(model = %descriptor.name, error = %err, "model attempt failed");
                ModelResponse::failed(descriptor.name.clone(), err.kind(), elapsed)
            }
        }
    }
}

/// Exponential backoff with up to 25% jitter, capped.
fn retry_backoff(base: Duration, retry: u32) -> Duration {
    let exp = (base.as_millis() as u64).saturating_mul(2u64.saturating_pow(retry.saturating_sub(1)));
    let capped = exp.min(MAX_BACKOFF_MS);
    let jitter = rand::thread_rng().gen_range(0..=capped / 4);
    Duration::from_millis(capped + jitter)
}
