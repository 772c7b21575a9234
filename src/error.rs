//! Error Taxonomy
//!
//! Every failure in the dispatch core is classified into a small closed set
//! of kinds. Transport-level failures carry their own typed error which maps
//! into the taxonomy via [`TransportError::kind`]; the only error a caller
//! of the dispatcher ever sees is [`DispatchError::AllModelsFailed`], which
//! carries the attempted models and their last failure kinds for diagnosis.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

// ============================================================================
// Failure Kinds
// ============================================================================

/// Classified cause of one failed model attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connection, DNS, or body-transfer failure before a response arrived.
    Network,
    /// The per-call deadline elapsed and the call was cancelled.
    Timeout,
    /// The provider reported throttling (HTTP 429).
    RateLimited,
    /// The provider answered with a non-2xx application error or a
    /// malformed response envelope.
    ProviderRejected,
    /// The response arrived but violated the structured-output contract.
    InvalidOutput,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate-limited",
            Self::ProviderRejected => "provider-rejected",
            Self::InvalidOutput => "invalid-output",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Transport Errors
// ============================================================================

/// Failure of a single transport round trip.
///
/// Produced only by [`CompletionClient`](crate::transport::CompletionClient)
/// implementations. The dispatcher never surfaces these directly; it records
/// the [`kind`](TransportError::kind) and moves on to the next candidate.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Connection could not be established or broke mid-transfer.
    #[error("connection failed: {0}")]
    Network(String),

    /// The call exceeded its deadline and was torn down.
    #[error("request timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// Provider-reported throttling, with the advertised retry delay when
    /// the response carried one.
    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    /// Non-2xx application error from the provider.
    #[error("provider rejected request ({status}): {message}")]
    ProviderRejected { status: u16, message: String },

    /// No endpoint is configured for the model's provider name.
    #[error("no provider configured for '{0}'")]
    UnknownProvider(String),
}

impl TransportError {
    /// Map this failure into the dispatch taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::ProviderRejected { .. } => ErrorKind::ProviderRejected,
            Self::UnknownProvider(_) => ErrorKind::ProviderRejected,
        }
    }
}

// ============================================================================
// Dispatch Errors
// ============================================================================

/// One failed candidate within an exhausted dispatch, kept for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attempt {
    pub model: String,
    pub error: ErrorKind,
}

impl Attempt {
    pub fn new(model: impl Into<String>, error: ErrorKind) -> Self {
        Self {
            model: model.into(),
            error,
        }
    }
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.model, self.error)
    }
}

/// Terminal dispatch failure. The only error surfaced to callers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchError {
    /// Every eligible model was attempted and none produced a usable
    /// response. Carries each attempted model with its last failure kind.
    AllModelsFailed { attempts: Vec<Attempt> },
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllModelsFailed { attempts } => {
                if attempts.is_empty() {
                    write!(f, "all models failed: no eligible models")
                } else {
                    let detail = attempts
                        .iter()
                        .map(|a| a.to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    write!(f, "all models failed after {} attempt(s): {}", attempts.len(), detail)
                }
            }
        }
    }
}

impl std::error::Error for DispatchError {}
