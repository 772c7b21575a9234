//! Relay Core - Resilient Multi-Provider Model Dispatch
//!
//! This crate routes text-generation requests across a configured pool of
//! LLM backends so that the embedding application never deals with a
//! single provider's outages, rate limits, or malformed output. It is
//! pure dispatch logic: no HTTP server, no prompt templating, no UI.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Embedding Application                       │
//! │            (task runner, agent loop, batch pipeline)             │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │ GenerationRequest
//!                                 │ ModelResponse / AllModelsFailed
//! ┌───────────────────────────────┼──────────────────────────────────┐
//! │                          RELAY CORE                              │
//! │  ┌────────────────────────────┴───────────────────────────────┐  │
//! │  │                         Dispatcher                          │  │
//! │  │   fallback chain  ·  parallel best-of-two  ·  evaluator     │  │
//! │  └───────┬──────────────────────┬──────────────────┬──────────┘  │
//! │  ┌───────┴────────┐   ┌─────────┴─────────┐   ┌────┴──────────┐  │
//! │  │  ModelCatalog  │   │     Transport     │   │    Health     │  │
//! │  │  roles, stats, │   │  OpenAI-style /   │   │    Monitor    │  │
//! │  │ enabled flags  │   │ Anthropic/Ollama  │   │ probes, gates │  │
//! │  └────────────────┘   └───────────────────┘   └───────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Dispatcher`]: entry point; turns one request into one response
//! - [`GenerationRequest`]: prompt plus dispatch options (structured
//!   output, fastest-first ordering, parallel mode, timeout override)
//! - [`ModelCatalog`]: shared registry of models, roles, and statistics
//! - [`CompletionClient`]: the transport seam; [`HttpCompletionClient`]
//!   is the production implementation
//! - [`ResponseEvaluator`]: judge-model scoring for the parallel race
//! - [`HealthMonitor`]: background probes that disable and re-enable
//!   models in the catalog
//! - [`RelayConfig`]: TOML configuration with environment overrides
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use relay_core::{
//!     CompletionClient, DispatchConfig, Dispatcher, GenerationRequest,
//!     HealthMonitor, HttpCompletionClient, ModelCatalog, RelayConfig,
//!     ResponseEvaluator,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Configuration: file, then environment overrides, then validation
//!     let config = RelayConfig::load(None)?;
//!
//!     // Shared registry and HTTP transport
//!     let catalog = Arc::new(ModelCatalog::from_descriptors(config.descriptors()));
//!     let transport: Arc<dyn CompletionClient> =
//!         Arc::new(HttpCompletionClient::from_config(&config));
//!
//!     // Dispatcher, with the best-of-two evaluator when one is configured
//!     let mut dispatcher = Dispatcher::new(
//!         Arc::clone(&catalog),
//!         Arc::clone(&transport),
//!         DispatchConfig::from_config(&config),
//!     );
//!     if let Some(name) = &config.parallel.evaluator_model {
//!         if let Some(judge) = config.descriptor_for(name) {
//!             let evaluator =
//!                 ResponseEvaluator::new(Arc::clone(&transport), judge, config.timeout());
//!             dispatcher = dispatcher.with_evaluator(evaluator);
//!         }
//!     }
//!
//!     // Background health probes keep the catalog honest
//!     let monitor = Arc::new(HealthMonitor::new(
//!         Arc::clone(&catalog),
//!         Arc::clone(&transport),
//!         config.health,
//!     ));
//!     tokio::spawn(Arc::clone(&monitor).run());
//!
//!     // One request through the fallback chain
//!     let request = GenerationRequest::new("Summarize the build log").with_json_output();
//!     let response = dispatcher.generate(&request).await?;
//!     println!("{}: {}", response.model_name, response.content);
//!
//!     monitor.stop();
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`catalog`]: model registry with roles, statistics, and enable flags
//! - [`config`]: TOML configuration, environment overrides, validation
//! - [`dispatch`]: fallback chain and parallel best-of-two strategies
//! - [`error`]: failure taxonomy and the terminal dispatch error
//! - [`evaluate`]: judge-model scoring of parallel candidates
//! - [`health`]: periodic probes, failure debouncing, model gating
//! - [`transport`]: provider-family HTTP client behind one trait
//! - [`validate`]: structured-output contract checking and extraction
//!
//! # No Application Dependencies
//!
//! This crate knows nothing about what the prompts mean. It can sit under
//! an agent loop, a batch pipeline, or a one-shot CLI unchanged.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod evaluate;
pub mod health;
pub mod transport;
pub mod validate;

#[cfg(test)]
pub(crate) mod test_support;

// Catalog exports
pub use catalog::{ModelCatalog, ModelDescriptor, ModelEntry, ModelRole, ModelSnapshot, ModelStats};

// Config exports
pub use config::{
    ConfigError, ModelSettings, ParallelConfig, ProviderConfig, RelayConfig, RoleAssignments,
};

// Dispatch exports
pub use dispatch::{DispatchConfig, Dispatcher, GenerationRequest, ModelResponse};

// Error exports
pub use error::{Attempt, DispatchError, ErrorKind, TransportError};

// Evaluator exports
pub use evaluate::{parse_score, ResponseEvaluator, NEUTRAL_SCORE};

// Health exports
pub use health::{HealthConfig, HealthMonitor};

// Transport exports
pub use transport::{
    Completion, CompletionCall, CompletionClient, HttpCompletionClient, ProviderEndpoint,
    ProviderFamily,
};

// Validation exports
pub use validate::{validate_and_extract, StructuredFormat};
