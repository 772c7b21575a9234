//! Health Monitor
//!
//! Background probing of every registered model, independent of request
//! traffic. Each model is a two-state machine, healthy or unhealthy:
//! a configurable number of consecutive failed probes disables it, a
//! single successful probe re-enables it. Transitions go through the
//! catalog's `set_enabled`, the same registry the dispatcher reads, so
//! routing decisions follow health automatically.
//!
//! The monitor never touches catalog internals and never holds a lock
//! across a probe; disabled models keep getting probed so they can come
//! back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::catalog::{ModelCatalog, ModelEntry};
use crate::transport::{CompletionCall, CompletionClient};

/// Minimal completion used to test availability.
const PROBE_PROMPT: &str = "ping";
const PROBE_MAX_TOKENS: u32 = 8;

// ============================================================================
// Configuration
// ============================================================================

/// Probe loop settings. Mirrors the `[health]` config section.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Seconds between probe sweeps.
    pub probe_interval_secs: u64,
    /// Deadline for a single probe call, in seconds.
    pub probe_timeout_secs: u64,
    /// Consecutive failed probes before a model is disabled.
    pub failure_threshold: u32,
    /// Master switch for the background loop.
    pub enabled: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: 300,
            probe_timeout_secs: 10,
            failure_threshold: 3,
            enabled: true,
        }
    }
}

impl HealthConfig {
    /// Short intervals and a low threshold for tests.
    pub fn for_testing() -> Self {
        Self {
            probe_interval_secs: 1,
            probe_timeout_secs: 1,
            failure_threshold: 2,
            enabled: true,
        }
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

// ============================================================================
// Monitor
// ============================================================================

/// Periodic prober for every model in the catalog.
pub struct HealthMonitor {
    catalog: Arc<ModelCatalog>,
    transport: Arc<dyn CompletionClient>,
    config: HealthConfig,
    /// Consecutive failed probes per model name.
    failures: DashMap<String, u32>,
    stopped: AtomicBool,
}

impl HealthMonitor {
    pub fn new(
        catalog: Arc<ModelCatalog>,
        transport: Arc<dyn CompletionClient>,
        config: HealthConfig,
    ) -> Self {
        Self {
            catalog,
            transport,
            config,
            failures: DashMap::new(),
            stopped: AtomicBool::new(false),
        }
    }

    /// Ask the probe loop to exit after its current tick.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Probe loop. Runs until [`stop`](Self::stop) is called; ticks that
    /// fall behind are skipped rather than bunched.
    pub async fn run(self: Arc<Self>) {
        if !self.config.enabled {
            debug!("health monitor disabled by config");
            return;
        }
        info!(
            interval_secs = self.config.probe_interval_secs,
            failure_threshold = self.config.failure_threshold,
            "health monitor started"
        );

        let mut interval = tokio::time::interval(self.config.probe_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            if self.is_stopped() {
                break;
            }
            self.sweep().await;
        }
        debug!("health monitor stopped");
    }

    /// One probe pass over every registered model, disabled ones included.
    /// Probes run concurrently; the pass completes when the last probe
    /// resolves or times out.
    pub async fn sweep(&self) {
        let entries = self.catalog.entries();
        if entries.is_empty() {
            return;
        }
        debug!(models = entries.len(), "running health sweep");
        join_all(entries.iter().map(|entry| self.probe(entry))).await;
    }

    async fn probe(&self, entry: &Arc<ModelEntry>) {
        let name = entry.name().to_string();
        let mut descriptor = entry.descriptor().clone();
        descriptor.max_tokens = PROBE_MAX_TOKENS;
        let call = CompletionCall::new(PROBE_PROMPT, self.config.probe_timeout());

        let started = Instant::now();
        match self.transport.complete(&descriptor, &call).await {
            Ok(completion) => {
                self.catalog.record_outcome(&name, true, completion.latency);
                self.failures.remove(&name);
                if !entry.is_enabled() && self.catalog.set_enabled(&name, true) {
                    info!(model = %name, "model re-enabled after successful probe");
                }
            }
            Err(err) => {
                self.catalog.record_outcome(&name, false, started.elapsed());
                let consecutive = {
                    let mut counter = self.failures.entry(name.clone()).or_insert(0);
                    *counter += 1;
                    *counter
                };
                if consecutive >= self.config.failure_threshold
                    && entry.is_enabled()
                    && self.catalog.set_enabled(&name, false)
                {
                    warn!(
                        model = %name,
                        consecutive,
                        error = %err,
                        "disabling model after consecutive failed probes"
                    );
                } else {
                    debug!(model = %name, consecutive, error = %err, "health probe failed");
                }
            }
        }
    }
}
