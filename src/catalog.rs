//! Model Catalog
//!
//! Registry of every backend model the dispatcher may route to, keyed by
//! name and tagged with a fallback-tier role. Identity and policy fields are
//! frozen at configuration load; only the enabled flag (Health Monitor) and
//! the per-model statistics (dispatcher and probe outcomes) mutate at
//! runtime, each through a single entry point. Readers always see a
//! consistent statistics snapshot; no lock is ever held across I/O.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

// ============================================================================
// Roles
// ============================================================================

/// Fallback tier of a model. Lower tiers are tried first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelRole {
    Primary,
    Duplicate,
    Reserve,
    Fallback,
}

impl ModelRole {
    /// Every role in fallback-chain order.
    pub const ORDERED: [ModelRole; 4] = [
        ModelRole::Primary,
        ModelRole::Duplicate,
        ModelRole::Reserve,
        ModelRole::Fallback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Duplicate => "duplicate",
            Self::Reserve => "reserve",
            Self::Fallback => "fallback",
        }
    }
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Descriptors and Statistics
// ============================================================================

/// Identity and generation policy for one backend model. Immutable after
/// configuration load.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Unique model name, as sent to the provider.
    pub name: String,
    /// Name of the configured provider that serves this model.
    pub provider: String,
    /// Fallback tier.
    pub role: ModelRole,
    /// Completion token budget per call.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Advertised context window, in tokens.
    pub context_window: u32,
}

/// Live counters for one model. Read and written as one unit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ModelStats {
    /// Duration of the most recent completed attempt, success or failure.
    pub last_response_time: Option<Duration>,
    pub success_count: u64,
    pub error_count: u64,
}

/// One registered model: frozen descriptor plus runtime state.
///
/// The enabled flag is a plain atomic; the statistics triple sits behind a
/// short-lived lock so `last_response_time` and the counters never tear.
pub struct ModelEntry {
    descriptor: ModelDescriptor,
    enabled: AtomicBool,
    stats: RwLock<ModelStats>,
}

impl ModelEntry {
    fn new(descriptor: ModelDescriptor) -> Self {
        Self {
            descriptor,
            enabled: AtomicBool::new(true),
            stats: RwLock::new(ModelStats::default()),
        }
    }

    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn role(&self) -> ModelRole {
        self.descriptor.role
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Copy of the current statistics, consistent as of one instant.
    pub fn stats(&self) -> ModelStats {
        *self.stats.read()
    }

    fn record(&self, success: bool, response_time: Duration) {
        let mut stats = self.stats.write();
        stats.last_response_time = Some(response_time);
        if success {
            stats.success_count += 1;
        } else {
            stats.error_count += 1;
        }
    }

    /// Returns true when the flag actually changed.
    fn set_enabled(&self, enabled: bool) -> bool {
        self.enabled.swap(enabled, Ordering::AcqRel) != enabled
    }

    fn snapshot(&self) -> ModelSnapshot {
        let stats = self.stats();
        ModelSnapshot {
            name: self.descriptor.name.clone(),
            provider: self.descriptor.provider.clone(),
            role: self.descriptor.role,
            enabled: self.is_enabled(),
            last_response_time: stats.last_response_time,
            success_count: stats.success_count,
            error_count: stats.error_count,
        }
    }
}

impl fmt::Debug for ModelEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelEntry")
            .field("name", &self.descriptor.name)
            .field("role", &self.descriptor.role)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Point-in-time view of one model, for diagnostics.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelSnapshot {
    pub name: String,
    pub provider: String,
    pub role: ModelRole,
    pub enabled: bool,
    pub last_response_time: Option<Duration>,
    pub success_count: u64,
    pub error_count: u64,
}

// ============================================================================
// Catalog
// ============================================================================

/// Process-wide model registry shared by the dispatcher and the health
/// monitor. Owned by the embedding application and passed by `Arc` into
/// both; there are no hidden globals.
pub struct ModelCatalog {
    /// Registration order, replaced wholesale on config reload.
    ordered: RwLock<Vec<Arc<ModelEntry>>>,
    /// Name index for O(1) outcome recording.
    by_name: DashMap<String, Arc<ModelEntry>>,
}

impl ModelCatalog {
    pub fn new() -> Self {
        Self {
            ordered: RwLock::new(Vec::new()),
            by_name: DashMap::new(),
        }
    }

    pub fn from_descriptors(descriptors: Vec<ModelDescriptor>) -> Self {
        let catalog = Self::new();
        catalog.replace_all(descriptors);
        catalog
    }

    /// Replace the whole registered set. Existing entries are dropped along
    /// with their statistics; entries are re-created enabled.
    pub fn replace_all(&self, descriptors: Vec<ModelDescriptor>) {
        let fresh: Vec<Arc<ModelEntry>> = descriptors
            .into_iter()
            .map(|d| Arc::new(ModelEntry::new(d)))
            .collect();
        let keep: HashSet<String> = fresh.iter().map(|e| e.name().to_string()).collect();

        let mut ordered = self.ordered.write();
        for entry in &fresh {
            self.by_name.insert(entry.name().to_string(), Arc::clone(entry));
        }
        self.by_name.retain(|name, _| keep.contains(name));
        *ordered = fresh;
    }

    /// Enabled models of `role`, in registration order.
    pub fn select_by_role(&self, role: ModelRole) -> Vec<Arc<ModelEntry>> {
        self.ordered
            .read()
            .iter()
            .filter(|e| e.role() == role && e.is_enabled())
            .cloned()
            .collect()
    }

    /// Enabled models of `role`, fastest first. Models with no recorded
    /// response time sort last; ties keep registration order.
    pub fn select_by_role_fastest(&self, role: ModelRole) -> Vec<Arc<ModelEntry>> {
        let mut tier = self.select_by_role(role);
        tier.sort_by_key(|e| e.stats().last_response_time.unwrap_or(Duration::MAX));
        tier
    }

    /// The single fastest enabled model of `role`, if any.
    pub fn fastest_enabled(&self, role: ModelRole) -> Option<Arc<ModelEntry>> {
        self.select_by_role_fastest(role).into_iter().next()
    }

    pub fn get(&self, name: &str) -> Option<Arc<ModelEntry>> {
        self.by_name.get(name).map(|e| Arc::clone(&e))
    }

    /// Every registered model, enabled or not, in registration order.
    pub fn entries(&self) -> Vec<Arc<ModelEntry>> {
        self.ordered.read().clone()
    }

    /// Record the outcome of one completed attempt. Updates the counters
    /// and the rolling last-response-time in one step. Returns false when
    /// the model is not registered.
    pub fn record_outcome(&self, name: &str, success: bool, response_time: Duration) -> bool {
        match self.by_name.get(name) {
            Some(entry) => {
                entry.record(success, response_time);
                true
            }
            None => {
                debug!(model = %name, "outcome recorded for unknown model");
                false
            }
        }
    }

    /// Flip a model's enabled flag. Health Monitor only. Returns whether
    /// the flag actually changed.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        match self.by_name.get(name) {
            Some(entry) => entry.set_enabled(enabled),
            None => false,
        }
    }

    pub fn snapshot(&self, name: &str) -> Option<ModelSnapshot> {
        self.by_name.get(name).map(|e| e.snapshot())
    }

    /// Snapshots of every registered model, in registration order.
    pub fn snapshots(&self) -> Vec<ModelSnapshot> {
        self.ordered.read().iter().map(|e| e.snapshot()).collect()
    }

    pub fn len(&self) -> usize {
        self.ordered.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.read().is_empty()
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ModelCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelCatalog")
            .field("models", &self.len())
            .finish()
    }
}
