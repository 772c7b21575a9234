//! Configuration
//!
//! TOML configuration for the dispatch core: providers and their models,
//! role assignments, the parallel pair, global timeouts and the health
//! probe settings. Loaded once at startup from an explicit path or the
//! XDG config directory, then overridden by `RELAY_*` environment
//! variables. API keys are named by environment variable and resolved at
//! client construction; the checked-in document never contains a key.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::catalog::{ModelDescriptor, ModelRole};
use crate::health::HealthConfig;
use crate::transport::ProviderFamily;

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Validation(String),
}

// ============================================================================
// Document Schema
// ============================================================================

/// Root configuration document.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Per-call deadline for dispatch attempts, in seconds.
    pub timeout_secs: u64,
    /// Extra transport calls allowed per candidate on transient failures.
    pub retry_attempts: u32,
    pub providers: Vec<ProviderConfig>,
    pub model_roles: RoleAssignments,
    pub parallel: ParallelConfig,
    pub health: HealthConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            retry_attempts: 1,
            providers: Vec::new(),
            model_roles: RoleAssignments::default(),
            parallel: ParallelConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

/// One provider endpoint and the models it serves.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub family: ProviderFamily,
    pub base_url: String,
    /// Environment variable holding the API key, when the family needs one.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub models: Vec<ModelSettings>,
}

/// Generation policy for one model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelSettings {
    pub name: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_context_window")]
    pub context_window: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_context_window() -> u32 {
    32768
}

fn default_temperature() -> f32 {
    0.7
}

/// Ordered model names per fallback tier.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleAssignments {
    pub primary: Vec<String>,
    pub duplicate: Vec<String>,
    pub reserve: Vec<String>,
    pub fallback: Vec<String>,
}

impl RoleAssignments {
    pub fn names_for(&self, role: ModelRole) -> &[String] {
        match role {
            ModelRole::Primary => &self.primary,
            ModelRole::Duplicate => &self.duplicate,
            ModelRole::Reserve => &self.reserve,
            ModelRole::Fallback => &self.fallback,
        }
    }

    /// The role a model is assigned to, if any.
    pub fn role_of(&self, name: &str) -> Option<ModelRole> {
        ModelRole::ORDERED
            .into_iter()
            .find(|role| self.names_for(*role).iter().any(|n| n == name))
    }

    fn is_empty(&self) -> bool {
        ModelRole::ORDERED
            .into_iter()
            .all(|role| self.names_for(role).is_empty())
    }
}

/// The fixed best-of-two pair and its judge.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    /// Exactly two distinct, role-assigned model names when set.
    pub models: Vec<String>,
    /// Model used only to score the pair's outputs.
    pub evaluator_model: Option<String>,
}

// ============================================================================
// Loading
// ============================================================================

impl RelayConfig {
    /// Load from `path`, or from the default location when `path` is
    /// `None`; a missing default file yields the built-in defaults.
    /// Environment overrides apply after the file, validation after both.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => match Self::default_path() {
                Some(p) if p.exists() => Self::from_file(&p)?,
                _ => {
                    debug!("no config file found; using defaults");
                    Self::default()
                }
            },
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loading config file");
        Ok(toml::from_str(&text)?)
    }

    /// Parse and validate a TOML document. No environment overrides.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// `$XDG_CONFIG_HOME/relay/relay.toml` (or the platform equivalent).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("relay").join("relay.toml"))
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = read_env_u64("RELAY_TIMEOUT_SECS") {
            self.timeout_secs = v;
        }
        if let Some(v) = read_env_u64("RELAY_RETRY_ATTEMPTS") {
            self.retry_attempts = v as u32;
        }
        if let Some(v) = read_env_u64("RELAY_PROBE_INTERVAL_SECS") {
            self.health.probe_interval_secs = v;
        }
        if let Some(v) = read_env_u64("RELAY_FAILURE_THRESHOLD") {
            self.health.failure_threshold = v as u32;
        }
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    /// Referential and shape checks. Empty role lists are legal (the
    /// dispatcher skips empty tiers); dangling names are not.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::Validation("timeout_secs must be positive".into()));
        }
        if self.health.probe_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "health.probe_interval_secs must be positive".into(),
            ));
        }
        if self.health.failure_threshold == 0 {
            return Err(ConfigError::Validation(
                "health.failure_threshold must be at least 1".into(),
            ));
        }

        let mut provider_names = Vec::new();
        let mut model_names = Vec::new();
        for provider in &self.providers {
            if provider.name.is_empty() {
                return Err(ConfigError::Validation("provider name must not be empty".into()));
            }
            if provider.base_url.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "provider '{}' has an empty base_url",
                    provider.name
                )));
            }
            if provider_names.contains(&provider.name) {
                return Err(ConfigError::Validation(format!(
                    "duplicate provider name '{}'",
                    provider.name
                )));
            }
            provider_names.push(provider.name.clone());

            for model in &provider.models {
                if model_names.contains(&model.name) {
                    return Err(ConfigError::Validation(format!(
                        "duplicate model name '{}'",
                        model.name
                    )));
                }
                model_names.push(model.name.clone());
            }
        }

        let mut assigned = Vec::new();
        for role in ModelRole::ORDERED {
            for name in self.model_roles.names_for(role) {
                if !model_names.iter().any(|n| n == name) {
                    return Err(ConfigError::Validation(format!(
                        "model_roles.{role} references unknown model '{name}'"
                    )));
                }
                if assigned.contains(name) {
                    return Err(ConfigError::Validation(format!(
                        "model '{name}' is assigned to multiple roles"
                    )));
                }
                assigned.push(name.clone());
            }
        }

        if !self.parallel.models.is_empty() {
            if self.parallel.models.len() != 2 {
                return Err(ConfigError::Validation(format!(
                    "parallel.models must name exactly two models, got {}",
                    self.parallel.models.len()
                )));
            }
            if self.parallel.models[0] == self.parallel.models[1] {
                return Err(ConfigError::Validation(
                    "parallel.models must name two distinct models".into(),
                ));
            }
            for name in &self.parallel.models {
                if self.model_roles.role_of(name).is_none() {
                    return Err(ConfigError::Validation(format!(
                        "parallel model '{name}' is not assigned to any role"
                    )));
                }
            }
            let Some(evaluator) = &self.parallel.evaluator_model else {
                return Err(ConfigError::Validation(
                    "parallel block requires an evaluator_model".into(),
                ));
            };
            if !model_names.iter().any(|n| n == evaluator) {
                return Err(ConfigError::Validation(format!(
                    "evaluator_model references unknown model '{evaluator}'"
                )));
            }
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Derived Views
    // ------------------------------------------------------------------

    /// Catalog descriptors for every role-assigned model, in tier-major
    /// registration order (all primaries, then duplicates, and so on).
    pub fn descriptors(&self) -> Vec<ModelDescriptor> {
        let mut out = Vec::new();
        for role in ModelRole::ORDERED {
            for name in self.model_roles.names_for(role) {
                match self.find_model(name) {
                    Some((provider, settings)) => out.push(ModelDescriptor {
                        name: settings.name.clone(),
                        provider: provider.name.clone(),
                        role,
                        max_tokens: settings.max_tokens,
                        temperature: settings.temperature,
                        context_window: settings.context_window,
                    }),
                    None => warn!(model = %name, "role-assigned model has no definition"),
                }
            }
        }
        out
    }

    /// Descriptor for any defined model, role-assigned or not. Models
    /// outside the role map (the evaluator) default to the last tier.
    pub fn descriptor_for(&self, name: &str) -> Option<ModelDescriptor> {
        let (provider, settings) = self.find_model(name)?;
        Some(ModelDescriptor {
            name: settings.name.clone(),
            provider: provider.name.clone(),
            role: self.model_roles.role_of(name).unwrap_or(ModelRole::Fallback),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            context_window: settings.context_window,
        })
    }

    /// The configured best-of-two pair, when present.
    pub fn parallel_pair(&self) -> Option<(&str, &str)> {
        match self.parallel.models.as_slice() {
            [first, second] => Some((first.as_str(), second.as_str())),
            _ => None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn find_model(&self, name: &str) -> Option<(&ProviderConfig, &ModelSettings)> {
        self.providers.iter().find_map(|provider| {
            provider
                .models
                .iter()
                .find(|m| m.name == name)
                .map(|settings| (provider, settings))
        })
    }
}

fn read_env_u64(var: &str) -> Option<u64> {
    let raw = env::var(var).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = %var, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}
