//! # Orchestrator Config
//!
//! Configuration loading for the LLM Orchestration Gateway.
//!
//! Configuration comes from a YAML file with a small set of environment
//! overrides (`GATEWAY_HOST`, `GATEWAY_PORT`, `GATEWAY_LOG_LEVEL`).
//! Provider credentials are never written in the file: each provider names
//! the environment variable holding its key, resolved once at startup.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use orchestrator_core::{ScopeKind, TaskType};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Io {
        /// Path that was attempted.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file could not be parsed.
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        /// Path that was attempted.
        path: String,
        /// Underlying YAML error.
        #[source]
        source: serde_yaml::Error,
    },

    /// The configuration is structurally valid but semantically wrong.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct GatewayConfig {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Response cache settings.
    pub cache: CacheConfig,
    /// Circuit breaker settings applied per provider.
    pub circuit_breaker: CircuitBreakerSettings,
    /// Per-candidate retry settings.
    pub retry: RetrySettings,
    /// Routing settings.
    pub routing: RoutingSettings,
    /// Budget scopes and persistence.
    pub budget: BudgetSettings,
    /// Provider instances.
    pub providers: Vec<ProviderConfig>,
}

impl GatewayConfig {
    /// Load configuration from a YAML file and apply environment overrides.
    ///
    /// # Errors
    /// Returns an error if the file is unreadable, unparsable, or invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_text = path.as_ref().display().to_string();
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Io {
            path: path_text.clone(),
            source,
        })?;
        let mut config: Self =
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path_text,
                source,
            })?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `GATEWAY_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("GATEWAY_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("GATEWAY_PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!(value = %port, "ignoring non-numeric GATEWAY_PORT"),
            }
        }
        if let Ok(level) = std::env::var("GATEWAY_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Validate cross-field constraints.
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` describing the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.iter().filter(|p| p.enabled).count() == 0 {
            return Err(ConfigError::Invalid(
                "at least one enabled provider is required".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate provider id '{}'",
                    provider.id
                )));
            }
            if provider.weight == 0 {
                return Err(ConfigError::Invalid(format!(
                    "provider '{}' has zero traffic weight",
                    provider.id
                )));
            }
            if provider.supported_tasks.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "provider '{}' supports no task types",
                    provider.id
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.routing.ab_split_fraction) {
            return Err(ConfigError::Invalid(format!(
                "routing.ab_split_fraction must be in [0, 1], got {}",
                self.routing.ab_split_fraction
            )));
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker.failure_threshold must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Default overall deadline applied when the caller sets none.
    #[serde(with = "humantime_serde")]
    pub default_deadline: Duration,
    /// Maximum accepted request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            default_deadline: Duration::from_secs(30),
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingConfig {
    /// Default log level / filter directive.
    pub level: String,
    /// Emit JSON-formatted log lines.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Response cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheConfig {
    /// Whether caching is enabled.
    pub enabled: bool,
    /// TTL applied when the provider declares none.
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,
    /// Maximum number of cached responses.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl: Duration::from_secs(3600),
            max_entries: 10_000,
        }
    }
}

/// Circuit breaker settings, applied to every provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Initial cooldown before a half-open trial is allowed.
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
    /// Upper bound for the exponentially growing cooldown.
    #[serde(with = "humantime_serde")]
    pub max_cooldown: Duration,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            max_cooldown: Duration::from_secs(600),
        }
    }
}

/// Retry settings for transient failures within one candidate attempt.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RetrySettings {
    /// Retries after the initial attempt (0 disables retries).
    pub max_retries: u32,
    /// Base backoff delay.
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Backoff delay cap.
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

/// Routing settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RoutingSettings {
    /// Fraction of requests deliberately routed to the secondary candidate
    /// for comparison (0 disables the experiment).
    pub ab_split_fraction: f64,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            ab_split_fraction: 0.0,
        }
    }
}

/// Budget period granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetPeriod {
    /// Resets at midnight UTC.
    Daily,
    /// Resets at the first of the month, UTC.
    Monthly,
}

/// One scope's budget limit.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScopeLimit {
    /// Spending limit for the period (USD).
    pub limit_usd: f64,
    /// Period granularity.
    pub period: BudgetPeriod,
}

/// Explicit per-scope override.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScopeOverride {
    /// Scope level being overridden.
    pub scope: ScopeKind,
    /// Scope identifier (tenant or user id).
    pub id: String,
    /// Spending limit for the period (USD).
    pub limit_usd: f64,
    /// Period granularity.
    pub period: BudgetPeriod,
}

/// Budget scopes and persistence settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BudgetSettings {
    /// SQLite database path for ledger snapshots and the usage log.
    /// Empty string keeps everything in memory.
    pub storage_path: String,
    /// Deployment-wide limit.
    pub global: ScopeLimit,
    /// Default limit for tenants without an override.
    pub tenant_default: ScopeLimit,
    /// Default limit for users without an override.
    pub user_default: ScopeLimit,
    /// Explicit overrides.
    pub overrides: Vec<ScopeOverride>,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            storage_path: "gateway.db".to_string(),
            global: ScopeLimit {
                limit_usd: 250.0,
                period: BudgetPeriod::Daily,
            },
            tenant_default: ScopeLimit {
                limit_usd: 10.0,
                period: BudgetPeriod::Daily,
            },
            user_default: ScopeLimit {
                limit_usd: 2.0,
                period: BudgetPeriod::Daily,
            },
            overrides: Vec::new(),
        }
    }
}

/// Which adapter implementation a provider entry uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI or any OpenAI-compatible endpoint.
    OpenAI,
    /// Anthropic.
    Anthropic,
    /// Google Gemini.
    Google,
}

/// One provider instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Provider instance id (e.g. "openai-primary").
    pub id: String,
    /// Adapter implementation.
    pub kind: ProviderKind,
    /// Whether this provider participates in routing.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Override for the provider's base URL (self-hosted or proxy setups).
    #[serde(default)]
    pub base_url: Option<String>,
    /// Model used when the caller expresses no preference.
    pub default_model: String,
    /// Task types this provider serves.
    pub supported_tasks: Vec<TaskType>,
    /// Relative traffic weight for the cost-optimization allocation.
    pub weight: u32,
    /// Cost per 1K input tokens (USD).
    pub input_cost_per_1k: f64,
    /// Cost per 1K output tokens (USD).
    pub output_cost_per_1k: f64,
    /// Connect timeout.
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    /// Read timeout for the full response.
    #[serde(with = "humantime_serde", default = "default_read_timeout")]
    pub read_timeout: Duration,
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(30)
}

impl ProviderConfig {
    /// Resolve this provider's API key from the configured environment
    /// variable. Returns `None` (with a warning) when unset, so the caller
    /// can skip registration.
    #[must_use]
    pub fn resolve_api_key(&self) -> Option<SecretString> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.is_empty() => Some(SecretString::new(key)),
            _ => {
                warn!(
                    provider = %self.id,
                    env = %self.api_key_env,
                    "API key environment variable not set, provider will be skipped"
                );
                None
            }
        }
    }
}
