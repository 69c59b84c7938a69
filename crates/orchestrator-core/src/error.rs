//! Error taxonomy for the orchestration gateway.
//!
//! Errors fall into two families with different propagation rules:
//! provider-local failures (`CircuitOpen`, `Timeout`, `RateLimited`,
//! `InvalidCredentials`, `ProviderInternal`) are absorbed by the engine and
//! retried against the next candidate, while terminal outcomes
//! (`InvalidRequest`, `BudgetExceeded`, `NoEligibleProvider`,
//! `AllProvidersUnavailable`, `DeadlineExceeded`) propagate to the caller.

use crate::types::{ProviderId, ScopeKind, TaskType};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the gateway.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// One failed provider attempt, kept for diagnosability on terminal errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptFailure {
    /// Provider that was attempted.
    pub provider_id: ProviderId,
    /// Short machine-readable reason (e.g. "timeout", "circuit_open").
    pub reason: String,
}

impl AttemptFailure {
    /// Record a failed attempt.
    #[must_use]
    pub fn new(provider_id: ProviderId, reason: impl Into<String>) -> Self {
        Self {
            provider_id,
            reason: reason.into(),
        }
    }
}

/// Unified gateway error type.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The request failed validation and was never executed.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Human-readable description.
        message: String,
        /// Offending field, if identifiable.
        field: Option<String>,
    },

    /// A budget scope would be exceeded; the request was not executed.
    #[error("budget exceeded for {scope} scope '{scope_id}': {consumed:.4} + {requested:.4} > {limit:.4} USD")]
    BudgetExceeded {
        /// The scope level that denied the reservation.
        scope: ScopeKind,
        /// Identifier of the exhausted scope.
        scope_id: String,
        /// Configured limit for the active period.
        limit: f64,
        /// Amount already consumed in the active period.
        consumed: f64,
        /// Estimated cost that was requested.
        requested: f64,
    },

    /// The provider's circuit breaker is open; no network call was made.
    #[error("circuit breaker open for provider '{provider}'")]
    CircuitOpen {
        /// Provider whose breaker rejected the call.
        provider: ProviderId,
    },

    /// The provider call exceeded its timeout.
    #[error("provider '{provider}' timed out after {elapsed:?}")]
    Timeout {
        /// Provider that timed out.
        provider: ProviderId,
        /// How long the call ran before being abandoned.
        elapsed: Duration,
    },

    /// The provider rejected the call due to rate limiting.
    #[error("provider '{provider}' rate limited")]
    RateLimited {
        /// Provider that rejected the call.
        provider: ProviderId,
        /// Provider-suggested retry delay, if any.
        retry_after: Option<Duration>,
    },

    /// The provider rejected our credentials.
    #[error("invalid credentials for provider '{provider}'")]
    InvalidCredentials {
        /// Provider that rejected the credentials.
        provider: ProviderId,
    },

    /// The provider returned an internal error.
    #[error("provider '{provider}' internal error: {message}")]
    ProviderInternal {
        /// Provider that failed.
        provider: ProviderId,
        /// Provider-reported message.
        message: String,
        /// HTTP status code, if the failure came from an HTTP response.
        status_code: Option<u16>,
    },

    /// Routing produced no eligible provider; no network call was made.
    #[error("no eligible provider for task '{task_type}'")]
    NoEligibleProvider {
        /// Task type that could not be routed.
        task_type: TaskType,
    },

    /// Every candidate failed or was circuit-open.
    #[error("all providers unavailable after {} attempt(s)", attempts.len())]
    AllProvidersUnavailable {
        /// Per-provider failure reasons, in attempt order.
        attempts: Vec<AttemptFailure>,
    },

    /// The caller-supplied deadline expired while iterating candidates.
    #[error("deadline exceeded after {} attempt(s)", attempts.len())]
    DeadlineExceeded {
        /// Attempts completed before the deadline expired.
        attempts: Vec<AttemptFailure>,
    },

    /// Invalid or incomplete gateway configuration.
    #[error("configuration error: {message}")]
    Configuration {
        /// What is wrong with the configuration.
        message: String,
    },

    /// Durable storage failure (ledger snapshot or usage log).
    #[error("storage error: {message}")]
    Storage {
        /// Underlying storage failure description.
        message: String,
    },

    /// Unexpected internal failure.
    #[error("internal error: {message}")]
    Internal {
        /// Failure description.
        message: String,
    },
}

impl GatewayError {
    /// Create an `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>, field: Option<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
            field,
        }
    }

    /// Create a `CircuitOpen` error.
    #[must_use]
    pub fn circuit_open(provider: impl Into<ProviderId>) -> Self {
        Self::CircuitOpen {
            provider: provider.into(),
        }
    }

    /// Create a `Timeout` error.
    #[must_use]
    pub fn timeout(provider: impl Into<ProviderId>, elapsed: Duration) -> Self {
        Self::Timeout {
            provider: provider.into(),
            elapsed,
        }
    }

    /// Create a `RateLimited` error.
    #[must_use]
    pub fn rate_limited(provider: impl Into<ProviderId>, retry_after: Option<Duration>) -> Self {
        Self::RateLimited {
            provider: provider.into(),
            retry_after,
        }
    }

    /// Create an `InvalidCredentials` error.
    #[must_use]
    pub fn invalid_credentials(provider: impl Into<ProviderId>) -> Self {
        Self::InvalidCredentials {
            provider: provider.into(),
        }
    }

    /// Create a `ProviderInternal` error.
    #[must_use]
    pub fn provider_internal(
        provider: impl Into<ProviderId>,
        message: impl Into<String>,
        status_code: Option<u16>,
    ) -> Self {
        Self::ProviderInternal {
            provider: provider.into(),
            message: message.into(),
            status_code,
        }
    }

    /// Create a `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create an `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this failure is local to one provider and should trigger
    /// fallback to the next candidate rather than surfacing to the caller.
    #[must_use]
    pub fn is_provider_local(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpen { .. }
                | Self::Timeout { .. }
                | Self::RateLimited { .. }
                | Self::InvalidCredentials { .. }
                | Self::ProviderInternal { .. }
        )
    }

    /// Whether retrying the same provider may succeed (transient failures).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::RateLimited { .. } => true,
            Self::ProviderInternal { status_code, .. } => {
                status_code.map_or(false, |code| code >= 500)
            }
            _ => false,
        }
    }

    /// Short machine-readable reason used in attempt lists and usage records.
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "invalid_request",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Timeout { .. } => "timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::InvalidCredentials { .. } => "invalid_credentials",
            Self::ProviderInternal { .. } => "provider_internal",
            Self::NoEligibleProvider { .. } => "no_eligible_provider",
            Self::AllProvidersUnavailable { .. } => "all_providers_unavailable",
            Self::DeadlineExceeded { .. } => "deadline_exceeded",
            Self::Configuration { .. } => "configuration",
            Self::Storage { .. } => "storage",
            Self::Internal { .. } => "internal",
        }
    }
}
