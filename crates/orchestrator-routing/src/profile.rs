//! Provider profiles with rolling cost and latency statistics.

use orchestrator_core::{ProfileSeed, ProviderId, TaskType};
use serde::Serialize;

/// Smoothing factor for the exponential moving averages.
const EWMA_ALPHA: f64 = 0.2;

/// Long-lived routing facts for one provider.
///
/// Cost and latency are rolling averages over completed calls; health is
/// owned by the circuit breaker and only read here.
#[derive(Debug, Clone)]
pub struct ProviderProfile {
    /// Provider instance identifier.
    pub provider_id: ProviderId,
    /// Task types this provider serves.
    pub supported_tasks: Vec<TaskType>,
    /// Model used when the caller expresses no preference.
    pub default_model: String,
    /// Configured traffic weight (declared percentage allocation).
    pub weight: u32,
    /// Rolling blended cost per 1K tokens (USD).
    pub cost_per_1k: f64,
    /// Rolling average latency (milliseconds).
    pub avg_latency_ms: f64,
    /// Completed calls folded into the averages.
    pub completed_calls: u64,
}

impl ProviderProfile {
    /// Build a profile from an adapter's seed and its configured weight.
    #[must_use]
    pub fn from_seed(seed: &ProfileSeed, weight: u32) -> Self {
        Self {
            provider_id: seed.provider_id.clone(),
            supported_tasks: seed.supported_tasks.clone(),
            default_model: seed.default_model.clone(),
            weight,
            cost_per_1k: seed.blended_cost_per_1k(),
            avg_latency_ms: 0.0,
            completed_calls: 0,
        }
    }

    /// Whether this provider serves the given task type.
    #[must_use]
    pub fn supports(&self, task_type: TaskType) -> bool {
        self.supported_tasks.contains(&task_type)
    }

    /// Fold one completed call into the rolling averages.
    pub fn record_completion(&mut self, latency_ms: f64, observed_cost_per_1k: Option<f64>) {
        if self.completed_calls == 0 {
            self.avg_latency_ms = latency_ms;
        } else {
            self.avg_latency_ms =
                EWMA_ALPHA * latency_ms + (1.0 - EWMA_ALPHA) * self.avg_latency_ms;
        }
        if let Some(observed) = observed_cost_per_1k {
            self.cost_per_1k = EWMA_ALPHA * observed + (1.0 - EWMA_ALPHA) * self.cost_per_1k;
        }
        self.completed_calls += 1;
    }

    /// Estimated cost in USD for a call of `units` tokens.
    #[must_use]
    pub fn estimate_for_units(&self, units: u32) -> f64 {
        f64::from(units) / 1000.0 * self.cost_per_1k
    }
}

/// Serializable profile snapshot for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileSnapshot {
    /// Provider instance identifier.
    pub provider_id: ProviderId,
    /// Task types this provider serves.
    pub supported_tasks: Vec<TaskType>,
    /// Configured traffic weight.
    pub weight: u32,
    /// Rolling blended cost per 1K tokens (USD).
    pub cost_per_1k: f64,
    /// Rolling average latency (milliseconds).
    pub avg_latency_ms: f64,
    /// Completed calls folded into the averages.
    pub completed_calls: u64,
}

impl From<&ProviderProfile> for ProfileSnapshot {
    fn from(profile: &ProviderProfile) -> Self {
        Self {
            provider_id: profile.provider_id.clone(),
            supported_tasks: profile.supported_tasks.clone(),
            weight: profile.weight,
            cost_per_1k: profile.cost_per_1k,
            avg_latency_ms: profile.avg_latency_ms,
            completed_calls: profile.completed_calls,
        }
    }
}
