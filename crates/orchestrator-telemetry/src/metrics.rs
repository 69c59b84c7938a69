//! Prometheus metrics for the gateway.
//!
//! Covers the operator-facing surface: request outcomes, cache hit rate,
//! per-provider health and latency, and budget consumption/denials.

use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use thiserror::Error;

/// Metrics initialization errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// A collector could not be registered.
    #[error("failed to register metrics: {0}")]
    Registration(String),
}

impl From<prometheus::Error> for MetricsError {
    fn from(error: prometheus::Error) -> Self {
        Self::Registration(error.to_string())
    }
}

/// Gateway metrics registry.
pub struct Metrics {
    registry: Registry,

    /// Terminal request outcomes by task type and outcome code.
    pub requests_total: IntCounterVec,
    /// Cache lookups that hit.
    pub cache_hits_total: IntCounter,
    /// Cache lookups that missed.
    pub cache_misses_total: IntCounter,
    /// Provider attempts by provider and outcome.
    pub provider_attempts_total: IntCounterVec,
    /// Provider call latency in seconds.
    pub provider_latency_seconds: HistogramVec,
    /// Budget reservation denials by scope level.
    pub budget_denials_total: IntCounterVec,
    /// Circuit breaker state per provider (0 closed, 1 open, 2 half-open).
    pub breaker_state: IntGaugeVec,
    /// Consumed budget per scope (USD).
    pub scope_consumed_usd: GaugeVec,
}

impl Metrics {
    /// Create and register all collectors.
    ///
    /// # Errors
    /// Returns an error if any collector cannot be registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("gateway_requests_total", "Terminal request outcomes"),
            &["task_type", "outcome"],
        )?;
        let cache_hits_total = IntCounter::new("gateway_cache_hits_total", "Cache hits")?;
        let cache_misses_total = IntCounter::new("gateway_cache_misses_total", "Cache misses")?;
        let provider_attempts_total = IntCounterVec::new(
            Opts::new("gateway_provider_attempts_total", "Provider attempts"),
            &["provider", "outcome"],
        )?;
        let provider_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "gateway_provider_latency_seconds",
                "Provider call latency in seconds",
            )
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["provider"],
        )?;
        let budget_denials_total = IntCounterVec::new(
            Opts::new("gateway_budget_denials_total", "Budget reservation denials"),
            &["scope"],
        )?;
        let breaker_state = IntGaugeVec::new(
            Opts::new(
                "gateway_breaker_state",
                "Circuit breaker state (0 closed, 1 open, 2 half-open)",
            ),
            &["provider"],
        )?;
        let scope_consumed_usd = GaugeVec::new(
            Opts::new("gateway_scope_consumed_usd", "Consumed budget per scope"),
            &["scope", "id"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(cache_hits_total.clone()))?;
        registry.register(Box::new(cache_misses_total.clone()))?;
        registry.register(Box::new(provider_attempts_total.clone()))?;
        registry.register(Box::new(provider_latency_seconds.clone()))?;
        registry.register(Box::new(budget_denials_total.clone()))?;
        registry.register(Box::new(breaker_state.clone()))?;
        registry.register(Box::new(scope_consumed_usd.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            cache_hits_total,
            cache_misses_total,
            provider_attempts_total,
            provider_latency_seconds,
            budget_denials_total,
            breaker_state,
            scope_consumed_usd,
        })
    }

    /// Render the registry in Prometheus text exposition format.
    #[must_use]
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
