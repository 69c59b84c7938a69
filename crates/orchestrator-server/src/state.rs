//! Shared application state.

use orchestrator_budget::BudgetManager;
use orchestrator_engine::Gateway;
use orchestrator_providers::ProviderRegistry;
use orchestrator_resilience::{CircuitBreakerRegistry, ResponseCache};
use orchestrator_routing::Router;
use orchestrator_telemetry::Metrics;
use std::sync::Arc;
use std::time::Instant;

/// State shared across request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The orchestration engine.
    pub gateway: Arc<Gateway>,
    /// Provider registry (readiness checks, admin surface).
    pub providers: Arc<ProviderRegistry>,
    /// Routing engine (admin surface).
    pub router: Arc<Router>,
    /// Circuit breakers (metrics, admin surface).
    pub breakers: Arc<CircuitBreakerRegistry>,
    /// Budget manager (metrics, admin surface).
    pub budget: Arc<BudgetManager>,
    /// Response cache (metrics, admin surface).
    pub cache: Arc<ResponseCache>,
    /// Metrics registry.
    pub metrics: Arc<Metrics>,
    /// Process start time, for the health endpoint.
    pub started_at: Instant,
}

impl AppState {
    /// Assemble the application state.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        gateway: Arc<Gateway>,
        providers: Arc<ProviderRegistry>,
        router: Arc<Router>,
        breakers: Arc<CircuitBreakerRegistry>,
        budget: Arc<BudgetManager>,
        cache: Arc<ResponseCache>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            gateway,
            providers,
            router,
            breakers,
            budget,
            cache,
            metrics,
            started_at: Instant::now(),
        }
    }
}
