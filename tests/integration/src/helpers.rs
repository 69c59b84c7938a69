//! Test harness assembling a full gateway over scripted providers.

use crate::mock_providers::ScriptedProvider;
use orchestrator_budget::{BudgetManager, MemoryStore};
use orchestrator_config::{BudgetPeriod, BudgetSettings, ScopeLimit};
use orchestrator_core::{GenerationRequest, ModelProvider, TaskType};
use orchestrator_engine::{EngineConfig, Gateway};
use orchestrator_providers::ProviderRegistry;
use orchestrator_resilience::{
    CacheConfig, CircuitBreakerConfig, CircuitBreakerRegistry, ResponseCache, RetryConfig,
    RetryPolicy,
};
use orchestrator_routing::{ProviderProfile, Router, RouterConfig};
use orchestrator_server::AppState;
use orchestrator_telemetry::Metrics;
use std::sync::Arc;
use std::time::Duration;

/// Everything a test needs to drive and inspect the gateway.
pub struct Harness {
    /// The assembled engine.
    pub gateway: Arc<Gateway>,
    /// Budget manager, for consumption assertions.
    pub budget: Arc<BudgetManager>,
    /// Usage log, for record assertions.
    pub store: Arc<MemoryStore>,
    /// Breaker registry, for state assertions.
    pub breakers: Arc<CircuitBreakerRegistry>,
    /// Response cache.
    pub cache: Arc<ResponseCache>,
    /// Router.
    pub router: Arc<Router>,
    /// Provider registry.
    pub providers: Arc<ProviderRegistry>,
    /// Metrics registry.
    pub metrics: Arc<Metrics>,
}

/// Builder over optional knobs; providers register with equal weights
/// unless specified.
pub struct HarnessBuilder {
    providers: Vec<(Arc<ScriptedProvider>, u32)>,
    budget_settings: BudgetSettings,
    breaker_config: CircuitBreakerConfig,
    retries: u32,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            budget_settings: generous_budget(),
            breaker_config: CircuitBreakerConfig {
                failure_threshold: 3,
                cooldown: Duration::from_millis(50),
                max_cooldown: Duration::from_secs(5),
            },
            retries: 0,
        }
    }
}

/// Budget settings that never deny.
pub fn generous_budget() -> BudgetSettings {
    BudgetSettings {
        storage_path: String::new(),
        global: ScopeLimit {
            limit_usd: 1_000.0,
            period: BudgetPeriod::Daily,
        },
        tenant_default: ScopeLimit {
            limit_usd: 100.0,
            period: BudgetPeriod::Daily,
        },
        user_default: ScopeLimit {
            limit_usd: 50.0,
            period: BudgetPeriod::Daily,
        },
        overrides: Vec::new(),
    }
}

impl HarnessBuilder {
    /// Add a provider with the given traffic weight.
    pub fn provider(mut self, provider: ScriptedProvider, weight: u32) -> Self {
        self.providers.push((Arc::new(provider), weight));
        self
    }

    /// Override budget settings.
    pub fn budget(mut self, settings: BudgetSettings) -> Self {
        self.budget_settings = settings;
        self
    }

    /// Override breaker settings.
    pub fn breakers(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    /// Enable intra-candidate retries.
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Assemble the harness.
    pub fn build(self) -> Harness {
        let registry = Arc::new(ProviderRegistry::new());
        let breakers = Arc::new(CircuitBreakerRegistry::new(self.breaker_config));
        let router = Arc::new(Router::new(RouterConfig::default(), Arc::clone(&breakers)));
        let store = Arc::new(MemoryStore::new());
        let budget = Arc::new(BudgetManager::new(
            self.budget_settings,
            Arc::clone(&store) as Arc<dyn orchestrator_budget::BudgetStore>,
        ));
        let cache = Arc::new(ResponseCache::new(CacheConfig::default()));
        let metrics = Arc::new(Metrics::new().expect("metrics register"));

        for (provider, weight) in self.providers {
            router.register(ProviderProfile::from_seed(&provider.profile_seed(), weight));
            registry
                .register(provider as Arc<dyn ModelProvider>)
                .expect("provider registers");
        }

        let gateway = Arc::new(
            Gateway::builder()
                .providers(Arc::clone(&registry))
                .router(Arc::clone(&router))
                .breakers(Arc::clone(&breakers))
                .budget(Arc::clone(&budget))
                .cache(Arc::clone(&cache))
                .retry(RetryPolicy::new(RetryConfig {
                    max_retries: self.retries,
                    base_delay: Duration::from_millis(1),
                    max_delay: Duration::from_millis(4),
                    jitter: 0.0,
                }))
                .metrics(Arc::clone(&metrics))
                .config(EngineConfig {
                    default_deadline: Duration::from_secs(5),
                })
                .build()
                .expect("gateway builds"),
        );

        Harness {
            gateway,
            budget,
            store,
            breakers,
            cache,
            router,
            providers: registry,
            metrics,
        }
    }
}

impl Harness {
    /// Start a builder.
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    /// App state for route-level tests.
    pub fn app_state(&self) -> AppState {
        AppState::new(
            Arc::clone(&self.gateway),
            Arc::clone(&self.providers),
            Arc::clone(&self.router),
            Arc::clone(&self.breakers),
            Arc::clone(&self.budget),
            Arc::clone(&self.cache),
            Arc::clone(&self.metrics),
        )
    }
}

/// A valid itinerary request.
pub fn itinerary_request(prompt: &str) -> GenerationRequest {
    GenerationRequest::builder()
        .tenant("family-1")
        .user("user-1")
        .task_type(TaskType::Itinerary)
        .prompt(prompt)
        .build()
        .expect("valid request")
}
