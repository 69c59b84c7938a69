//! # LLM Orchestration Gateway
//!
//! Multi-provider orchestration gateway for the trip-planning platform:
//! cost-aware routing, per-tenant budget enforcement, circuit breaking, and
//! response caching in front of external AI providers.
//!
//! ## Usage
//!
//! ```bash
//! # Start with the default configuration file (gateway.yaml)
//! llm-orchestration-gateway
//!
//! # Start with a custom config file
//! llm-orchestration-gateway --config /path/to/gateway.yaml
//!
//! # Environment overrides
//! GATEWAY_PORT=9000 GATEWAY_LOG_LEVEL=debug llm-orchestration-gateway
//! ```

use orchestrator_budget::{BudgetManager, BudgetStore, MemoryStore, SqliteStore};
use orchestrator_config::{GatewayConfig, ProviderKind};
use orchestrator_core::ModelProvider;
use orchestrator_engine::{EngineConfig, Gateway};
use orchestrator_providers::{
    AnthropicConfig, AnthropicProvider, GoogleConfig, GoogleProvider, OpenAiConfig,
    OpenAiProvider, ProviderRegistry,
};
use orchestrator_resilience::{
    CacheConfig, CircuitBreakerConfig, CircuitBreakerRegistry, ResponseCache, RetryConfig,
    RetryPolicy,
};
use orchestrator_routing::{ProviderProfile, Router, RouterConfig};
use orchestrator_server::{AppState, Server, ServerConfig};
use orchestrator_telemetry::{init_logging, LoggingConfig, Metrics};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Application entry point.
#[tokio::main]
async fn main() {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(2);
        }
    };

    let logging = LoggingConfig::new(&config.logging.level).with_json(config.logging.json);
    if let Err(e) = init_logging(&logging) {
        eprintln!("failed to initialize logging: {e}");
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting LLM Orchestration Gateway"
    );

    if let Err(e) = run(config).await {
        error!(error = %e, "gateway failed");
        std::process::exit(1);
    }
}

/// Resolve the config path from `--config` and load the file.
fn load_config() -> Result<GatewayConfig, Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let mut path = "gateway.yaml".to_string();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            path = args
                .next()
                .ok_or("--config requires a path argument")?;
        }
    }
    Ok(GatewayConfig::load(&path)?)
}

/// Main application logic.
async fn run(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Metrics registry
    let metrics = Arc::new(Metrics::new()?);

    // Budget persistence
    let store: Arc<dyn BudgetStore> = if config.budget.storage_path.is_empty() {
        warn!("budget.storage_path is empty; ledger will not survive restarts");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(SqliteStore::open(&config.budget.storage_path).await?)
    };
    let budget = Arc::new(BudgetManager::new(config.budget.clone(), store));
    budget.restore().await?;

    // Resilience
    let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
        failure_threshold: config.circuit_breaker.failure_threshold,
        cooldown: config.circuit_breaker.cooldown,
        max_cooldown: config.circuit_breaker.max_cooldown,
    }));
    let cache = Arc::new(ResponseCache::new(CacheConfig {
        enabled: config.cache.enabled,
        default_ttl: config.cache.default_ttl,
        max_entries: config.cache.max_entries,
    }));
    let retry = RetryPolicy::new(RetryConfig {
        max_retries: config.retry.max_retries,
        base_delay: config.retry.base_delay,
        max_delay: config.retry.max_delay,
        ..Default::default()
    });

    // Routing
    let router = Arc::new(Router::new(
        RouterConfig {
            ab_split_fraction: config.routing.ab_split_fraction,
        },
        Arc::clone(&breakers),
    ));

    // Providers
    let registry = Arc::new(create_provider_registry(&config, &router)?);
    if registry.is_empty() {
        return Err("no provider could be registered (check API key environment variables)".into());
    }
    info!(providers = registry.len(), "provider registry initialized");

    // Engine
    let gateway = Arc::new(
        Gateway::builder()
            .providers(Arc::clone(&registry))
            .router(Arc::clone(&router))
            .breakers(Arc::clone(&breakers))
            .budget(Arc::clone(&budget))
            .cache(Arc::clone(&cache))
            .retry(retry)
            .metrics(Arc::clone(&metrics))
            .config(EngineConfig {
                default_deadline: config.server.default_deadline,
            })
            .build()?,
    );

    // HTTP server
    let state = AppState::new(gateway, registry, router, breakers, budget, cache, metrics);
    let server = Server::new(
        ServerConfig {
            host: config.server.host.clone(),
            port: config.server.port,
            max_body_bytes: config.server.max_body_bytes,
        },
        state,
    );

    server.run().await?;
    Ok(())
}

/// Build the provider registry from configuration, registering each adapter
/// with the router as well. Providers with missing keys are skipped with a
/// warning rather than failing startup.
fn create_provider_registry(
    config: &GatewayConfig,
    router: &Router,
) -> Result<ProviderRegistry, Box<dyn std::error::Error>> {
    let registry = ProviderRegistry::new();

    for entry in &config.providers {
        if !entry.enabled {
            continue;
        }
        let Some(api_key) = entry.resolve_api_key() else {
            continue;
        };

        let provider: Arc<dyn ModelProvider> = match entry.kind {
            ProviderKind::OpenAI => {
                let mut adapter_config = OpenAiConfig::new(&entry.id, api_key)
                    .with_model(&entry.default_model)
                    .with_tasks(entry.supported_tasks.clone())
                    .with_pricing(entry.input_cost_per_1k, entry.output_cost_per_1k)
                    .with_timeouts(entry.connect_timeout, entry.read_timeout);
                if let Some(base_url) = &entry.base_url {
                    adapter_config = adapter_config.with_base_url(base_url);
                }
                Arc::new(OpenAiProvider::new(adapter_config)?)
            }
            ProviderKind::Anthropic => {
                let mut adapter_config = AnthropicConfig::new(&entry.id, api_key)
                    .with_model(&entry.default_model)
                    .with_tasks(entry.supported_tasks.clone())
                    .with_pricing(entry.input_cost_per_1k, entry.output_cost_per_1k)
                    .with_timeouts(entry.connect_timeout, entry.read_timeout);
                if let Some(base_url) = &entry.base_url {
                    adapter_config = adapter_config.with_base_url(base_url);
                }
                Arc::new(AnthropicProvider::new(adapter_config)?)
            }
            ProviderKind::Google => {
                let mut adapter_config = GoogleConfig::new(&entry.id, api_key)
                    .with_model(&entry.default_model)
                    .with_tasks(entry.supported_tasks.clone())
                    .with_pricing(entry.input_cost_per_1k, entry.output_cost_per_1k)
                    .with_timeouts(entry.connect_timeout, entry.read_timeout);
                if let Some(base_url) = &entry.base_url {
                    adapter_config = adapter_config.with_base_url(base_url);
                }
                Arc::new(GoogleProvider::new(adapter_config)?)
            }
        };

        router.register(ProviderProfile::from_seed(
            &provider.profile_seed(),
            entry.weight,
        ));
        registry.register(provider)?;
    }

    Ok(registry)
}
