//! HTTP request handlers for the gateway API.

use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse,
    },
    Json,
};
use futures::StreamExt;
use orchestrator_core::{
    GatewayError, GenerationRequest, ProviderId, TaskType, UsageUnits,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::str::FromStr;
use tracing::instrument;

/// Inbound generation request body.
#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    /// Prompt payload.
    pub prompt: String,
    /// End user identifier.
    pub user_id: String,
    /// Tenant (family group) identifier.
    pub tenant_id: String,
    /// Task category.
    pub task_type: String,
    /// Maximum tokens to generate.
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Preferred model.
    #[serde(default)]
    pub model: Option<String>,
    /// Per-request cost ceiling (USD).
    #[serde(default)]
    pub max_cost_usd: Option<f64>,
    /// Overall deadline in milliseconds.
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

impl GenerateBody {
    fn into_request(self) -> Result<GenerationRequest, GatewayError> {
        let task_type = TaskType::from_str(&self.task_type)?;
        let mut builder = GenerationRequest::builder()
            .tenant(self.tenant_id)
            .user(self.user_id)
            .task_type(task_type)
            .prompt(self.prompt);
        if let Some(model) = self.model {
            builder = builder.preferred_model(model);
        }
        if let Some(max_tokens) = self.max_tokens {
            builder = builder.max_tokens(max_tokens);
        }
        if let Some(temperature) = self.temperature {
            builder = builder.temperature(temperature);
        }
        if let Some(ceiling) = self.max_cost_usd {
            builder = builder.max_cost_ceiling(ceiling);
        }
        if let Some(deadline_ms) = self.deadline_ms {
            builder = builder.deadline_ms(deadline_ms);
        }
        builder.build()
    }
}

/// Generation response body.
#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    /// Generated text.
    pub response: String,
    /// Model that produced the text.
    pub model_used: String,
    /// Provider that produced the text.
    pub provider_used: ProviderId,
    /// Token usage.
    pub tokens_used: TokensUsed,
    /// Cost billed (USD).
    pub cost_usd: f64,
    /// Generation identifier.
    pub generation_id: String,
    /// Whether the response was served from cache.
    pub from_cache: bool,
}

/// Token usage in the response body.
#[derive(Debug, Serialize)]
pub struct TokensUsed {
    /// Prompt tokens.
    pub input: u32,
    /// Completion tokens.
    pub output: u32,
    /// Total tokens.
    pub total: u32,
}

impl From<UsageUnits> for TokensUsed {
    fn from(units: UsageUnits) -> Self {
        Self {
            input: units.input_tokens,
            output: units.output_tokens,
            total: units.total(),
        }
    }
}

/// `POST /v1/generate`
#[instrument(skip(state, body), fields(task_type = %body.task_type))]
pub async fn generate(
    State(state): State<AppState>,
    Json(body): Json<GenerateBody>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let request = body.into_request()?;
    let response = state.gateway.execute(request).await?;

    Ok(Json(GenerateResponse {
        response: response.response,
        model_used: response.model_used,
        provider_used: response.provider_used,
        tokens_used: response.tokens_used.into(),
        cost_usd: response.cost_usd,
        generation_id: response.generation_id,
        from_cache: response.from_cache,
    }))
}

/// `POST /v1/generate/stream`
///
/// Server-sent events; each event's data is a chunk JSON, terminated by a
/// literal `[DONE]`.
#[instrument(skip(state, body), fields(task_type = %body.task_type))]
pub async fn generate_stream(
    State(state): State<AppState>,
    Json(body): Json<GenerateBody>,
) -> Result<Sse<impl futures::Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let request = body.into_request()?;
    let handle = state.gateway.execute_stream(request).await?;

    let events = handle.stream.map(|item| {
        let event = match item {
            Ok(chunk) if chunk.done => Event::default().data("[DONE]"),
            Ok(chunk) => match serde_json::to_string(&chunk) {
                Ok(json) => Event::default().data(json),
                Err(error) => Event::default()
                    .data(format!("{{\"error\":\"serialization: {error}\"}}")),
            },
            Err(error) => Event::default().data(format!(
                "{{\"error\":\"{}\"}}",
                error.reason_code()
            )),
        };
        Ok(event)
    });

    Ok(Sse::new(events))
}

/// Health check response body.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Version.
    pub version: String,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
}

/// `GET /health`
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

/// `GET /ready`
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.providers.is_empty() {
        (StatusCode::SERVICE_UNAVAILABLE, "no providers available")
    } else {
        (StatusCode::OK, "ready")
    }
}

/// `GET /live`
pub async fn liveness_check() -> impl IntoResponse {
    (StatusCode::OK, "alive")
}

/// `GET /metrics` (Prometheus text format)
///
/// Gauges for breaker state and scope consumption are refreshed from the
/// live components on each scrape.
pub async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    for (provider_id, snapshot) in state.breakers.snapshots() {
        state
            .metrics
            .breaker_state
            .with_label_values(&[provider_id.as_str()])
            .set(snapshot.state as i64);
    }
    for scope in state.budget.consumption() {
        state
            .metrics
            .scope_consumed_usd
            .with_label_values(&[&scope.scope.to_string(), &scope.id])
            .set(scope.consumed_usd);
    }

    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.gather(),
    )
}

/// Admin view of one provider.
#[derive(Debug, Serialize)]
pub struct ProviderStatus {
    /// Routing profile snapshot.
    pub profile: orchestrator_routing::ProfileSnapshot,
    /// Circuit breaker snapshot, if the breaker has been created.
    pub breaker: Option<orchestrator_resilience::CircuitBreakerSnapshot>,
}

/// `GET /admin/providers`
pub async fn admin_providers(State(state): State<AppState>) -> Json<Vec<ProviderStatus>> {
    let breakers: std::collections::HashMap<_, _> =
        state.breakers.snapshots().into_iter().collect();

    let statuses = state
        .router
        .snapshots()
        .into_iter()
        .map(|profile| {
            let breaker = breakers.get(&profile.provider_id).cloned();
            ProviderStatus { profile, breaker }
        })
        .collect();
    Json(statuses)
}

/// Admin budget view.
#[derive(Debug, Serialize)]
pub struct BudgetStatus {
    /// Per-scope consumption.
    pub scopes: Vec<orchestrator_budget::ScopeConsumption>,
    /// Cache statistics.
    pub cache: orchestrator_resilience::CacheStats,
}

/// `GET /admin/budgets`
pub async fn admin_budgets(State(state): State<AppState>) -> Json<BudgetStatus> {
    Json(BudgetStatus {
        scopes: state.budget.consumption(),
        cache: state.cache.stats(),
    })
}
