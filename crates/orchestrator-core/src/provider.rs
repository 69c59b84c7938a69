//! Provider capability trait.
//!
//! Every external AI provider is wrapped in an adapter implementing
//! [`ModelProvider`]. The routing engine depends only on this interface,
//! never on concrete adapters.

use crate::error::GatewayResult;
use crate::request::GenerationRequest;
use crate::response::UsageUnits;
use crate::types::{ProviderId, TaskType};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;

/// Static facts an adapter declares about itself at registration time.
///
/// Rolling cost/latency figures live in the routing engine; this seed only
/// carries what the adapter knows up front.
#[derive(Debug, Clone)]
pub struct ProfileSeed {
    /// Provider instance identifier.
    pub provider_id: ProviderId,
    /// Task types this provider can serve.
    pub supported_tasks: Vec<TaskType>,
    /// Model used when the caller expresses no preference.
    pub default_model: String,
    /// Cost per 1K input tokens (USD).
    pub input_cost_per_1k: f64,
    /// Cost per 1K output tokens (USD).
    pub output_cost_per_1k: f64,
}

impl ProfileSeed {
    /// Blended per-1K-token rate used for pre-flight estimates and routing
    /// comparisons.
    #[must_use]
    pub fn blended_cost_per_1k(&self) -> f64 {
        (self.input_cost_per_1k + self.output_cost_per_1k) / 2.0
    }
}

/// Forecasted cost for a request, always treated as an upper bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostEstimate {
    /// Estimated cost in USD.
    pub usd: f64,
}

impl CostEstimate {
    /// Wrap an estimate.
    #[must_use]
    pub fn new(usd: f64) -> Self {
        Self { usd }
    }
}

/// Normalized provider response.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    /// Generated text.
    pub text: String,
    /// Model that served the request.
    pub model: String,
    /// Token usage. Zeroed when the provider reported nothing.
    pub units: UsageUnits,
    /// Actual cost in USD.
    pub cost_usd: f64,
    /// True when the provider did not report usage and the adapter estimated
    /// the cost from payload size.
    pub cost_estimated: bool,
    /// Provider-declared cache lifetime for this response, if any.
    pub cache_ttl: Option<Duration>,
}

/// One incremental chunk of a streamed generation.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StreamChunk {
    /// Text fragment to append.
    pub delta: String,
    /// Set on the final chunk.
    pub done: bool,
    /// Usage totals, reported on the final chunk when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageUnits>,
}

impl StreamChunk {
    /// An intermediate content chunk.
    #[must_use]
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            delta: text.into(),
            done: false,
            usage: None,
        }
    }

    /// The terminal chunk, optionally carrying usage totals.
    #[must_use]
    pub fn done(usage: Option<UsageUnits>) -> Self {
        Self {
            delta: String::new(),
            done: true,
            usage,
        }
    }
}

/// Stream of generation chunks.
pub type ChunkStream = BoxStream<'static, GatewayResult<StreamChunk>>;

/// Default completion budget assumed when the caller sets no `max_tokens`.
pub const DEFAULT_OUTPUT_TOKENS: u32 = 512;

/// Rough token count for a payload (~4 characters per token).
///
/// Used for cost estimation only; billing uses provider-reported usage
/// whenever it is available.
#[must_use]
pub fn approximate_tokens(text: &str) -> u32 {
    (text.chars().count() as u32 / 4).max(1)
}

/// Estimated total units (prompt + completion) for a request.
#[must_use]
pub fn estimated_units(request: &GenerationRequest) -> u32 {
    approximate_tokens(&request.prompt)
        .saturating_add(request.max_tokens.unwrap_or(DEFAULT_OUTPUT_TOKENS))
}

/// Capability interface implemented by every provider adapter.
///
/// Adapters translate provider-specific authentication, request shape, and
/// error codes into the shared vocabulary (`RateLimited`, `Timeout`,
/// `InvalidCredentials`, `ProviderInternal`).
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider instance identifier.
    fn id(&self) -> &ProviderId;

    /// Static profile facts for registration with the routing engine.
    fn profile_seed(&self) -> ProfileSeed;

    /// Forecast the cost of a request before dispatch.
    ///
    /// Estimates are upper bounds; budget correctness relies on the
    /// reserve/commit/release protocol, not estimate precision.
    fn estimate_cost(&self, request: &GenerationRequest) -> CostEstimate;

    /// Cost in USD for reported usage at this provider's rates.
    ///
    /// Used to settle streamed generations, where usage arrives on the final
    /// chunk instead of in a response body.
    fn usage_cost(&self, units: UsageUnits) -> f64 {
        let seed = self.profile_seed();
        f64::from(units.input_tokens) / 1000.0 * seed.input_cost_per_1k
            + f64::from(units.output_tokens) / 1000.0 * seed.output_cost_per_1k
    }

    /// Execute a generation call.
    ///
    /// # Errors
    /// Returns a provider-local error (`Timeout`, `RateLimited`,
    /// `InvalidCredentials`, `ProviderInternal`) on failure.
    async fn generate(&self, request: &GenerationRequest) -> GatewayResult<ProviderResponse>;

    /// Execute a streaming generation call.
    ///
    /// # Errors
    /// Returns a provider-local error if the stream cannot be established;
    /// mid-stream failures surface as items of the returned stream.
    async fn stream_generate(&self, request: &GenerationRequest) -> GatewayResult<ChunkStream>;
}
