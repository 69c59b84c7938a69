//! Generation response returned to callers.

use crate::types::{ProviderId, RequestId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Token accounting for one completed generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageUnits {
    /// Prompt tokens consumed.
    pub input_tokens: u32,
    /// Completion tokens produced.
    pub output_tokens: u32,
}

impl UsageUnits {
    /// Create usage from input/output token counts.
    #[must_use]
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Total tokens across prompt and completion.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// Completed generation, either fresh from a provider or served from cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Identifier of this generation.
    pub generation_id: String,

    /// The request this responds to.
    pub request_id: RequestId,

    /// Generated text.
    pub response: String,

    /// Model that produced the text.
    pub model_used: String,

    /// Provider that produced the text.
    pub provider_used: ProviderId,

    /// Token usage.
    pub tokens_used: UsageUnits,

    /// Cost billed for this generation (USD). Zero when served from cache.
    pub cost_usd: f64,

    /// Whether the cost was estimated from payload size rather than
    /// provider-reported usage.
    pub cost_estimated: bool,

    /// Whether this response was served from the cache.
    pub from_cache: bool,

    /// When the generation completed.
    pub created_at: DateTime<Utc>,
}

impl GenerationResponse {
    /// Create a response for a freshly completed generation.
    #[must_use]
    pub fn fresh(
        request_id: RequestId,
        response: impl Into<String>,
        model_used: impl Into<String>,
        provider_used: ProviderId,
        tokens_used: UsageUnits,
        cost_usd: f64,
        cost_estimated: bool,
    ) -> Self {
        Self {
            generation_id: Uuid::new_v4().to_string(),
            request_id,
            response: response.into(),
            model_used: model_used.into(),
            provider_used,
            tokens_used,
            cost_usd,
            cost_estimated,
            from_cache: false,
            created_at: Utc::now(),
        }
    }

    /// Re-issue a cached response for a new request. Cache hits are free.
    #[must_use]
    pub fn replayed_for(mut self, request_id: RequestId) -> Self {
        self.request_id = request_id;
        self.from_cache = true;
        self.cost_usd = 0.0;
        self
    }
}
