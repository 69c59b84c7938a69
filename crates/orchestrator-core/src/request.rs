//! Generation request submitted by the trip-planning backends.

use crate::error::GatewayError;
use crate::types::{RequestId, TaskType, TenantId, UserId};
use serde::{Deserialize, Serialize};

/// Default per-request cost ceiling when the caller does not set one (USD).
pub const DEFAULT_COST_CEILING_USD: f64 = 0.50;

/// A unit of work for the gateway. Immutable once submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Unique request identifier.
    #[serde(default = "RequestId::generate")]
    pub id: RequestId,

    /// Tenant (family group) the request is billed against.
    pub tenant_id: TenantId,

    /// End user within the tenant.
    pub user_id: UserId,

    /// Task category, drives routing and fingerprinting.
    pub task_type: TaskType,

    /// Prompt payload.
    pub prompt: String,

    /// Maximum acceptable per-unit cost for this request (USD).
    #[serde(default = "default_cost_ceiling")]
    pub max_cost_ceiling: f64,

    /// Model the caller would prefer, promoted when eligible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_model: Option<String>,

    /// Maximum tokens to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Sampling temperature (0.0 - 2.0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Overall deadline for the call, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
}

fn default_cost_ceiling() -> f64 {
    DEFAULT_COST_CEILING_USD
}

impl GenerationRequest {
    /// Create a new builder for `GenerationRequest`.
    #[must_use]
    pub fn builder() -> GenerationRequestBuilder {
        GenerationRequestBuilder::default()
    }

    /// Validate the request shape.
    ///
    /// # Errors
    /// Returns `InvalidRequest` if the prompt is empty or a parameter is out
    /// of range.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.prompt.trim().is_empty() {
            return Err(GatewayError::invalid_request(
                "prompt cannot be empty",
                Some("prompt".to_string()),
            ));
        }

        if let Some(temp) = self.temperature {
            if !(0.0..=2.0).contains(&temp) {
                return Err(GatewayError::invalid_request(
                    format!("temperature must be between 0.0 and 2.0, got {temp}"),
                    Some("temperature".to_string()),
                ));
            }
        }

        if let Some(max_tokens) = self.max_tokens {
            if max_tokens == 0 {
                return Err(GatewayError::invalid_request(
                    "max_tokens must be greater than zero",
                    Some("max_tokens".to_string()),
                ));
            }
        }

        if self.max_cost_ceiling <= 0.0 || !self.max_cost_ceiling.is_finite() {
            return Err(GatewayError::invalid_request(
                format!(
                    "max_cost_ceiling must be a positive amount, got {}",
                    self.max_cost_ceiling
                ),
                Some("max_cost_ceiling".to_string()),
            ));
        }

        Ok(())
    }
}

/// Builder for `GenerationRequest`.
#[derive(Debug, Default)]
pub struct GenerationRequestBuilder {
    id: Option<RequestId>,
    tenant_id: Option<TenantId>,
    user_id: Option<UserId>,
    task_type: Option<TaskType>,
    prompt: Option<String>,
    max_cost_ceiling: Option<f64>,
    preferred_model: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    deadline_ms: Option<u64>,
}

impl GenerationRequestBuilder {
    /// Set the request ID.
    #[must_use]
    pub fn id(mut self, id: RequestId) -> Self {
        self.id = Some(id);
        self
    }

    /// Set the tenant.
    #[must_use]
    pub fn tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(TenantId::new(tenant_id));
        self
    }

    /// Set the user.
    #[must_use]
    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(UserId::new(user_id));
        self
    }

    /// Set the task type.
    #[must_use]
    pub fn task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = Some(task_type);
        self
    }

    /// Set the prompt.
    #[must_use]
    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    /// Set the cost ceiling (USD).
    #[must_use]
    pub fn max_cost_ceiling(mut self, ceiling: f64) -> Self {
        self.max_cost_ceiling = Some(ceiling);
        self
    }

    /// Set the preferred model.
    #[must_use]
    pub fn preferred_model(mut self, model: impl Into<String>) -> Self {
        self.preferred_model = Some(model.into());
        self
    }

    /// Set max tokens.
    #[must_use]
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the temperature.
    #[must_use]
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the overall deadline in milliseconds.
    #[must_use]
    pub fn deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.deadline_ms = Some(deadline_ms);
        self
    }

    /// Build and validate the request.
    ///
    /// # Errors
    /// Returns `InvalidRequest` if required fields are missing or invalid.
    pub fn build(self) -> Result<GenerationRequest, GatewayError> {
        let tenant_id = self.tenant_id.ok_or_else(|| {
            GatewayError::invalid_request("tenant_id is required", Some("tenant_id".to_string()))
        })?;
        let user_id = self.user_id.ok_or_else(|| {
            GatewayError::invalid_request("user_id is required", Some("user_id".to_string()))
        })?;
        let task_type = self.task_type.ok_or_else(|| {
            GatewayError::invalid_request("task_type is required", Some("task_type".to_string()))
        })?;
        let prompt = self.prompt.ok_or_else(|| {
            GatewayError::invalid_request("prompt is required", Some("prompt".to_string()))
        })?;

        let request = GenerationRequest {
            id: self.id.unwrap_or_else(RequestId::generate),
            tenant_id,
            user_id,
            task_type,
            prompt,
            max_cost_ceiling: self.max_cost_ceiling.unwrap_or(DEFAULT_COST_CEILING_USD),
            preferred_model: self.preferred_model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            deadline_ms: self.deadline_ms,
        };

        request.validate()?;

        Ok(request)
    }
}
