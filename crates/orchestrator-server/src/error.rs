//! HTTP error mapping for the gateway taxonomy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use orchestrator_core::GatewayError;
use serde::Serialize;

/// API error returned to callers.
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

/// JSON error body.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attempts: Vec<AttemptDetail>,
}

#[derive(Debug, Serialize)]
struct AttemptDetail {
    provider: String,
    reason: String,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            GatewayError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            GatewayError::BudgetExceeded { .. } => StatusCode::PAYMENT_REQUIRED,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Timeout { .. } | GatewayError::DeadlineExceeded { .. } => {
                StatusCode::GATEWAY_TIMEOUT
            }
            GatewayError::CircuitOpen { .. }
            | GatewayError::NoEligibleProvider { .. }
            | GatewayError::AllProvidersUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::InvalidCredentials { .. } | GatewayError::ProviderInternal { .. } => {
                StatusCode::BAD_GATEWAY
            }
            GatewayError::Configuration { .. }
            | GatewayError::Storage { .. }
            | GatewayError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(error: GatewayError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        let scope = match &self.0 {
            GatewayError::BudgetExceeded { scope, scope_id, .. } => {
                Some(format!("{scope}:{scope_id}"))
            }
            _ => None,
        };

        let attempts = match &self.0 {
            GatewayError::AllProvidersUnavailable { attempts }
            | GatewayError::DeadlineExceeded { attempts } => attempts
                .iter()
                .map(|attempt| AttemptDetail {
                    provider: attempt.provider_id.to_string(),
                    reason: attempt.reason.clone(),
                })
                .collect(),
            _ => Vec::new(),
        };

        let body = ErrorBody {
            error: ErrorDetail {
                code: self.0.reason_code(),
                message: self.0.to_string(),
                scope,
                attempts,
            },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_core::{AttemptFailure, ProviderId, ScopeKind, TaskType};

    #[test]
    fn test_status_mapping() {
        let invalid = ApiError(GatewayError::invalid_request("bad", None));
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

        let budget = ApiError(GatewayError::BudgetExceeded {
            scope: ScopeKind::Tenant,
            scope_id: "t1".to_string(),
            limit: 1.0,
            consumed: 1.0,
            requested: 0.1,
        });
        assert_eq!(budget.status(), StatusCode::PAYMENT_REQUIRED);

        let routing = ApiError(GatewayError::NoEligibleProvider {
            task_type: TaskType::Chat,
        });
        assert_eq!(routing.status(), StatusCode::SERVICE_UNAVAILABLE);

        let exhausted = ApiError(GatewayError::AllProvidersUnavailable {
            attempts: vec![AttemptFailure::new(ProviderId::new("p1"), "timeout")],
        });
        assert_eq!(exhausted.status(), StatusCode::SERVICE_UNAVAILABLE);

        let deadline = ApiError(GatewayError::DeadlineExceeded { attempts: vec![] });
        assert_eq!(deadline.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
