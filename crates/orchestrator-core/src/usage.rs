//! Append-only usage records for budget reconciliation and analytics.

use crate::types::{ProviderId, RequestId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of the call a usage record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageOutcome {
    /// The provider completed the call.
    Success,
    /// The provider attempt failed.
    Failure,
    /// The response was served from cache; no provider was involved.
    CacheHit,
    /// The request was rejected before any provider was reached.
    Rejected,
}

impl UsageOutcome {
    /// Stable string form used for persistence.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::CacheHit => "cache_hit",
            Self::Rejected => "rejected",
        }
    }
}

/// Immutable usage log entry. Never mutated after write.
///
/// Each provider attempt produces one record; a call that never reaches a
/// provider (validation failure, budget denial, cache hit, empty candidate
/// list) produces exactly one zero-cost terminal record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Record identifier.
    pub id: String,
    /// The request this attempt belonged to.
    pub request_id: RequestId,
    /// Provider attempted, absent for pre-flight outcomes.
    pub provider_id: Option<ProviderId>,
    /// Tokens (or equivalent units) consumed.
    pub units: u32,
    /// Cost in USD. Zero for failures and pre-flight outcomes.
    pub cost_usd: f64,
    /// True when the cost was estimated rather than provider-reported.
    pub estimated: bool,
    /// What happened.
    pub outcome: UsageOutcome,
    /// Failure reason code, when the outcome is a failure or rejection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// When the record was written.
    pub timestamp: DateTime<Utc>,
}

impl UsageRecord {
    /// Record a successful provider call.
    #[must_use]
    pub fn success(
        request_id: RequestId,
        provider_id: ProviderId,
        units: u32,
        cost_usd: f64,
        estimated: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            request_id,
            provider_id: Some(provider_id),
            units,
            cost_usd,
            estimated,
            outcome: UsageOutcome::Success,
            reason: None,
            timestamp: Utc::now(),
        }
    }

    /// Record a failed provider attempt. Failures never carry cost.
    #[must_use]
    pub fn failure(request_id: RequestId, provider_id: ProviderId, reason: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            request_id,
            provider_id: Some(provider_id),
            units: 0,
            cost_usd: 0.0,
            estimated: false,
            outcome: UsageOutcome::Failure,
            reason: Some(reason.into()),
            timestamp: Utc::now(),
        }
    }

    /// Record a cache hit.
    #[must_use]
    pub fn cache_hit(request_id: RequestId) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            request_id,
            provider_id: None,
            units: 0,
            cost_usd: 0.0,
            estimated: false,
            outcome: UsageOutcome::CacheHit,
            reason: None,
            timestamp: Utc::now(),
        }
    }

    /// Record a pre-flight rejection (validation, budget, no candidates).
    #[must_use]
    pub fn rejected(request_id: RequestId, reason: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            request_id,
            provider_id: None,
            units: 0,
            cost_usd: 0.0,
            estimated: false,
            outcome: UsageOutcome::Rejected,
            reason: Some(reason.into()),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_record_is_zero_cost() {
        let record = UsageRecord::failure(
            RequestId::new("req-1"),
            ProviderId::new("openai-primary"),
            "timeout",
        );
        assert_eq!(record.outcome, UsageOutcome::Failure);
        assert!((record.cost_usd - 0.0).abs() < f64::EPSILON);
        assert_eq!(record.units, 0);
    }

    #[test]
    fn test_rejected_record_has_no_provider() {
        let record = UsageRecord::rejected(RequestId::new("req-1"), "budget_exceeded");
        assert!(record.provider_id.is_none());
        assert_eq!(record.reason.as_deref(), Some("budget_exceeded"));
    }
}
