//! End-to-end engine pipeline tests over scripted providers.

use crate::helpers::{generous_budget, itinerary_request, Harness};
use crate::mock_providers::{Outcome, ScriptedProvider};
use futures::StreamExt;
use orchestrator_budget::ScopeKey;
use orchestrator_config::{BudgetPeriod, ScopeLimit};
use orchestrator_core::{
    GatewayError, GenerationRequest, RequestId, ScopeKind, TaskType, TenantId, UsageOutcome,
    UserId,
};
use orchestrator_resilience::{CircuitBreakerConfig, CircuitState};
use std::time::Duration;

#[tokio::test]
async fn cache_hit_is_free_and_flagged() {
    let harness = Harness::builder()
        .provider(ScriptedProvider::succeeding("alpha", "Day 1: Alfama"), 60)
        .build();

    let first = harness
        .gateway
        .execute(itinerary_request("Three days in Lisbon"))
        .await
        .expect("first call succeeds");
    assert!(!first.from_cache);
    assert!(first.cost_usd > 0.0);

    let user_key = ScopeKey::user(&UserId::new("user-1"));
    let consumed_after_first = harness.budget.consumed(&user_key).expect("scope exists");

    let second = harness
        .gateway
        .execute(itinerary_request("Three days in Lisbon"))
        .await
        .expect("second call succeeds");
    assert!(second.from_cache);
    assert!((second.cost_usd - 0.0).abs() < f64::EPSILON);
    assert_eq!(second.response, first.response);

    // Zero budget mutation on the cached path.
    let consumed_after_second = harness.budget.consumed(&user_key).expect("scope exists");
    assert!((consumed_after_second - consumed_after_first).abs() < 1e-12);

    let outcomes: Vec<UsageOutcome> = harness
        .store
        .usage_records()
        .iter()
        .map(|record| record.outcome)
        .collect();
    assert_eq!(outcomes, vec![UsageOutcome::Success, UsageOutcome::CacheHit]);
}

#[tokio::test]
async fn budget_denial_names_exhausted_scope() {
    let mut settings = generous_budget();
    settings.tenant_default = ScopeLimit {
        limit_usd: 0.000_000_1,
        period: BudgetPeriod::Daily,
    };

    let harness = Harness::builder()
        .provider(ScriptedProvider::succeeding("alpha", "reply"), 60)
        .budget(settings)
        .build();

    let error = harness
        .gateway
        .execute(itinerary_request("Three days in Lisbon"))
        .await
        .expect_err("reservation must be denied");

    match error {
        GatewayError::BudgetExceeded { scope, scope_id, .. } => {
            assert_eq!(scope, ScopeKind::Tenant);
            assert_eq!(scope_id, "family-1");
        }
        other => panic!("expected BudgetExceeded, got {other:?}"),
    }

    // Denial is terminal: the provider was never called.
    let records = harness.store.usage_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, UsageOutcome::Rejected);
    assert_eq!(records[0].reason.as_deref(), Some("budget_exceeded"));
}

#[tokio::test]
async fn timeout_falls_back_to_next_candidate() {
    // beta has the higher weight so it is attempted first and times out;
    // gamma completes the request.
    let harness = Harness::builder()
        .provider(ScriptedProvider::failing("beta", Outcome::Timeout), 60)
        .provider(ScriptedProvider::succeeding("gamma", "Day 1: Belem"), 20)
        .build();

    let response = harness
        .gateway
        .execute(itinerary_request("Three days in Lisbon"))
        .await
        .expect("fallback succeeds");
    assert_eq!(response.provider_used.as_str(), "gamma");

    // One zero-cost failure record for beta, one costed success for gamma.
    let records = harness.store.usage_records();
    assert_eq!(records.len(), 2);

    let beta = &records[0];
    assert_eq!(beta.provider_id.as_ref().map(|p| p.as_str()), Some("beta"));
    assert_eq!(beta.outcome, UsageOutcome::Failure);
    assert!((beta.cost_usd - 0.0).abs() < f64::EPSILON);
    assert_eq!(beta.reason.as_deref(), Some("timeout"));

    let gamma = &records[1];
    assert_eq!(gamma.provider_id.as_ref().map(|p| p.as_str()), Some("gamma"));
    assert_eq!(gamma.outcome, UsageOutcome::Success);
    assert!(gamma.cost_usd > 0.0);
}

#[tokio::test]
async fn exhaustion_reports_attempts_and_releases_budget() {
    let harness = Harness::builder()
        .provider(ScriptedProvider::failing("beta", Outcome::Timeout), 60)
        .provider(ScriptedProvider::failing("gamma", Outcome::Internal), 20)
        .build();

    let error = harness
        .gateway
        .execute(itinerary_request("Three days in Lisbon"))
        .await
        .expect_err("all candidates fail");

    match &error {
        GatewayError::AllProvidersUnavailable { attempts } => {
            let reasons: Vec<(&str, &str)> = attempts
                .iter()
                .map(|a| (a.provider_id.as_str(), a.reason.as_str()))
                .collect();
            assert_eq!(
                reasons,
                vec![("beta", "timeout"), ("gamma", "provider_internal")]
            );
        }
        other => panic!("expected AllProvidersUnavailable, got {other:?}"),
    }

    // The unused reservation was returned in full.
    let tenant_key = ScopeKey::tenant(&TenantId::new("family-1"));
    let consumed = harness.budget.consumed(&tenant_key).expect("scope exists");
    assert!(consumed.abs() < 1e-12);
}

#[tokio::test]
async fn unsupported_task_fails_fast() {
    let harness = Harness::builder()
        .provider(
            ScriptedProvider::succeeding("alpha", "reply")
                .with_tasks(vec![TaskType::Translation]),
            60,
        )
        .build();

    let error = harness
        .gateway
        .execute(itinerary_request("Three days in Lisbon"))
        .await
        .expect_err("no provider serves itineraries");

    assert!(matches!(error, GatewayError::NoEligibleProvider { .. }));

    // Fail-fast: the provider was never called, budget fully restored.
    let tenant_key = ScopeKey::tenant(&TenantId::new("family-1"));
    let consumed = harness.budget.consumed(&tenant_key).expect("scope exists");
    assert!(consumed.abs() < 1e-12);
}

#[tokio::test]
async fn breaker_opens_after_threshold_and_sheds_load() {
    let failing = ScriptedProvider::failing("flaky", Outcome::Internal);
    let harness = Harness::builder()
        .provider(failing, 60)
        .provider(ScriptedProvider::succeeding("steady", "reply"), 20)
        .breakers(CircuitBreakerConfig {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
            max_cooldown: Duration::from_secs(600),
        })
        .build();

    // Three requests, each absorbing one flaky failure before succeeding.
    for i in 0..3 {
        let response = harness
            .gateway
            .execute(itinerary_request(&format!("Trip variant {i}")))
            .await
            .expect("fallback succeeds");
        assert_eq!(response.provider_used.as_str(), "steady");
    }

    let flaky_id = orchestrator_core::ProviderId::new("flaky");
    let breaker = harness.breakers.get_or_create(&flaky_id);
    assert_eq!(breaker.snapshot().state, CircuitState::Open);

    // While open, routing never returns the provider: the next request goes
    // straight to the healthy candidate with no flaky attempt record.
    let before: usize = failure_count(&harness, "flaky");
    let response = harness
        .gateway
        .execute(itinerary_request("Trip variant shed"))
        .await
        .expect("healthy candidate still serves");
    assert_eq!(response.provider_used.as_str(), "steady");
    assert_eq!(failure_count(&harness, "flaky"), before);
}

fn failure_count(harness: &Harness, provider: &str) -> usize {
    harness
        .store
        .usage_records()
        .iter()
        .filter(|record| {
            record.provider_id.as_ref().map(|p| p.as_str()) == Some(provider)
                && record.outcome == UsageOutcome::Failure
        })
        .count()
}

#[tokio::test]
async fn deadline_exceeded_abandons_slow_provider() {
    let harness = Harness::builder()
        .provider(
            ScriptedProvider::succeeding("slow", "eventually")
                .with_delay(Duration::from_millis(500)),
            60,
        )
        .build();

    let mut request = itinerary_request("Three days in Lisbon");
    request.deadline_ms = Some(50);

    let error = harness
        .gateway
        .execute(request)
        .await
        .expect_err("deadline expires first");

    match error {
        GatewayError::DeadlineExceeded { attempts } => {
            assert_eq!(attempts.len(), 1);
            assert_eq!(attempts[0].reason, "deadline_exceeded");
        }
        other => panic!("expected DeadlineExceeded, got {other:?}"),
    }
}

#[tokio::test]
async fn transient_failure_retries_same_candidate() {
    let provider = ScriptedProvider::new(
        "wobbly",
        Outcome::Success {
            text: "recovered".to_string(),
            units: orchestrator_core::UsageUnits::new(50, 50),
        },
    )
    .with_script(vec![Outcome::RateLimited]);

    let harness = Harness::builder().provider(provider, 60).retries(1).build();

    let response = harness
        .gateway
        .execute(itinerary_request("Three days in Lisbon"))
        .await
        .expect("retry succeeds");
    assert_eq!(response.response, "recovered");

    // The retried candidate settles as one successful attempt.
    let records = harness.store.usage_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, UsageOutcome::Success);
}

#[tokio::test]
async fn preferred_model_wins_routing() {
    let harness = Harness::builder()
        .provider(ScriptedProvider::succeeding("alpha", "from alpha"), 60)
        .provider(ScriptedProvider::succeeding("beta", "from beta"), 20)
        .build();

    let mut request = itinerary_request("Three days in Lisbon");
    request.preferred_model = Some("beta-model".to_string());

    let response = harness.gateway.execute(request).await.expect("succeeds");
    assert_eq!(response.provider_used.as_str(), "beta");
}

#[tokio::test]
async fn invalid_request_is_terminal_with_one_record() {
    let harness = Harness::builder()
        .provider(ScriptedProvider::succeeding("alpha", "reply"), 60)
        .build();

    let request = GenerationRequest {
        id: RequestId::generate(),
        tenant_id: TenantId::new("family-1"),
        user_id: UserId::new("user-1"),
        task_type: TaskType::Chat,
        prompt: "   ".to_string(),
        max_cost_ceiling: 0.5,
        preferred_model: None,
        max_tokens: None,
        temperature: None,
        deadline_ms: None,
    };

    let error = harness
        .gateway
        .execute(request)
        .await
        .expect_err("empty prompt rejected");
    assert!(matches!(error, GatewayError::InvalidRequest { .. }));

    let records = harness.store.usage_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, UsageOutcome::Rejected);
}

#[tokio::test]
async fn streaming_settles_budget_when_stream_finishes() {
    let harness = Harness::builder()
        .provider(ScriptedProvider::succeeding("alpha", "Day 1: Alfama walk"), 60)
        .build();

    let handle = harness
        .gateway
        .execute_stream(itinerary_request("Stream me an itinerary"))
        .await
        .expect("stream establishes");
    assert_eq!(handle.provider_id.as_str(), "alpha");

    let chunks: Vec<_> = handle.stream.collect().await;
    let text: String = chunks
        .iter()
        .filter_map(|item| item.as_ref().ok())
        .map(|chunk| chunk.delta.clone())
        .collect();
    assert_eq!(text, "Day 1: Alfama walk");

    let last = chunks.last().expect("stream not empty");
    assert!(last.as_ref().expect("final chunk ok").done);

    // Actual cost committed once the stream completed.
    let user_key = ScopeKey::user(&UserId::new("user-1"));
    let consumed = harness.budget.consumed(&user_key).expect("scope exists");
    assert!(consumed > 0.0);

    let records = harness.store.usage_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, UsageOutcome::Success);
    assert!(records[0].cost_usd > 0.0);
}
