//! HTTP surface tests over the assembled gateway.

use crate::helpers::{generous_budget, Harness};
use crate::mock_providers::ScriptedProvider;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use orchestrator_config::{BudgetPeriod, ScopeLimit};
use orchestrator_server::create_router;
use tower::ServiceExt;

fn generate_request(prompt: &str) -> Request<Body> {
    let body = serde_json::json!({
        "prompt": prompt,
        "user_id": "user-1",
        "tenant_id": "family-1",
        "task_type": "itinerary"
    });
    Request::builder()
        .method("POST")
        .uri("/v1/generate")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request builds")
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body collects")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("body is JSON")
}

#[tokio::test]
async fn generate_returns_full_response_shape() {
    let harness = Harness::builder()
        .provider(ScriptedProvider::succeeding("alpha", "Day 1: Alfama"), 60)
        .build();
    let app = create_router(harness.app_state(), 1024 * 1024);

    let response = app
        .oneshot(generate_request("Three days in Lisbon"))
        .await
        .expect("request completes");
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["response"], "Day 1: Alfama");
    assert_eq!(json["provider_used"], "alpha");
    assert_eq!(json["model_used"], "alpha-model");
    assert_eq!(json["from_cache"], false);
    assert!(json["cost_usd"].as_f64().expect("cost present") > 0.0);
    assert_eq!(json["tokens_used"]["total"], 300);
    assert!(json["generation_id"].as_str().is_some());
}

#[tokio::test]
async fn second_identical_request_served_from_cache() {
    let harness = Harness::builder()
        .provider(ScriptedProvider::succeeding("alpha", "Day 1: Alfama"), 60)
        .build();
    let state = harness.app_state();

    let first = create_router(state.clone(), 1024 * 1024)
        .oneshot(generate_request("Three days in Lisbon"))
        .await
        .expect("first completes");
    assert_eq!(first.status(), StatusCode::OK);

    let second = create_router(state, 1024 * 1024)
        .oneshot(generate_request("Three days in Lisbon"))
        .await
        .expect("second completes");
    let json = body_json(second).await;
    assert_eq!(json["from_cache"], true);
    assert_eq!(json["cost_usd"], 0.0);
}

#[tokio::test]
async fn budget_denial_maps_to_payment_required() {
    let mut settings = generous_budget();
    settings.user_default = ScopeLimit {
        limit_usd: 0.000_000_1,
        period: BudgetPeriod::Daily,
    };
    let harness = Harness::builder()
        .provider(ScriptedProvider::succeeding("alpha", "reply"), 60)
        .budget(settings)
        .build();
    let app = create_router(harness.app_state(), 1024 * 1024);

    let response = app
        .oneshot(generate_request("Three days in Lisbon"))
        .await
        .expect("request completes");
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);

    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "budget_exceeded");
    assert_eq!(json["error"]["scope"], "user:user-1");
}

#[tokio::test]
async fn metrics_expose_request_outcomes() {
    let harness = Harness::builder()
        .provider(ScriptedProvider::succeeding("alpha", "reply"), 60)
        .build();
    let state = harness.app_state();

    let _ = create_router(state.clone(), 1024 * 1024)
        .oneshot(generate_request("Three days in Lisbon"))
        .await
        .expect("generate completes");

    let response = create_router(state, 1024 * 1024)
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("metrics respond");
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body collects")
        .to_bytes();
    let text = String::from_utf8(bytes.to_vec()).expect("utf8");
    assert!(text.contains("gateway_requests_total"));
    assert!(text.contains("gateway_scope_consumed_usd"));
}

#[tokio::test]
async fn admin_providers_reports_profiles() {
    let harness = Harness::builder()
        .provider(ScriptedProvider::succeeding("alpha", "reply"), 60)
        .build();
    let app = create_router(harness.app_state(), 1024 * 1024);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/admin/providers")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("admin responds");
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json[0]["profile"]["provider_id"], "alpha");
    assert_eq!(json[0]["profile"]["weight"], 60);
}
