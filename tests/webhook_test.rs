mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::*;
use raffle_pay::{
    adapters::{
        http::router,
        khipu::signature::{SIGNATURE_HEADER, sign_notification},
    },
    domain::{order::OrderState, payment::{AttemptState, ProviderStatus}},
};
use tower::ServiceExt;

fn notification(token: &str, signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhooks/khipu")
        .header("content-type", "application/x-www-form-urlencoded");
    if let Some(sig) = signature {
        builder = builder.header(SIGNATURE_HEADER, sig);
    }
    builder
        .body(Body::from(format!(
            "api_version=3.0&notification_token={token}"
        )))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Order with an initiated payment the provider already reports as done.
async fn paid_at_provider(h: &Harness) -> (raffle_pay::domain::id::OrderId, String) {
    let (order, _) = h.lifecycle.create_order(order_params("R1", 2, 3000)).await.unwrap();
    let init = h.lifecycle.initiate(order.id, None, None).await.unwrap();
    h.gateway.set_status(init.payment_id.as_str(), ProviderStatus::Done);
    (order.id, init.notification_token.unwrap())
}

#[tokio::test]
async fn valid_signature_reconciles() {
    let h = harness();
    let (order_id, token) = paid_at_provider(&h).await;
    let sig = sign_notification(WEBHOOK_SECRET, "3.0", &token).unwrap();

    let response = router(h.app_state(Some(WEBHOOK_SECRET)))
        .oneshot(notification(&token, Some(&sig)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "paid");
    let details = h.lifecycle.order_details(order_id).await.unwrap();
    assert_eq!(details.order.state, OrderState::Paid);
}

#[tokio::test]
async fn replayed_notification_is_accepted_without_change() {
    let h = harness();
    let (order_id, token) = paid_at_provider(&h).await;
    let sig = sign_notification(WEBHOOK_SECRET, "3.0", &token).unwrap();
    let app = router(h.app_state(Some(WEBHOOK_SECRET)));

    let first = app.clone().oneshot(notification(&token, Some(&sig))).await.unwrap();
    let before = h.lifecycle.order_details(order_id).await.unwrap();
    let replay = app.oneshot(notification(&token, Some(&sig))).await.unwrap();

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(replay.status(), StatusCode::OK);
    assert_eq!(body_json(replay).await["status"], "already_terminal");
    let after = h.lifecycle.order_details(order_id).await.unwrap();
    assert_eq!(after.order.paid_at, before.order.paid_at);
    assert_eq!(after.order.updated_at, before.order.updated_at);
}

#[tokio::test]
async fn invalid_signature_is_rejected_without_mutation() {
    let h = harness();
    let (order_id, token) = paid_at_provider(&h).await;
    let forged = sign_notification("some_other_secret", "3.0", &token).unwrap();

    let response = router(h.app_state(Some(WEBHOOK_SECRET)))
        .oneshot(notification(&token, Some(&forged)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error_code"], "webhook_error");
    assert!(!body.to_string().contains(&token));
    let details = h.lifecycle.order_details(order_id).await.unwrap();
    assert_eq!(details.order.state, OrderState::Pending);
    assert_eq!(details.attempts[0].state, AttemptState::Pending);
    assert_eq!(h.gateway.gets(), 0);
}

#[tokio::test]
async fn missing_signature_is_rejected() {
    let h = harness();
    let (_, token) = paid_at_provider(&h).await;

    let response = router(h.app_state(Some(WEBHOOK_SECRET)))
        .oneshot(notification(&token, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(h.gateway.gets(), 0);
}

#[tokio::test]
async fn unknown_token_with_bad_signature_looks_the_same() {
    let h = harness();

    let response = router(h.app_state(Some(WEBHOOK_SECRET)))
        .oneshot(notification("tok_unknown", Some("deadbeef")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn missing_secret_rejects_everything() {
    let h = harness();
    let (_, token) = paid_at_provider(&h).await;
    let sig = sign_notification(WEBHOOK_SECRET, "3.0", &token).unwrap();

    let response = router(h.app_state(None))
        .oneshot(notification(&token, Some(&sig)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_form_is_bad_request() {
    let h = harness();
    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/khipu")
        .header("content-type", "application/x-www-form-urlencoded")
        .header(SIGNATURE_HEADER, "deadbeef")
        .body(Body::from("api_version=3.0"))
        .unwrap();

    let response = router(h.app_state(Some(WEBHOOK_SECRET)))
        .oneshot(request)
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(h.gateway.gets(), 0);
}
