//! HTTP contract tests for the YooKassa client against a mock server.
//!
//! Run with: cargo test --test gateway_test

use kursbot::billing::{CreatePaymentRequest, PaymentGateway, PaymentStatus, YookassaClient};
use kursbot::core::AppError;
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> YookassaClient {
    YookassaClient::new(&server.uri(), "shop-1", "secret").unwrap()
}

fn create_request() -> CreatePaymentRequest {
    CreatePaymentRequest {
        amount: 500_000,
        currency: "RUB".into(),
        description: "Курс «Маркетинг»".into(),
        return_url: "https://t.me/kursbot".into(),
        receipt_email: Some("user@example.com".into()),
        metadata: json!({ "payment_id": "local-1" }),
        save_payment_method: false,
    }
}

#[tokio::test]
async fn create_payment_sends_idempotence_key_and_parses_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payments"))
        .and(header_exists("Idempotence-Key"))
        .and(header_exists("Authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "yk-100",
            "status": "pending",
            "paid": false,
            "amount": { "value": "5000.00", "currency": "RUB" },
            "confirmation": { "type": "redirect", "confirmation_url": "https://pay.example/go" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let created = client(&server).create_payment(&create_request()).await.unwrap();
    assert_eq!(created.external_id, "yk-100");
    assert_eq!(created.status, PaymentStatus::Pending);
    assert_eq!(created.amount, 500_000);
    assert_eq!(created.confirmation_url.as_deref(), Some("https://pay.example/go"));
    assert!(created.payment_method_id.is_none());
}

#[tokio::test]
async fn fetch_payment_surfaces_saved_payment_method() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/payments/yk-200"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "yk-200",
            "status": "succeeded",
            "paid": true,
            "amount": { "value": "990.00", "currency": "RUB" },
            "payment_method": { "type": "bank_card", "id": "pm-9", "saved": true }
        })))
        .mount(&server)
        .await;

    let fetched = client(&server).fetch_payment("yk-200").await.unwrap();
    assert_eq!(fetched.status, PaymentStatus::Succeeded);
    assert!(fetched.paid);
    assert_eq!(fetched.amount, 99_000);
    assert_eq!(fetched.payment_method_id.as_deref(), Some("pm-9"));
}

#[tokio::test]
async fn unsaved_payment_method_is_not_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/payments/yk-201"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "yk-201",
            "status": "succeeded",
            "paid": true,
            "amount": { "value": "990.00", "currency": "RUB" },
            "payment_method": { "type": "bank_card", "id": "pm-10", "saved": false }
        })))
        .mount(&server)
        .await;

    let fetched = client(&server).fetch_payment("yk-201").await.unwrap();
    assert!(fetched.payment_method_id.is_none());
}

#[tokio::test]
async fn server_error_is_a_retryable_failure_not_a_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/payments/yk-300"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let result = client(&server).fetch_payment("yk-300").await;
    match result {
        Err(AppError::HttpStatus(status)) => assert_eq!(status.as_u16(), 500),
        other => panic!("expected HttpStatus error, got {:?}", other.map(|p| p.status)),
    }
}

#[tokio::test]
async fn cancel_payment_reports_gateway_result() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payments/yk-400/cancel"))
        .and(header_exists("Idempotence-Key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "yk-400",
            "status": "canceled",
            "paid": false,
            "amount": { "value": "5000.00", "currency": "RUB" }
        })))
        .mount(&server)
        .await;

    assert!(client(&server).cancel_payment("yk-400").await.unwrap());
}

#[tokio::test]
async fn recurring_charge_posts_saved_method() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payments"))
        .and(header_exists("Idempotence-Key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "yk-500",
            "status": "succeeded",
            "paid": true,
            "amount": { "value": "990.00", "currency": "RUB" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let charged = client(&server)
        .create_recurring(99_000, "Продление подписки", "pm-9")
        .await
        .unwrap();
    assert_eq!(charged.status, PaymentStatus::Succeeded);
    assert_eq!(charged.external_id, "yk-500");
}
