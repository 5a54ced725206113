//! YooKassa payment gateway client.
//!
//! The [`PaymentGateway`] trait is the seam between the reconciliation core
//! and the wire: the poller, webhook path and renewal sweep only see the
//! trait, so tests substitute an in-memory gateway.
//!
//! Every create call sends a fresh `Idempotence-Key`: network retries of the
//! same HTTP request cannot double-charge, while a new user-initiated
//! attempt (a new call) gets a new key and a new charge.

use crate::billing::types::{GatewayNotification, GatewayPayment, PaymentStatus};
use crate::core::{AppError, AppResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

/// Parameters for opening a payment on the gateway.
#[derive(Debug, Clone)]
pub struct CreatePaymentRequest {
    /// Amount in kopecks.
    pub amount: i64,
    pub currency: String,
    pub description: String,
    pub return_url: String,
    /// Customer email for the fiscal receipt, when known.
    pub receipt_email: Option<String>,
    /// Free-form metadata echoed back by the gateway (local payment id).
    pub metadata: serde_json::Value,
    /// Ask the gateway to save the payment method for recurring charges.
    pub save_payment_method: bool,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a payment. On any transport or validation error the caller
    /// must not assume a gateway record exists.
    async fn create_payment(&self, req: &CreatePaymentRequest) -> AppResult<GatewayPayment>;

    /// Read-only status query. Failures mean "retry later", never a
    /// terminal local status.
    async fn fetch_payment(&self, external_id: &str) -> AppResult<GatewayPayment>;

    /// Cancel a payment. Returns whether the gateway reports it canceled.
    async fn cancel_payment(&self, external_id: &str) -> AppResult<bool>;

    /// Charge a saved payment method without user interaction (auto-renewal).
    async fn create_recurring(
        &self,
        amount: i64,
        description: &str,
        payment_method_id: &str,
    ) -> AppResult<GatewayPayment>;
}

/// REST client for the YooKassa v3 API.
pub struct YookassaClient {
    http: reqwest::Client,
    api_url: String,
    shop_id: String,
    secret_key: String,
}

impl YookassaClient {
    pub fn new(api_url: &str, shop_id: &str, secret_key: &str) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            shop_id: shop_id.to_string(),
            secret_key: secret_key.to_string(),
        })
    }

    async fn post_payment(&self, body: serde_json::Value) -> AppResult<GatewayPayment> {
        let response = self
            .http
            .post(format!("{}/payments", self.api_url))
            .basic_auth(&self.shop_id, Some(&self.secret_key))
            .header("Idempotence-Key", Uuid::new_v4().to_string())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            log::warn!("Gateway create returned {}: {}", status, text);
            return Err(AppError::HttpStatus(status));
        }

        let raw: YkPayment = response.json().await?;
        raw.into_gateway_payment()
    }
}

#[async_trait]
impl PaymentGateway for YookassaClient {
    async fn create_payment(&self, req: &CreatePaymentRequest) -> AppResult<GatewayPayment> {
        let mut body = json!({
            "amount": { "value": kopecks_to_value(req.amount), "currency": req.currency },
            "capture": true,
            "confirmation": { "type": "redirect", "return_url": req.return_url },
            "description": req.description,
            "metadata": req.metadata,
        });
        if req.save_payment_method {
            body["save_payment_method"] = json!(true);
        }
        if let Some(email) = &req.receipt_email {
            body["receipt"] = json!({
                "customer": { "email": email },
                "items": [{
                    "description": req.description,
                    "quantity": "1",
                    "amount": { "value": kopecks_to_value(req.amount), "currency": req.currency },
                    "vat_code": 1,
                }],
            });
        }
        self.post_payment(body).await
    }

    async fn fetch_payment(&self, external_id: &str) -> AppResult<GatewayPayment> {
        let response = self
            .http
            .get(format!("{}/payments/{}", self.api_url, external_id))
            .basic_auth(&self.shop_id, Some(&self.secret_key))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpStatus(status));
        }

        let raw: YkPayment = response.json().await?;
        raw.into_gateway_payment()
    }

    async fn cancel_payment(&self, external_id: &str) -> AppResult<bool> {
        let response = self
            .http
            .post(format!("{}/payments/{}/cancel", self.api_url, external_id))
            .basic_auth(&self.shop_id, Some(&self.secret_key))
            .header("Idempotence-Key", Uuid::new_v4().to_string())
            .json(&json!({}))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpStatus(status));
        }

        let raw: YkPayment = response.json().await?;
        Ok(map_status(&raw.status) == PaymentStatus::Canceled)
    }

    async fn create_recurring(
        &self,
        amount: i64,
        description: &str,
        payment_method_id: &str,
    ) -> AppResult<GatewayPayment> {
        let body = json!({
            "amount": { "value": kopecks_to_value(amount), "currency": "RUB" },
            "capture": true,
            "payment_method_id": payment_method_id,
            "description": description,
        });
        self.post_payment(body).await
    }
}

/// Parse an inbound webhook payload. Structural problems (wrong type field,
/// unknown event, empty payment id) yield `None` — the caller logs and
/// rejects, nothing propagates.
pub fn parse_notification(raw: &str) -> Option<GatewayNotification> {
    let body: YkNotification = serde_json::from_str(raw).ok()?;
    if body.kind != "notification" || body.object.id.is_empty() {
        return None;
    }
    let status = match body.event.as_str() {
        "payment.succeeded" => PaymentStatus::Succeeded,
        "payment.canceled" => PaymentStatus::Canceled,
        "payment.waiting_for_capture" => PaymentStatus::Pending,
        _ => return None,
    };
    Some(GatewayNotification {
        event: body.event,
        external_id: body.object.id,
        status,
    })
}

// ── wire format ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct YkPayment {
    id: String,
    status: String,
    #[serde(default)]
    paid: bool,
    amount: YkAmount,
    confirmation: Option<YkConfirmation>,
    payment_method: Option<YkPaymentMethod>,
}

#[derive(Debug, Deserialize)]
struct YkAmount {
    value: String,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct YkConfirmation {
    confirmation_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct YkPaymentMethod {
    id: String,
    #[serde(default)]
    saved: bool,
}

#[derive(Debug, Deserialize)]
struct YkNotification {
    #[serde(rename = "type")]
    kind: String,
    event: String,
    object: YkNotificationObject,
}

#[derive(Debug, Deserialize)]
struct YkNotificationObject {
    id: String,
    #[serde(default)]
    #[allow(dead_code)]
    status: String,
}

impl YkPayment {
    fn into_gateway_payment(self) -> AppResult<GatewayPayment> {
        let amount = value_to_kopecks(&self.amount.value)
            .ok_or_else(|| AppError::Gateway(format!("unparseable amount '{}'", self.amount.value)))?;
        Ok(GatewayPayment {
            status: map_status(&self.status),
            external_id: self.id,
            paid: self.paid,
            amount,
            currency: self.amount.currency,
            confirmation_url: self.confirmation.and_then(|c| c.confirmation_url),
            payment_method_id: self.payment_method.filter(|m| m.saved).map(|m| m.id),
        })
    }
}

fn map_status(raw: &str) -> PaymentStatus {
    match raw {
        "succeeded" => PaymentStatus::Succeeded,
        "canceled" => PaymentStatus::Canceled,
        "pending" | "waiting_for_capture" => PaymentStatus::Pending,
        other => {
            log::warn!("Unknown gateway status '{}', treating as pending", other);
            PaymentStatus::Pending
        }
    }
}

/// "5000.00" ← 500000 kopecks.
fn kopecks_to_value(kopecks: i64) -> String {
    format!("{}.{:02}", kopecks / 100, kopecks % 100)
}

fn value_to_kopecks(value: &str) -> Option<i64> {
    let (rubles, cents) = match value.split_once('.') {
        Some((r, c)) => (r, c),
        None => (value, "0"),
    };
    let rubles: i64 = rubles.parse().ok()?;
    let cents: i64 = match cents.len() {
        0 => 0,
        1 => cents.parse::<i64>().ok()? * 10,
        2 => cents.parse().ok()?,
        _ => return None,
    };
    Some(rubles * 100 + cents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_conversion_round_trip() {
        assert_eq!(kopecks_to_value(500_000), "5000.00");
        assert_eq!(kopecks_to_value(99), "0.99");
        assert_eq!(value_to_kopecks("5000.00"), Some(500_000));
        assert_eq!(value_to_kopecks("5000"), Some(500_000));
        assert_eq!(value_to_kopecks("5000.5"), Some(500_050));
        assert_eq!(value_to_kopecks("not-a-number"), None);
    }

    #[test]
    fn parse_valid_notification() {
        let raw = r#"{
            "type": "notification",
            "event": "payment.succeeded",
            "object": { "id": "yk-42", "status": "succeeded" }
        }"#;
        let note = parse_notification(raw).unwrap();
        assert_eq!(note.external_id, "yk-42");
        assert_eq!(note.status, PaymentStatus::Succeeded);
        assert_eq!(note.event, "payment.succeeded");
    }

    #[test]
    fn parse_rejects_malformed_payloads() {
        assert!(parse_notification("").is_none());
        assert!(parse_notification("{").is_none());
        assert!(parse_notification(r#"{"type":"refund","event":"payment.succeeded","object":{"id":"x"}}"#).is_none());
        assert!(parse_notification(r#"{"type":"notification","event":"unknown.event","object":{"id":"x"}}"#).is_none());
        assert!(
            parse_notification(r#"{"type":"notification","event":"payment.succeeded","object":{"id":""}}"#).is_none()
        );
    }

    #[test]
    fn unknown_gateway_status_maps_to_pending() {
        assert_eq!(map_status("some_future_state"), PaymentStatus::Pending);
        assert_eq!(map_status("waiting_for_capture"), PaymentStatus::Pending);
        assert_eq!(map_status("canceled"), PaymentStatus::Canceled);
    }
}
