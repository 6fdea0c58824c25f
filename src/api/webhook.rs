//! Server-to-server status notifications
//!
//! Every delivery is acknowledged with an empty 200 so the gateway never
//! retries. The pushed status is only logged; the order is reconciled by
//! polling the gateway.

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{error, info, warn};

use crate::api::AppState;
use crate::config::WebhookConfig;
use crate::payments::types::{GatewayStatusCode, PaymentReference};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-gcs-signature";
pub const KEY_ID_HEADER: &str = "x-gcs-keyid";

/// Largest delivery read into memory
pub const WEBHOOK_BODY_LIMIT: usize = 1024 * 1024;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebhookEvent {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, rename = "type")]
    event_type: Option<String>,
    #[serde(default)]
    merchant_id: Option<String>,
    #[serde(default)]
    payment: Option<WebhookPayment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebhookPayment {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status_output: Option<WebhookStatusOutput>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebhookStatusOutput {
    #[serde(default)]
    status_code: Option<i32>,
}

/// A well-formed status notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookNotification {
    pub event_id: Option<String>,
    pub event_type: Option<String>,
    pub merchant_id: Option<String>,
    pub reference: PaymentReference,
    pub pushed_status: GatewayStatusCode,
}

/// Parse a delivery. `None` when the payment id or status code is missing.
pub fn parse_notification(body: &[u8]) -> Option<WebhookNotification> {
    let event: WebhookEvent = serde_json::from_slice(body).ok()?;
    let payment = event.payment?;
    let reference = PaymentReference::from_payment_id(payment.id.as_deref()?)?;
    let status_code = payment.status_output?.status_code?;

    Some(WebhookNotification {
        event_id: event.id,
        event_type: event.event_type,
        merchant_id: event.merchant_id,
        reference,
        pushed_status: GatewayStatusCode(status_code),
    })
}

/// Check `X-GCS-KeyId` and the base64 HMAC-SHA256 of the raw body.
pub fn verify_signature(headers: &HeaderMap, body: &[u8], webhook: &WebhookConfig) -> bool {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    if header(KEY_ID_HEADER) != Some(webhook.key_id.as_str()) {
        return false;
    }

    let Some(signature) = header(SIGNATURE_HEADER).and_then(|s| BASE64.decode(s.trim()).ok())
    else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(webhook.secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> StatusCode {
    let body = match to_bytes(body, WEBHOOK_BODY_LIMIT).await {
        Ok(body) => body,
        Err(e) => {
            error!("Webhook body could not be read, delivery ignored: {}", e);
            return StatusCode::OK;
        }
    };

    if let Some(webhook) = &state.config.webhook {
        if !verify_signature(&headers, &body, webhook) {
            warn!("Webhook signature verification failed, delivery ignored");
            return StatusCode::OK;
        }
    }

    let Some(notification) = parse_notification(&body) else {
        error!(
            payload = %String::from_utf8_lossy(&body),
            "Webhook payload has wrong format"
        );
        return StatusCode::OK;
    };

    info!(
        event_id = notification.event_id.as_deref().unwrap_or("-"),
        event_type = notification.event_type.as_deref().unwrap_or("-"),
        merchant_id = notification.merchant_id.as_deref().unwrap_or("-"),
        hosted_checkout_id = %notification.reference,
        status_code = notification.pushed_status.value(),
        "Webhook received"
    );

    match state.engine.reconcile(&notification.reference).await {
        Ok(transaction_state) => {
            info!(
                hosted_checkout_id = %notification.reference,
                "Webhook reconciled, transaction is '{}'",
                transaction_state
            );
        }
        Err(e) if e.is_recoverable() => {
            warn!(hosted_checkout_id = %notification.reference, "Webhook not applied: {}", e);
        }
        Err(e) => {
            error!(
                hosted_checkout_id = %notification.reference,
                "Webhook reconciliation failed: {}",
                e
            );
        }
    }

    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        BASE64.encode(mac.finalize().into_bytes())
    }

    fn webhook_config() -> WebhookConfig {
        WebhookConfig {
            key_id: "key-1".to_string(),
            secret: "whsec".to_string(),
        }
    }

    #[test]
    fn test_parse_notification() {
        let body = br#"{"id":"evt-1","type":"payment.captured","merchantId":"m1",
            "payment":{"id":"3204417893_0","statusOutput":{"statusCode":9}}}"#;

        let notification = parse_notification(body).unwrap();

        assert_eq!(notification.reference, PaymentReference::new("3204417893"));
        assert_eq!(notification.pushed_status, GatewayStatusCode(9));
        assert_eq!(notification.event_type.as_deref(), Some("payment.captured"));
    }

    #[test]
    fn test_parse_rejects_incomplete_payloads() {
        assert!(parse_notification(br#"{"payment":{"id":"1_0"}}"#).is_none());
        assert!(parse_notification(br#"{"payment":{"id":"1_0","statusOutput":{}}}"#).is_none());
        let missing_id = br#"{"payment":{"id":"_0","statusOutput":{"statusCode":9}}}"#;
        assert!(parse_notification(missing_id).is_none());
        assert!(parse_notification(b"not json").is_none());
    }

    #[test]
    fn test_signature_verification() {
        let body = br#"{"payment":{"id":"1_0","statusOutput":{"statusCode":9}}}"#;
        let config = webhook_config();
        let mut headers = HeaderMap::new();
        headers.insert(KEY_ID_HEADER, HeaderValue::from_static("key-1"));
        headers.insert(
            SIGNATURE_HEADER,
            HeaderValue::from_str(&sign("whsec", body)).unwrap(),
        );

        assert!(verify_signature(&headers, body, &config));
        assert!(!verify_signature(&headers, b"tampered", &config));

        headers.insert(KEY_ID_HEADER, HeaderValue::from_static("other"));
        assert!(!verify_signature(&headers, body, &config));
    }
}
