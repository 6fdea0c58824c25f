//! Worldline Direct payment provider implementation
//!
//! Talks to the Worldline Direct server API for hosted checkouts. Requests are
//! signed with the GCS v1HMAC scheme and sent exactly once; the caller decides
//! what to do with a failure.

use crate::error::{AppResult, PaymentError};
use crate::payments::traits::PaymentGateway;
use crate::payments::types::{
    GatewayOperation, GatewayStatusCode, HostedCheckout, PaymentReference,
};
use anyhow::Context;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;
use tracing::{error, info, warn};

type HmacSha256 = Hmac<Sha256>;

const CONTENT_TYPE_JSON: &str = "application/json";

/// Worldline provider configuration
#[derive(Debug, Clone)]
pub struct WorldlineConfig {
    pub merchant_id: String,
    /// API key id sent in the Authorization header
    pub api_key: String,
    pub api_secret: String,
    pub live_mode: bool,
    pub live_endpoint: String,
    pub sandbox_endpoint: String,
    /// Where the hosted checkout sends the customer back to
    pub return_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for WorldlineConfig {
    fn default() -> Self {
        Self {
            merchant_id: String::new(),
            api_key: String::new(),
            api_secret: String::new(),
            live_mode: false,
            live_endpoint: "https://payment.direct.worldline-solutions.com".to_string(),
            sandbox_endpoint: "https://payment.preprod.direct.worldline-solutions.com".to_string(),
            return_url: String::new(),
            timeout_secs: 30,
        }
    }
}

impl WorldlineConfig {
    /// Create config from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let merchant_id = std::env::var("WORLDLINE_MERCHANT_ID")
            .context("WORLDLINE_MERCHANT_ID environment variable is required")?;
        let api_key = std::env::var("WORLDLINE_API_KEY")
            .context("WORLDLINE_API_KEY environment variable is required")?;
        let api_secret = std::env::var("WORLDLINE_API_SECRET")
            .context("WORLDLINE_API_SECRET environment variable is required")?;
        let return_url = std::env::var("WORLDLINE_RETURN_URL")
            .context("WORLDLINE_RETURN_URL environment variable is required")?;

        let live_mode = std::env::var("WORLDLINE_LIVE_MODE")
            .ok()
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let live_endpoint =
            std::env::var("WORLDLINE_LIVE_ENDPOINT").unwrap_or(defaults.live_endpoint);
        let sandbox_endpoint =
            std::env::var("WORLDLINE_SANDBOX_ENDPOINT").unwrap_or(defaults.sandbox_endpoint);

        let timeout_secs = std::env::var("WORLDLINE_TIMEOUT_SECS")
            .ok()
            .map(|s| s.parse::<u64>())
            .transpose()
            .context("WORLDLINE_TIMEOUT_SECS must be a number of seconds")?
            .unwrap_or(defaults.timeout_secs);

        Ok(Self {
            merchant_id,
            api_key,
            api_secret,
            live_mode,
            live_endpoint,
            sandbox_endpoint,
            return_url,
            timeout_secs,
        })
    }

    /// Endpoint for the configured mode, without trailing slash
    pub fn endpoint(&self) -> &str {
        let endpoint = if self.live_mode {
            &self.live_endpoint
        } else {
            &self.sandbox_endpoint
        };
        endpoint.trim_end_matches('/')
    }
}

/// Worldline Direct payment provider
pub struct WorldlineProvider {
    config: WorldlineConfig,
    client: Client,
}

impl WorldlineProvider {
    /// Create a new Worldline provider instance
    pub fn new(config: WorldlineConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &WorldlineConfig {
        &self.config
    }

    /// `GCS v1HMAC` authorization header for a request
    fn authorization(&self, method: &Method, content_type: &str, date: &str, path: &str) -> String {
        let string_to_hash = format!("{}\n{}\n{}\n{}\n", method.as_str(), content_type, date, path);

        let signature = match HmacSha256::new_from_slice(self.config.api_secret.as_bytes()) {
            Ok(mut mac) => {
                mac.update(string_to_hash.as_bytes());
                BASE64.encode(mac.finalize().into_bytes())
            }
            // HMAC accepts keys of any length
            Err(_) => String::new(),
        };

        format!("GCS v1HMAC:{}:{}", self.config.api_key, signature)
    }

    /// Make a signed request to the Worldline API
    async fn make_request<T>(
        &self,
        operation: GatewayOperation,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> AppResult<T>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.config.endpoint(), path);
        let date = chrono::Utc::now()
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string();
        let content_type = if body.is_some() { CONTENT_TYPE_JSON } else { "" };

        let mut request = self
            .client
            .request(method.clone(), &url)
            .header("Date", &date)
            .header(
                "Authorization",
                self.authorization(&method, content_type, &date, path),
            );

        if let Some(body) = body {
            request = request
                .header("Content-Type", CONTENT_TYPE_JSON)
                .body(body.to_string());
        }

        let response = request.send().await.map_err(|e| {
            error!("Worldline {} request failed: {}", operation, e);
            PaymentError::gateway_unavailable(operation.as_str(), e.to_string())
        })?;

        let status = response.status();
        let response_text = response.text().await.map_err(|e| {
            PaymentError::gateway_unavailable(operation.as_str(), e.to_string())
        })?;

        if !status.is_success() {
            error!("Worldline API error during {}: HTTP {}", operation, status);
            return Err(PaymentError::gateway_unavailable(
                operation.as_str(),
                format!("HTTP {}: {}", status, response_text),
            ));
        }

        serde_json::from_str::<T>(&response_text).map_err(|e| {
            error!("Failed to parse Worldline {} response: {}", operation, e);
            PaymentError::gateway_unavailable(
                operation.as_str(),
                format!("Invalid response format: {}", e),
            )
        })
    }

    fn payment_path(
        &self,
        reference: &PaymentReference,
        operation: GatewayOperation,
        action: &str,
    ) -> String {
        format!(
            "/v2/{}/payments/{}/{}",
            self.config.merchant_id,
            reference.payment_id_for(operation),
            action
        )
    }
}

fn require_status_code(
    operation: GatewayOperation,
    status_output: Option<StatusOutput>,
) -> AppResult<GatewayStatusCode> {
    status_output
        .and_then(|output| output.status_code)
        .map(GatewayStatusCode)
        .ok_or_else(|| {
            warn!("Worldline {} response carries no status code", operation);
            PaymentError::gateway_unavailable(operation.as_str(), "response carries no status code")
        })
}

#[async_trait]
impl PaymentGateway for WorldlineProvider {
    async fn create_payment(
        &self,
        amount_minor: i64,
        currency: &str,
        method_filter: i32,
    ) -> AppResult<HostedCheckout> {
        info!(
            "Creating Worldline hosted checkout: {} {} (product filter {})",
            amount_minor, currency, method_filter
        );

        let mut payload = serde_json::json!({
            "order": {
                "amountOfMoney": {
                    "amount": amount_minor,
                    "currencyCode": currency,
                }
            },
            "hostedCheckoutSpecificInput": {
                "returnUrl": self.config.return_url,
            }
        });

        if method_filter != 0 {
            payload["hostedCheckoutSpecificInput"]["paymentProductFilters"] = serde_json::json!({
                "restrictTo": { "products": [method_filter] }
            });
        }

        let path = format!("/v2/{}/hostedcheckouts", self.config.merchant_id);
        let response: CreateHostedCheckoutResponse = self
            .make_request(
                GatewayOperation::CreatePayment,
                Method::POST,
                &path,
                Some(&payload),
            )
            .await?;

        info!(
            "Worldline hosted checkout created: hostedCheckoutId={}",
            response.hosted_checkout_id
        );

        Ok(HostedCheckout {
            reference: PaymentReference::new(response.hosted_checkout_id),
            redirect_url: response.redirect_url,
            return_mac: response.return_mac,
        })
    }

    async fn get_status(&self, reference: &PaymentReference) -> AppResult<GatewayStatusCode> {
        let operation = GatewayOperation::GetStatus;
        let path = self.payment_path(reference, operation, "details");

        let response: PaymentDetailsResponse = self
            .make_request(operation, Method::GET, &path, None)
            .await?;

        let code = require_status_code(operation, response.status_output)?;
        info!("Worldline payment {} has status code {}", reference, code);
        Ok(code)
    }

    async fn capture(
        &self,
        reference: &PaymentReference,
        amount_minor: i64,
    ) -> AppResult<GatewayStatusCode> {
        let operation = GatewayOperation::Capture;
        let path = self.payment_path(reference, operation, "capture");
        let payload = serde_json::json!({
            "amount": amount_minor,
            "isFinal": true,
        });

        let response: PaymentDetailsResponse = self
            .make_request(operation, Method::POST, &path, Some(&payload))
            .await?;

        require_status_code(operation, response.status_output)
    }

    async fn cancel(&self, reference: &PaymentReference) -> AppResult<GatewayStatusCode> {
        let operation = GatewayOperation::Cancel;
        let path = self.payment_path(reference, operation, "cancel");

        let response: CancelPaymentResponse = self
            .make_request(operation, Method::POST, &path, Some(&serde_json::json!({})))
            .await?;

        require_status_code(
            operation,
            response.payment.and_then(|payment| payment.status_output),
        )
    }

    async fn refund(
        &self,
        reference: &PaymentReference,
        amount_minor: i64,
        currency: &str,
        merchant_reference: &str,
    ) -> AppResult<GatewayStatusCode> {
        let operation = GatewayOperation::Refund;
        let path = self.payment_path(reference, operation, "refund");
        let payload = serde_json::json!({
            "amountOfMoney": {
                "amount": amount_minor,
                "currencyCode": currency,
            },
            "references": {
                "merchantReference": merchant_reference,
            }
        });

        let response: PaymentDetailsResponse = self
            .make_request(operation, Method::POST, &path, Some(&payload))
            .await?;

        require_status_code(operation, response.status_output)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateHostedCheckoutResponse {
    hosted_checkout_id: String,
    #[serde(default)]
    redirect_url: Option<String>,
    #[serde(default, rename = "RETURNMAC")]
    return_mac: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusOutput {
    #[serde(default)]
    status_code: Option<i32>,
}

// Shape shared by payment details, capture and refund responses
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentDetailsResponse {
    #[serde(default)]
    status_output: Option<StatusOutput>,
}

#[derive(Debug, Deserialize)]
struct CancelPaymentResponse {
    #[serde(default)]
    payment: Option<PaymentDetailsResponse>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_provider(endpoint: &str) -> WorldlineProvider {
        let config = WorldlineConfig {
            merchant_id: "merchant1".to_string(),
            api_key: "key123".to_string(),
            api_secret: "secret456".to_string(),
            live_mode: false,
            sandbox_endpoint: endpoint.to_string(),
            return_url: "https://shop.example/payment/finalize-transaction".to_string(),
            timeout_secs: 5,
            ..WorldlineConfig::default()
        };
        WorldlineProvider::new(config).unwrap()
    }

    #[test]
    fn test_worldline_config_default() {
        let config = WorldlineConfig::default();
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(
            config.endpoint(),
            "https://payment.preprod.direct.worldline-solutions.com"
        );
        let live = WorldlineConfig {
            live_mode: true,
            ..WorldlineConfig::default()
        };
        assert_eq!(live.endpoint(), "https://payment.direct.worldline-solutions.com");
    }

    #[test]
    fn test_authorization_header_signature() {
        let provider = create_test_provider("http://localhost");
        let date = "Fri, 06 Jun 2025 10:00:00 GMT";
        let path = "/v2/merchant1/payments/123_0/details";

        let header = provider.authorization(&Method::GET, "", date, path);

        let mut mac = HmacSha256::new_from_slice(b"secret456").unwrap();
        mac.update(format!("GET\n\n{}\n{}\n", date, path).as_bytes());
        let expected = BASE64.encode(mac.finalize().into_bytes());
        assert_eq!(header, format!("GCS v1HMAC:key123:{}", expected));
    }

    #[tokio::test]
    async fn test_get_status_uses_payment_suffix() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/merchant1/payments/3204417893_0/details"))
            .and(header_exists("authorization"))
            .and(header_exists("date"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "3204417893_0",
                "status": "CAPTURED",
                "statusOutput": { "statusCode": 9 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = create_test_provider(&server.uri());
        let code = provider
            .get_status(&PaymentReference::new("3204417893"))
            .await
            .unwrap();

        assert_eq!(code, GatewayStatusCode(9));
    }

    #[tokio::test]
    async fn test_missing_status_code_is_gateway_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/merchant1/payments/1_0/details"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "1_0" })))
            .mount(&server)
            .await;

        let provider = create_test_provider(&server.uri());
        let err = provider
            .get_status(&PaymentReference::new("1"))
            .await
            .unwrap_err();

        assert!(matches!(err, PaymentError::GatewayUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_server_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/merchant1/payments/1_0/capture"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let provider = create_test_provider(&server.uri());
        let err = provider
            .capture(&PaymentReference::new("1"), 1999)
            .await
            .unwrap_err();

        assert!(matches!(err, PaymentError::GatewayUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_capture_sends_final_amount() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/merchant1/payments/77_0/capture"))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({ "amount": 1999, "isFinal": true })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "status": "CAPTURE_REQUESTED",
                "statusOutput": { "statusCode": 91 }
            })))
            .mount(&server)
            .await;

        let provider = create_test_provider(&server.uri());
        let code = provider.capture(&PaymentReference::new("77"), 1999).await.unwrap();

        assert_eq!(code, GatewayStatusCode(91));
    }

    #[tokio::test]
    async fn test_cancel_reads_nested_payment_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/merchant1/payments/77_1/cancel"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "payment": { "id": "77_1", "statusOutput": { "statusCode": 6 } }
            })))
            .mount(&server)
            .await;

        let provider = create_test_provider(&server.uri());
        let code = provider.cancel(&PaymentReference::new("77")).await.unwrap();

        assert_eq!(code, GatewayStatusCode(6));
    }

    #[tokio::test]
    async fn test_refund_sends_currency_and_merchant_reference() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/merchant1/payments/77_1/refund"))
            .and(body_json(json!({
                "amountOfMoney": { "amount": 1999, "currencyCode": "EUR" },
                "references": { "merchantReference": "10001" }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "77_1",
                "statusOutput": { "statusCode": 81 }
            })))
            .mount(&server)
            .await;

        let provider = create_test_provider(&server.uri());
        let code = provider
            .refund(&PaymentReference::new("77"), 1999, "EUR", "10001")
            .await
            .unwrap();

        assert_eq!(code, GatewayStatusCode(81));
    }

    #[tokio::test]
    async fn test_create_payment_restricts_product() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/merchant1/hostedcheckouts"))
            .and(body_json(json!({
                "order": { "amountOfMoney": { "amount": 1999, "currencyCode": "EUR" } },
                "hostedCheckoutSpecificInput": {
                    "returnUrl": "https://shop.example/payment/finalize-transaction",
                    "paymentProductFilters": { "restrictTo": { "products": [1] } }
                }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "hostedCheckoutId": "3204417893",
                "redirectUrl": "https://payment.preprod.example/hostedcheckout/abc",
                "RETURNMAC": "f5b66cf9-c64c-4c8d-8171-b47205c89a56"
            })))
            .mount(&server)
            .await;

        let provider = create_test_provider(&server.uri());
        let checkout = provider.create_payment(1999, "EUR", 1).await.unwrap();

        assert_eq!(checkout.reference, PaymentReference::new("3204417893"));
        assert_eq!(
            checkout.return_mac.as_deref(),
            Some("f5b66cf9-c64c-4c8d-8171-b47205c89a56")
        );
        assert!(checkout.redirect_url.is_some());
    }

    #[test]
    fn test_worldline_config_from_env_missing_merchant() {
        std::env::remove_var("WORLDLINE_MERCHANT_ID");

        let config = WorldlineConfig::from_env();
        assert!(config.is_err(), "Config should fail without merchant id");
    }
}
