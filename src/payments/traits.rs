//! Payment gateway trait definitions
//!
//! Defines the interface the reconciliation engine uses to talk to the gateway.

use crate::error::AppResult;
use crate::payments::types::{GatewayStatusCode, HostedCheckout, PaymentReference};
use async_trait::async_trait;

/// Trait for hosted checkout gateway implementations
///
/// Every method is a single remote call without retries. A transport or
/// protocol failure is reported as `PaymentError::GatewayUnavailable`, which
/// callers must treat as "state unknown".
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a hosted checkout session
    ///
    /// # Arguments
    /// * `amount_minor` - Order total in minor units
    /// * `currency` - ISO 4217 currency code
    /// * `method_filter` - Payment product to restrict the checkout to, `0` for none
    async fn create_payment(
        &self,
        amount_minor: i64,
        currency: &str,
        method_filter: i32,
    ) -> AppResult<HostedCheckout>;

    /// Fetch the current status code of a payment
    async fn get_status(&self, reference: &PaymentReference) -> AppResult<GatewayStatusCode>;

    /// Capture an authorized payment (final capture)
    async fn capture(
        &self,
        reference: &PaymentReference,
        amount_minor: i64,
    ) -> AppResult<GatewayStatusCode>;

    /// Cancel a payment that has not been captured yet
    async fn cancel(&self, reference: &PaymentReference) -> AppResult<GatewayStatusCode>;

    /// Refund a captured payment
    ///
    /// # Arguments
    /// * `merchant_reference` - Reference shown on the refund, usually the order number
    async fn refund(
        &self,
        reference: &PaymentReference,
        amount_minor: i64,
        currency: &str,
        merchant_reference: &str,
    ) -> AppResult<GatewayStatusCode>;
}
