//! Payment gateway types and data structures
//!
//! References, status codes and amounts exchanged with the hosted checkout gateway.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AppResult, PaymentError};

/// Operation requested from the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayOperation {
    CreatePayment,
    GetStatus,
    Capture,
    Cancel,
    Refund,
}

impl GatewayOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayOperation::CreatePayment => "create_payment",
            GatewayOperation::GetStatus => "get_status",
            GatewayOperation::Capture => "capture",
            GatewayOperation::Cancel => "cancel",
            GatewayOperation::Refund => "refund",
        }
    }

    /// Sub-resource suffix appended to the hosted checkout id.
    ///
    /// `_0` addresses the payment itself, `_1` the cancellation/refund
    /// sub-resource. The choice depends on the operation only.
    pub fn reference_suffix(&self) -> &'static str {
        match self {
            GatewayOperation::CreatePayment
            | GatewayOperation::GetStatus
            | GatewayOperation::Capture => "_0",
            GatewayOperation::Cancel | GatewayOperation::Refund => "_1",
        }
    }
}

impl fmt::Display for GatewayOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hosted checkout id identifying a payment session at the gateway
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentReference(String);

impl PaymentReference {
    pub fn new(hosted_checkout_id: impl Into<String>) -> Self {
        Self(hosted_checkout_id.into())
    }

    /// Extract the hosted checkout id from a gateway payment id such as `"4213_0"`.
    pub fn from_payment_id(payment_id: &str) -> Option<Self> {
        payment_id
            .split('_')
            .next()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(Self::new)
    }

    pub fn hosted_checkout_id(&self) -> &str {
        &self.0
    }

    /// Gateway payment id for the given operation.
    pub fn payment_id_for(&self, operation: GatewayOperation) -> String {
        format!("{}{}", self.0, operation.reference_suffix())
    }
}

impl fmt::Display for PaymentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw numeric status code returned by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GatewayStatusCode(pub i32);

impl GatewayStatusCode {
    /// Status recorded when a hosted checkout has just been created.
    pub const CREATED: GatewayStatusCode = GatewayStatusCode(0);

    pub fn value(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for GatewayStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hosted checkout session returned when a payment is created
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostedCheckout {
    pub reference: PaymentReference,
    /// URL the customer is redirected to
    pub redirect_url: Option<String>,
    /// MAC returned by the gateway for verifying the return call
    pub return_mac: Option<String>,
}

/// Convert a decimal amount into integer minor units (cents).
///
/// Amounts with fractional cents or negative values are rejected.
pub fn to_minor_units(amount: Decimal) -> AppResult<i64> {
    if amount.is_sign_negative() {
        return Err(PaymentError::invalid_amount(amount));
    }

    let minor = amount * Decimal::ONE_HUNDRED;
    if !minor.fract().is_zero() {
        return Err(PaymentError::invalid_amount(amount));
    }

    minor
        .trunc()
        .to_i64()
        .ok_or_else(|| PaymentError::invalid_amount(amount))
}
