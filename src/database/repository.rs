use crate::database::error::DbResult;
use crate::payments::types::{GatewayStatusCode, PaymentReference};
use crate::reconciliation::transition::{TransactionState, TransitionAction};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Custom field holding the last known hosted checkout id
pub const FIELD_PAYMENT_TRANSACTION_ID: &str = "payment_transaction_id";
/// Custom field holding the last known raw gateway status code
pub const FIELD_PAYMENT_TRANSACTION_STATUS: &str = "payment_transaction_status";

/// Payment fields written onto both the order and its transaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCustomFields {
    pub payment_transaction_id: Option<String>,
    pub payment_transaction_status: Option<String>,
}

impl PaymentCustomFields {
    pub fn new(reference: &PaymentReference, status: GatewayStatusCode) -> Self {
        Self {
            payment_transaction_id: Some(reference.hosted_checkout_id().to_string()),
            payment_transaction_status: Some(status.to_string()),
        }
    }

    pub fn reference(&self) -> Option<PaymentReference> {
        self.payment_transaction_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(PaymentReference::new)
    }

    /// JSON object with only the fields that are set
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        if let Some(id) = &self.payment_transaction_id {
            map.insert(FIELD_PAYMENT_TRANSACTION_ID.to_string(), id.clone().into());
        }
        if let Some(status) = &self.payment_transaction_status {
            map.insert(FIELD_PAYMENT_TRANSACTION_STATUS.to_string(), status.clone().into());
        }
        serde_json::Value::Object(map)
    }

    pub fn from_json(value: &serde_json::Value) -> Self {
        let field = |name: &str| {
            value.get(name).and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
        };
        Self {
            payment_transaction_id: field(FIELD_PAYMENT_TRANSACTION_ID),
            payment_transaction_status: field(FIELD_PAYMENT_TRANSACTION_STATUS),
        }
    }
}

/// An order together with its payment transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderTransaction {
    pub transaction_id: String,
    pub order_id: String,
    pub order_number: String,
    pub amount_total: Decimal,
    /// ISO 4217 code, `None` when the order's currency cannot be resolved
    pub currency: Option<String>,
    pub state: TransactionState,
    pub custom_fields: PaymentCustomFields,
}

impl OrderTransaction {
    pub fn payment_reference(&self) -> Option<PaymentReference> {
        self.custom_fields.reference()
    }
}

/// Narrow persistence contract for orders and their payment transactions
#[async_trait]
pub trait OrderTransactionStore: Send + Sync {
    /// Find the transaction whose stored hosted checkout id matches
    async fn find_by_hosted_checkout_id(
        &self,
        hosted_checkout_id: &str,
    ) -> DbResult<Option<OrderTransaction>>;

    /// Find the payment transaction of an order
    async fn find_by_order_id(&self, order_id: &str) -> DbResult<Option<OrderTransaction>>;

    /// Merge payment custom fields into both the order and the transaction
    async fn save_custom_fields(
        &self,
        order_id: &str,
        transaction_id: &str,
        fields: &PaymentCustomFields,
    ) -> DbResult<()>;

    /// Apply a state machine action.
    ///
    /// Fails with an invalid-transition error when the stored state is not in
    /// the action's allowed-from set.
    async fn apply_transition(
        &self,
        transaction_id: &str,
        action: TransitionAction,
    ) -> DbResult<TransactionState>;
}
