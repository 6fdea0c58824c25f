use crate::database::error::{DatabaseError, DbResult};
use crate::database::repository::{OrderTransaction, OrderTransactionStore, PaymentCustomFields};
use crate::reconciliation::transition::{TransactionState, TransitionAction};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A transition the store accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedTransition {
    pub transaction_id: String,
    pub action: TransitionAction,
    pub from: TransactionState,
    pub to: TransactionState,
}

#[derive(Debug, Default)]
struct Inner {
    /// Keyed by order id
    transactions: HashMap<String, OrderTransaction>,
    order_custom_fields: HashMap<String, PaymentCustomFields>,
    transitions: Vec<AppliedTransition>,
}

/// A thread-safe in-memory order transaction store.
///
/// Enforces the same allowed-from rules as the database and records every
/// accepted transition. Used for tests and local runs without Postgres.
#[derive(Default, Clone)]
pub struct InMemoryOrderTransactionStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryOrderTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an order with a single payment transaction.
    pub async fn seed_order(
        &self,
        order_number: &str,
        amount_total: Decimal,
        currency: Option<&str>,
        state: TransactionState,
    ) -> OrderTransaction {
        let tx = OrderTransaction {
            transaction_id: Uuid::new_v4().to_string(),
            order_id: Uuid::new_v4().to_string(),
            order_number: order_number.to_string(),
            amount_total,
            currency: currency.map(str::to_string),
            state,
            custom_fields: PaymentCustomFields::default(),
        };
        self.insert(tx.clone()).await;
        tx
    }

    pub async fn insert(&self, tx: OrderTransaction) {
        let mut inner = self.inner.write().await;
        inner
            .order_custom_fields
            .insert(tx.order_id.clone(), tx.custom_fields.clone());
        inner.transactions.insert(tx.order_id.clone(), tx);
    }

    /// Every accepted transition, oldest first
    pub async fn transitions(&self) -> Vec<AppliedTransition> {
        self.inner.read().await.transitions.clone()
    }

    pub async fn order_custom_fields(&self, order_id: &str) -> Option<PaymentCustomFields> {
        self.inner.read().await.order_custom_fields.get(order_id).cloned()
    }
}

#[async_trait]
impl OrderTransactionStore for InMemoryOrderTransactionStore {
    async fn find_by_hosted_checkout_id(
        &self,
        hosted_checkout_id: &str,
    ) -> DbResult<Option<OrderTransaction>> {
        let inner = self.inner.read().await;
        Ok(inner
            .transactions
            .values()
            .find(|tx| {
                tx.custom_fields.payment_transaction_id.as_deref() == Some(hosted_checkout_id)
            })
            .cloned())
    }

    async fn find_by_order_id(&self, order_id: &str) -> DbResult<Option<OrderTransaction>> {
        let inner = self.inner.read().await;
        Ok(inner.transactions.get(order_id).cloned())
    }

    async fn save_custom_fields(
        &self,
        order_id: &str,
        transaction_id: &str,
        fields: &PaymentCustomFields,
    ) -> DbResult<()> {
        let mut inner = self.inner.write().await;

        let tx = inner
            .transactions
            .get_mut(order_id)
            .filter(|tx| tx.transaction_id == transaction_id)
            .ok_or_else(|| DatabaseError::not_found("OrderTransaction", transaction_id))?;
        merge(&mut tx.custom_fields, fields);

        let order_fields = inner
            .order_custom_fields
            .entry(order_id.to_string())
            .or_default();
        merge(order_fields, fields);

        Ok(())
    }

    async fn apply_transition(
        &self,
        transaction_id: &str,
        action: TransitionAction,
    ) -> DbResult<TransactionState> {
        let mut inner = self.inner.write().await;

        let tx = inner
            .transactions
            .values_mut()
            .find(|tx| tx.transaction_id == transaction_id)
            .ok_or_else(|| DatabaseError::not_found("OrderTransaction", transaction_id))?;

        let from = tx.state;
        if from == action.target() {
            return Ok(from);
        }
        if !action.is_allowed_from(from) {
            return Err(DatabaseError::invalid_transition(
                from.technical_name(),
                action.target().technical_name(),
            )
            .with_context(format!("transaction {}", transaction_id)));
        }
        tx.state = action.target();
        let to = tx.state;

        inner.transitions.push(AppliedTransition {
            transaction_id: transaction_id.to_string(),
            action,
            from,
            to,
        });

        Ok(to)
    }
}

fn merge(target: &mut PaymentCustomFields, update: &PaymentCustomFields) {
    if let Some(id) = &update.payment_transaction_id {
        target.payment_transaction_id = Some(id.clone());
    }
    if let Some(status) = &update.payment_transaction_status {
        target.payment_transaction_status = Some(status.clone());
    }
}
