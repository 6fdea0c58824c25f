//! Reconciliation engine
//!
//! Polls the gateway, records the observed status on the order and moves the
//! order transaction to the matching local state. Follow-up operations
//! (capture, cancel, refund) are guarded by the state read from the store
//! inside the order lock.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::database::repository::{OrderTransaction, OrderTransactionStore, PaymentCustomFields};
use crate::error::{AppResult, PaymentError};
use crate::payments::status::map_status;
use crate::payments::traits::PaymentGateway;
use crate::payments::types::{to_minor_units, GatewayStatusCode, HostedCheckout, PaymentReference};
use crate::reconciliation::lock::OrderLocks;
use crate::reconciliation::transition::{TransactionState, TransitionApplier};

/// What an order edit touched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderEditScope {
    Order,
    Transaction,
}

/// State change requested by an order edit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderEditAction {
    Cancel,
    Refund,
}

/// Back-office order edit delivered to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEditEvent {
    pub scope: OrderEditScope,
    pub action: OrderEditAction,
}

/// Result of handling an order edit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEditOutcome {
    /// False when the order has no hosted checkout payment
    pub handled: bool,
    /// True when the gateway confirmed the requested final state
    pub success: bool,
}

pub struct ReconciliationEngine {
    gateway: Arc<dyn PaymentGateway>,
    store: Arc<dyn OrderTransactionStore>,
    applier: TransitionApplier,
    locks: OrderLocks,
}

impl ReconciliationEngine {
    pub fn new(gateway: Arc<dyn PaymentGateway>, store: Arc<dyn OrderTransactionStore>) -> Self {
        Self {
            applier: TransitionApplier::new(store.clone()),
            gateway,
            store,
            locks: OrderLocks::new(),
        }
    }

    pub fn locks(&self) -> &OrderLocks {
        &self.locks
    }

    pub fn store(&self) -> &Arc<dyn OrderTransactionStore> {
        &self.store
    }

    /// Resolve the order owning a hosted checkout id
    pub async fn find_by_reference(
        &self,
        reference: &PaymentReference,
    ) -> AppResult<OrderTransaction> {
        self.store
            .find_by_hosted_checkout_id(reference.hosted_checkout_id())
            .await?
            .ok_or_else(|| PaymentError::transaction_not_found(reference.hosted_checkout_id()))
    }

    /// Start a hosted checkout for an order and remember its id.
    #[instrument(skip(self))]
    pub async fn create_payment(
        &self,
        order_id: &str,
        method_filter: i32,
    ) -> AppResult<HostedCheckout> {
        self.locks
            .with_order_lock(order_id, async {
                let tx = self.load_order(order_id).await?;
                let currency = Self::require_currency(&tx)?;
                let amount = to_minor_units(tx.amount_total)?;

                let checkout = self
                    .gateway
                    .create_payment(amount, &currency, method_filter)
                    .await?;

                self.store
                    .save_custom_fields(
                        &tx.order_id,
                        &tx.transaction_id,
                        &PaymentCustomFields::new(&checkout.reference, GatewayStatusCode::CREATED),
                    )
                    .await?;

                info!(
                    order_id = %tx.order_id,
                    hosted_checkout_id = %checkout.reference,
                    amount_minor = amount,
                    "Hosted checkout created"
                );
                Ok(checkout)
            })
            .await
    }

    /// Poll the gateway and bring the local transaction in line with it.
    ///
    /// Returns the resulting state, unchanged when the gateway reports an
    /// unknown status code.
    #[instrument(skip(self, reference), fields(hosted_checkout_id = %reference))]
    pub async fn reconcile(&self, reference: &PaymentReference) -> AppResult<TransactionState> {
        let order_id = self.find_by_reference(reference).await?.order_id;

        self.locks
            .with_order_lock(&order_id, async {
                let code = self.gateway.get_status(reference).await?;
                let tx = self.load_order(&order_id).await?;
                self.apply_status_code(&tx, reference, code).await
            })
            .await
    }

    /// Capture an authorized payment. Only allowed while the transaction is open.
    #[instrument(skip(self))]
    pub async fn capture_payment(&self, order_id: &str) -> AppResult<TransactionState> {
        self.locks
            .with_order_lock(order_id, async {
                let tx = self.load_order(order_id).await?;
                let reference = Self::require_reference(&tx)?;
                Self::guard_state(&tx, TransactionState::Open)?;
                let amount = to_minor_units(tx.amount_total)?;

                let code = self.gateway.capture(&reference, amount).await?;
                self.apply_status_code(&tx, &reference, code).await
            })
            .await
    }

    /// Cancel a payment that was not captured yet.
    ///
    /// Returns true only when the gateway reports the payment cancelled.
    #[instrument(skip(self))]
    pub async fn cancel_payment(&self, order_id: &str) -> AppResult<bool> {
        self.locks
            .with_order_lock(order_id, async {
                let tx = self.load_order(order_id).await?;
                let reference = Self::require_reference(&tx)?;
                Self::guard_state(&tx, TransactionState::Open)?;

                let code = self.gateway.cancel(&reference).await?;
                let state = self.apply_status_code(&tx, &reference, code).await?;
                Ok(state == TransactionState::Cancelled)
            })
            .await
    }

    /// Refund a captured payment in full.
    ///
    /// Returns true only when the gateway reports the payment refunded.
    #[instrument(skip(self))]
    pub async fn refund_payment(&self, order_id: &str) -> AppResult<bool> {
        self.locks
            .with_order_lock(order_id, async {
                let tx = self.load_order(order_id).await?;
                let reference = Self::require_reference(&tx)?;
                Self::guard_state(&tx, TransactionState::Paid)?;
                let currency = Self::require_currency(&tx)?;
                let amount = to_minor_units(tx.amount_total)?;

                let code = self
                    .gateway
                    .refund(&reference, amount, &currency, &tx.order_number)
                    .await?;
                let state = self.apply_status_code(&tx, &reference, code).await?;
                Ok(state == TransactionState::Refunded)
            })
            .await
    }

    /// Route a back-office order edit to the matching gateway operation.
    ///
    /// Orders without a hosted checkout payment are ignored.
    pub async fn handle_order_edit(
        &self,
        order_id: &str,
        event: OrderEditEvent,
    ) -> AppResult<OrderEditOutcome> {
        let tx = self.load_order(order_id).await?;
        if tx.payment_reference().is_none() {
            info!(order_id = %order_id, "Order has no hosted checkout payment, edit ignored");
            return Ok(OrderEditOutcome {
                handled: false,
                success: false,
            });
        }

        let success = match (event.scope, event.action) {
            (OrderEditScope::Transaction, OrderEditAction::Cancel) => {
                self.cancel_payment(order_id).await?
            }
            (OrderEditScope::Transaction, OrderEditAction::Refund)
            | (OrderEditScope::Order, OrderEditAction::Refund) => {
                self.refund_payment(order_id).await?
            }
            // Cancelling the whole order gives the money back.
            (OrderEditScope::Order, OrderEditAction::Cancel) => {
                self.refund_payment(order_id).await?
            }
        };

        Ok(OrderEditOutcome {
            handled: true,
            success,
        })
    }

    async fn load_order(&self, order_id: &str) -> AppResult<OrderTransaction> {
        self.store
            .find_by_order_id(order_id)
            .await?
            .ok_or_else(|| PaymentError::transaction_not_found(order_id))
    }

    /// Persist the observed code and move the transaction to its mapped state.
    async fn apply_status_code(
        &self,
        tx: &OrderTransaction,
        reference: &PaymentReference,
        code: GatewayStatusCode,
    ) -> AppResult<TransactionState> {
        self.store
            .save_custom_fields(
                &tx.order_id,
                &tx.transaction_id,
                &PaymentCustomFields::new(reference, code),
            )
            .await?;

        let status = map_status(code);
        let Some(target) = status.target_state() else {
            let err = PaymentError::UnknownStatusCode { code: code.value() };
            warn!(
                order_id = %tx.order_id,
                hosted_checkout_id = %reference,
                status_code = code.value(),
                "{}; transaction left in '{}'",
                err,
                tx.state
            );
            return Ok(tx.state);
        };

        info!(
            order_id = %tx.order_id,
            hosted_checkout_id = %reference,
            status_code = code.value(),
            "Gateway reports {:?}, target state '{}'",
            status,
            target
        );

        self.applier.apply(tx, target).await
    }

    fn guard_state(tx: &OrderTransaction, required: TransactionState) -> AppResult<()> {
        if tx.state != required {
            let err = PaymentError::OperationNotAllowed { current: tx.state };
            warn!(order_id = %tx.order_id, "{}", err);
            return Err(err);
        }
        Ok(())
    }

    fn require_reference(tx: &OrderTransaction) -> AppResult<PaymentReference> {
        tx.payment_reference()
            .ok_or_else(|| PaymentError::transaction_not_found(tx.order_id.as_str()))
    }

    fn require_currency(tx: &OrderTransaction) -> AppResult<String> {
        match tx.currency.as_deref().filter(|c| !c.is_empty()) {
            Some(currency) => Ok(currency.to_string()),
            None => {
                let err = PaymentError::CurrencyUnresolvable {
                    order_id: tx.order_id.clone(),
                };
                warn!(order_id = %tx.order_id, "{}", err);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemoryOrderTransactionStore;
    use crate::payments::providers::mock::{GatewayCall, MockGateway};
    use rust_decimal_macros::dec;

    async fn setup(
        state: TransactionState,
        currency: Option<&str>,
    ) -> (ReconciliationEngine, MockGateway, InMemoryOrderTransactionStore, OrderTransaction) {
        let store = InMemoryOrderTransactionStore::new();
        let tx = store.seed_order("10001", dec!(19.99), currency, state).await;
        store
            .save_custom_fields(
                &tx.order_id,
                &tx.transaction_id,
                &PaymentCustomFields::new(
                    &PaymentReference::new("3204417893"),
                    GatewayStatusCode(0),
                ),
            )
            .await
            .unwrap();
        let gateway = MockGateway::new();
        let engine = ReconciliationEngine::new(Arc::new(gateway.clone()), Arc::new(store.clone()));
        (engine, gateway, store, tx)
    }

    #[tokio::test]
    async fn test_create_payment_stores_checkout_id() {
        let store = InMemoryOrderTransactionStore::new();
        let tx = store
            .seed_order("10001", dec!(19.99), Some("EUR"), TransactionState::Open)
            .await;
        let gateway = MockGateway::new().with_checkout_id("88001");
        let engine = ReconciliationEngine::new(Arc::new(gateway.clone()), Arc::new(store.clone()));

        let checkout = engine.create_payment(&tx.order_id, 0).await.unwrap();

        assert_eq!(checkout.reference, PaymentReference::new("88001"));
        assert_eq!(
            gateway.calls(),
            vec![GatewayCall::CreatePayment {
                amount_minor: 1999,
                currency: "EUR".to_string(),
                method_filter: 0
            }]
        );
        let stored = store.find_by_hosted_checkout_id("88001").await.unwrap().unwrap();
        assert_eq!(stored.custom_fields.payment_transaction_status.as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn test_reconcile_captured_marks_paid() {
        let (engine, gateway, store, _) = setup(TransactionState::InProgress, Some("EUR")).await;
        gateway.push_status(GatewayStatusCode(5));

        let state = engine.reconcile(&PaymentReference::new("3204417893")).await.unwrap();

        assert_eq!(state, TransactionState::Paid);
        let transitions = store.transitions().await;
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].from, TransactionState::InProgress);
    }

    #[tokio::test]
    async fn test_unknown_code_keeps_state_but_records_code() {
        let (engine, gateway, store, tx) = setup(TransactionState::Open, Some("EUR")).await;
        gateway.push_status(GatewayStatusCode(3));

        let state = engine.reconcile(&PaymentReference::new("3204417893")).await.unwrap();

        assert_eq!(state, TransactionState::Open);
        assert!(store.transitions().await.is_empty());
        let fields = store.order_custom_fields(&tx.order_id).await.unwrap();
        assert_eq!(fields.payment_transaction_status.as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_gateway_failure_changes_nothing() {
        let (engine, gateway, store, tx) = setup(TransactionState::Open, Some("EUR")).await;
        gateway.push_failure("connection reset");

        let err = engine
            .reconcile(&PaymentReference::new("3204417893"))
            .await
            .unwrap_err();

        assert!(matches!(err, PaymentError::GatewayUnavailable { .. }));
        assert!(store.transitions().await.is_empty());
        let fields = store.order_custom_fields(&tx.order_id).await.unwrap();
        assert_eq!(fields.payment_transaction_status.as_deref(), Some("0"));
        assert!(engine.locks().is_empty());
    }

    #[tokio::test]
    async fn test_capture_refused_when_paid() {
        let (engine, gateway, _, tx) = setup(TransactionState::Paid, Some("EUR")).await;

        let err = engine.capture_payment(&tx.order_id).await.unwrap_err();

        assert!(matches!(
            err,
            PaymentError::OperationNotAllowed {
                current: TransactionState::Paid
            }
        ));
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_capture_applies_response_code_without_polling() {
        let (engine, gateway, _, tx) = setup(TransactionState::Open, Some("EUR")).await;
        gateway.push_status(GatewayStatusCode(9));

        let state = engine.capture_payment(&tx.order_id).await.unwrap();

        assert_eq!(state, TransactionState::Paid);
        assert_eq!(
            gateway.calls(),
            vec![GatewayCall::Capture {
                reference: PaymentReference::new("3204417893"),
                amount_minor: 1999
            }]
        );
    }

    #[tokio::test]
    async fn test_cancel_reports_success_only_for_cancelled() {
        let (engine, gateway, _, tx) = setup(TransactionState::Open, Some("EUR")).await;
        gateway.push_status(GatewayStatusCode(2));

        let cancelled = engine.cancel_payment(&tx.order_id).await.unwrap();

        assert!(!cancelled);
        let stored = engine.store().find_by_order_id(&tx.order_id).await.unwrap().unwrap();
        assert_eq!(stored.state, TransactionState::Failed);
    }

    #[tokio::test]
    async fn test_refund_without_currency_makes_no_call() {
        let (engine, gateway, _, tx) = setup(TransactionState::Paid, None).await;

        let err = engine.refund_payment(&tx.order_id).await.unwrap_err();

        assert!(matches!(err, PaymentError::CurrencyUnresolvable { .. }));
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_refund_uses_order_number_as_merchant_reference() {
        let (engine, gateway, _, tx) = setup(TransactionState::Paid, Some("EUR")).await;
        gateway.push_status(GatewayStatusCode(8));

        assert!(engine.refund_payment(&tx.order_id).await.unwrap());
        assert_eq!(
            gateway.calls(),
            vec![GatewayCall::Refund {
                reference: PaymentReference::new("3204417893"),
                amount_minor: 1999,
                currency: "EUR".to_string(),
                merchant_reference: "10001".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_order_cancel_edit_refunds() {
        let (engine, gateway, _, tx) = setup(TransactionState::Paid, Some("EUR")).await;
        gateway.push_status(GatewayStatusCode(7));

        let outcome = engine
            .handle_order_edit(
                &tx.order_id,
                OrderEditEvent {
                    scope: OrderEditScope::Order,
                    action: OrderEditAction::Cancel,
                },
            )
            .await
            .unwrap();

        assert_eq!(
            outcome,
            OrderEditOutcome {
                handled: true,
                success: true
            }
        );
        assert!(matches!(gateway.calls()[0], GatewayCall::Refund { .. }));
    }

    #[tokio::test]
    async fn test_edit_without_reference_is_ignored() {
        let store = InMemoryOrderTransactionStore::new();
        let tx = store
            .seed_order("10009", dec!(5.00), Some("EUR"), TransactionState::Open)
            .await;
        let gateway = MockGateway::new();
        let engine = ReconciliationEngine::new(Arc::new(gateway.clone()), Arc::new(store));

        let outcome = engine
            .handle_order_edit(
                &tx.order_id,
                OrderEditEvent {
                    scope: OrderEditScope::Transaction,
                    action: OrderEditAction::Cancel,
                },
            )
            .await
            .unwrap();

        assert!(!outcome.handled);
        assert!(gateway.calls().is_empty());
    }
}
