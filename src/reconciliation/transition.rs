//! Transaction state machine and transition application
//!
//! The store owns the authoritative state machine; this module knows which
//! canonical action reaches a target state and refuses actions the state
//! machine would reject.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::database::repository::{OrderTransaction, OrderTransactionStore};
use crate::error::{AppResult, PaymentError};

/// Local order transaction states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Open,
    InProgress,
    Paid,
    Refunded,
    Cancelled,
    Failed,
}

impl TransactionState {
    pub const ALL: [TransactionState; 6] = [
        TransactionState::Open,
        TransactionState::InProgress,
        TransactionState::Paid,
        TransactionState::Refunded,
        TransactionState::Cancelled,
        TransactionState::Failed,
    ];

    /// Technical name used by the state machine and in storage
    pub fn technical_name(&self) -> &'static str {
        match self {
            TransactionState::Open => "open",
            TransactionState::InProgress => "in_progress",
            TransactionState::Paid => "paid",
            TransactionState::Refunded => "refunded",
            TransactionState::Cancelled => "cancelled",
            TransactionState::Failed => "failed",
        }
    }

    pub fn from_technical_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|state| state.technical_name() == name)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.technical_name())
    }
}

impl FromStr for TransactionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_technical_name(s).ok_or_else(|| format!("unknown transaction state '{}'", s))
    }
}

/// Canonical state machine actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionAction {
    Reopen,
    Process,
    Paid,
    Refund,
    Cancel,
    Fail,
}

impl TransitionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionAction::Reopen => "reopen",
            TransitionAction::Process => "process",
            TransitionAction::Paid => "paid",
            TransitionAction::Refund => "refund",
            TransitionAction::Cancel => "cancel",
            TransitionAction::Fail => "fail",
        }
    }

    /// The action that moves a transaction into `target`.
    pub fn for_target(target: TransactionState) -> Self {
        match target {
            TransactionState::Open => TransitionAction::Reopen,
            TransactionState::InProgress => TransitionAction::Process,
            TransactionState::Paid => TransitionAction::Paid,
            TransactionState::Refunded => TransitionAction::Refund,
            TransactionState::Cancelled => TransitionAction::Cancel,
            TransactionState::Failed => TransitionAction::Fail,
        }
    }

    pub fn target(&self) -> TransactionState {
        match self {
            TransitionAction::Reopen => TransactionState::Open,
            TransitionAction::Process => TransactionState::InProgress,
            TransitionAction::Paid => TransactionState::Paid,
            TransitionAction::Refund => TransactionState::Refunded,
            TransitionAction::Cancel => TransactionState::Cancelled,
            TransitionAction::Fail => TransactionState::Failed,
        }
    }

    /// States this action may be applied from
    pub fn allowed_from(&self) -> &'static [TransactionState] {
        use TransactionState::*;
        match self {
            TransitionAction::Reopen => &[InProgress, Cancelled, Failed],
            TransitionAction::Process => &[Open, Cancelled, Failed],
            TransitionAction::Paid => &[Open, InProgress, Failed],
            TransitionAction::Refund => &[Paid],
            TransitionAction::Cancel => &[Open, InProgress, Paid],
            TransitionAction::Fail => &[Open, InProgress],
        }
    }

    pub fn is_allowed_from(&self, state: TransactionState) -> bool {
        self.allowed_from().contains(&state)
    }
}

impl fmt::Display for TransitionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drives the store's state machine toward a target state
#[derive(Clone)]
pub struct TransitionApplier {
    store: Arc<dyn OrderTransactionStore>,
}

impl TransitionApplier {
    pub fn new(store: Arc<dyn OrderTransactionStore>) -> Self {
        Self { store }
    }

    /// Move `transaction` into `target`.
    ///
    /// Returns the state after the call. Already being in `target` is a no-op.
    pub async fn apply(
        &self,
        transaction: &OrderTransaction,
        target: TransactionState,
    ) -> AppResult<TransactionState> {
        let current = transaction.state;
        if current == target {
            debug!(
                transaction_id = %transaction.transaction_id,
                state = %current,
                "Transaction already in target state"
            );
            return Ok(current);
        }

        let action = TransitionAction::for_target(target);
        if !action.is_allowed_from(current) {
            return Err(PaymentError::ForbiddenTransition {
                from: current,
                action,
            });
        }

        let new_state = self
            .store
            .apply_transition(&transaction.transaction_id, action)
            .await
            .map_err(|e| {
                if e.is_invalid_transition() {
                    PaymentError::ForbiddenTransition {
                        from: current,
                        action,
                    }
                } else {
                    PaymentError::Storage(e)
                }
            })?;

        info!(
            order_id = %transaction.order_id,
            transaction_id = %transaction.transaction_id,
            from = %current,
            to = %new_state,
            "Applied transaction transition '{}'",
            action
        );

        Ok(new_state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemoryOrderTransactionStore;
    use rust_decimal_macros::dec;

    #[test]
    fn test_technical_names_round_trip() {
        for state in TransactionState::ALL {
            assert_eq!(
                TransactionState::from_technical_name(state.technical_name()),
                Some(state)
            );
        }
        assert_eq!("in_progress".parse::<TransactionState>(), Ok(TransactionState::InProgress));
        assert!("authorized".parse::<TransactionState>().is_err());
    }

    #[test]
    fn test_every_action_reaches_its_target() {
        for state in TransactionState::ALL {
            assert_eq!(TransitionAction::for_target(state).target(), state);
        }
    }

    #[test]
    fn test_refund_only_from_paid() {
        assert!(TransitionAction::Refund.is_allowed_from(TransactionState::Paid));
        assert!(!TransitionAction::Refund.is_allowed_from(TransactionState::Open));
        assert!(!TransitionAction::Fail.is_allowed_from(TransactionState::Paid));
        assert!(TransitionAction::Paid.is_allowed_from(TransactionState::Failed));
    }

    #[tokio::test]
    async fn test_apply_is_noop_in_target_state() {
        let store = InMemoryOrderTransactionStore::new();
        let tx = store
            .seed_order("10001", dec!(10.00), Some("EUR"), TransactionState::Paid)
            .await;
        let applier = TransitionApplier::new(Arc::new(store.clone()));

        let state = applier.apply(&tx, TransactionState::Paid).await.unwrap();

        assert_eq!(state, TransactionState::Paid);
        assert!(store.transitions().await.is_empty());
    }

    #[tokio::test]
    async fn test_forbidden_transition_is_fatal() {
        let store = InMemoryOrderTransactionStore::new();
        let tx = store
            .seed_order("10002", dec!(10.00), Some("EUR"), TransactionState::Refunded)
            .await;
        let applier = TransitionApplier::new(Arc::new(store.clone()));

        let err = applier.apply(&tx, TransactionState::Failed).await.unwrap_err();

        assert!(matches!(
            err,
            PaymentError::ForbiddenTransition {
                from: TransactionState::Refunded,
                action: TransitionAction::Fail
            }
        ));
        assert!(store.transitions().await.is_empty());
    }

    #[tokio::test]
    async fn test_apply_records_transition() {
        let store = InMemoryOrderTransactionStore::new();
        let tx = store
            .seed_order("10003", dec!(10.00), Some("EUR"), TransactionState::InProgress)
            .await;
        let applier = TransitionApplier::new(Arc::new(store.clone()));

        let state = applier.apply(&tx, TransactionState::Paid).await.unwrap();

        assert_eq!(state, TransactionState::Paid);
        let log = store.transitions().await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action, TransitionAction::Paid);
        assert_eq!(log[0].from, TransactionState::InProgress);
    }

    #[tokio::test]
    async fn test_stale_snapshot_already_applied_elsewhere_is_noop() {
        let store = InMemoryOrderTransactionStore::new();
        let stale = store
            .seed_order("10004", dec!(10.00), Some("EUR"), TransactionState::InProgress)
            .await;
        let applier = TransitionApplier::new(Arc::new(store.clone()));
        applier.apply(&stale, TransactionState::Paid).await.unwrap();

        let state = applier.apply(&stale, TransactionState::Paid).await.unwrap();

        assert_eq!(state, TransactionState::Paid);
        assert_eq!(store.transitions().await.len(), 1);
    }
}
