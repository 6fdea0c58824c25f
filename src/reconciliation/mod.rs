//! Payment status reconciliation
//!
//! Keeps order transactions consistent with the gateway, whichever channel
//! reported the change.

pub mod engine;
pub mod lock;
pub mod transition;

pub use engine::{
    OrderEditAction, OrderEditEvent, OrderEditOutcome, OrderEditScope, ReconciliationEngine,
};
pub use lock::OrderLocks;
pub use transition::{TransactionState, TransitionAction, TransitionApplier};
