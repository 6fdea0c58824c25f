//! Hosted checkout payment status reconciliation for Worldline Direct.
//!
//! Inbound triggers (customer redirect, webhook, back-office order edit)
//! resolve a payment, take the order lock and let the reconciliation engine
//! bring the order transaction in line with the gateway.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod payments;
pub mod reconciliation;

pub use error::{AppResult, PaymentError};
