//! Payment gateway implementations
//!
//! Concrete implementations of the PaymentGateway trait.

pub mod mock;
pub mod worldline;

pub use mock::MockGateway;
pub use worldline::{WorldlineConfig, WorldlineProvider};
