//! Payment gateway integration module
//!
//! Hosted checkout gateway interface, status code mapping and the concrete
//! Worldline Direct client.

pub mod providers;
pub mod status;
pub mod traits;
pub mod types;

pub use status::{map_status, GatewayStatus};
pub use traits::PaymentGateway;
pub use types::{GatewayOperation, GatewayStatusCode, HostedCheckout, PaymentReference};
