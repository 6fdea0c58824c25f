//! Gateway status code mapping
//!
//! The gateway's code space is sparse and grouped by meaning, so the mapping is
//! an explicit table rather than numeric ranges.

use serde::{Deserialize, Serialize};

use crate::payments::types::GatewayStatusCode;
use crate::reconciliation::transition::TransactionState;

/// Disjoint groups of gateway status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GatewayStatus {
    Created,
    PendingCapture,
    CaptureRequested,
    Captured,
    RefundRequested,
    Refunded,
    Cancelled,
    Rejected,
    RejectedCapture,
    /// Code not listed in the table; never drives a transition
    Unknown,
}

/// Map a raw gateway code onto its status group.
pub fn map_status(code: GatewayStatusCode) -> GatewayStatus {
    match code.value() {
        0 | 4 | 46 => GatewayStatus::Created,
        50 | 51 | 55 | 56 => GatewayStatus::PendingCapture,
        91 | 92 | 99 => GatewayStatus::CaptureRequested,
        5 | 9 => GatewayStatus::Captured,
        81 | 82 => GatewayStatus::RefundRequested,
        7 | 8 | 85 => GatewayStatus::Refunded,
        1 | 6 | 61 | 62 | 64 | 75 => GatewayStatus::Cancelled,
        2 | 57 | 59 | 73 | 83 => GatewayStatus::Rejected,
        93 => GatewayStatus::RejectedCapture,
        _ => GatewayStatus::Unknown,
    }
}

impl GatewayStatus {
    /// Local transaction state this status group settles on, if any.
    pub fn target_state(self) -> Option<TransactionState> {
        match self {
            GatewayStatus::Created | GatewayStatus::PendingCapture => Some(TransactionState::Open),
            GatewayStatus::CaptureRequested => Some(TransactionState::InProgress),
            GatewayStatus::Captured => Some(TransactionState::Paid),
            GatewayStatus::RefundRequested | GatewayStatus::Refunded => {
                Some(TransactionState::Refunded)
            }
            GatewayStatus::Cancelled => Some(TransactionState::Cancelled),
            GatewayStatus::Rejected | GatewayStatus::RejectedCapture => {
                Some(TransactionState::Failed)
            }
            GatewayStatus::Unknown => None,
        }
    }
}
