use thiserror::Error;

use crate::database::error::DatabaseError;
use crate::reconciliation::transition::{TransactionState, TransitionAction};

pub type AppResult<T> = Result<T, PaymentError>;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Payment gateway unavailable during {operation}: {message}")]
    GatewayUnavailable { operation: String, message: String },

    #[error("Unknown gateway status code {code}")]
    UnknownStatusCode { code: i32 },

    #[error("Operation is not possible due to current status '{current}'")]
    OperationNotAllowed { current: TransactionState },

    #[error("No order transaction matches payment reference '{reference}'")]
    TransactionNotFound { reference: String },

    #[error("Cannot resolve the currency of order {order_id}")]
    CurrencyUnresolvable { order_id: String },

    #[error("Amount {amount} cannot be expressed in whole minor units")]
    InvalidAmount { amount: String },

    #[error("Transition '{action}' is not allowed from state '{from}'")]
    ForbiddenTransition {
        from: TransactionState,
        action: TransitionAction,
    },

    #[error("Storage error: {0}")]
    Storage(DatabaseError),
}

impl PaymentError {
    pub fn gateway_unavailable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::GatewayUnavailable {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn transaction_not_found(reference: impl Into<String>) -> Self {
        Self::TransactionNotFound {
            reference: reference.into(),
        }
    }

    pub fn invalid_amount(amount: impl ToString) -> Self {
        Self::InvalidAmount {
            amount: amount.to_string(),
        }
    }

    /// Expected operating conditions that must never abort a trigger.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::UnknownStatusCode { .. }
                | Self::OperationNotAllowed { .. }
                | Self::TransactionNotFound { .. }
                | Self::CurrencyUnresolvable { .. }
        )
    }

    /// Short machine-readable code used in storefront redirects.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::GatewayUnavailable { .. } => "GATEWAY_UNAVAILABLE",
            Self::UnknownStatusCode { .. } => "UNKNOWN_STATUS_CODE",
            Self::OperationNotAllowed { .. } => "OPERATION_NOT_ALLOWED",
            Self::TransactionNotFound { .. } => "TRANSACTION_NOT_FOUND",
            Self::CurrencyUnresolvable { .. } => "CURRENCY_UNRESOLVABLE",
            Self::InvalidAmount { .. } => "INVALID_AMOUNT",
            Self::ForbiddenTransition { .. } => "ASYNC_PAYMENT_PROCESS_INTERRUPTED",
            Self::Storage(_) => "ASYNC_PAYMENT_PROCESS_INTERRUPTED",
        }
    }
}

impl From<DatabaseError> for PaymentError {
    fn from(err: DatabaseError) -> Self {
        PaymentError::Storage(err)
    }
}

impl From<reqwest::Error> for PaymentError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PaymentError::gateway_unavailable("request", "request timed out")
        } else {
            PaymentError::gateway_unavailable("request", format!("Request error: {}", err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_conditions_are_recoverable() {
        assert!(PaymentError::transaction_not_found("123").is_recoverable());
        assert!(PaymentError::OperationNotAllowed {
            current: TransactionState::Paid
        }
        .is_recoverable());
        assert!(!PaymentError::ForbiddenTransition {
            from: TransactionState::Refunded,
            action: TransitionAction::Fail,
        }
        .is_recoverable());
        assert!(!PaymentError::gateway_unavailable("get_status", "boom").is_recoverable());
    }

    #[test]
    fn test_operation_not_allowed_message() {
        let err = PaymentError::OperationNotAllowed {
            current: TransactionState::Paid,
        };
        assert_eq!(
            err.to_string(),
            "Operation is not possible due to current status 'paid'"
        );
    }
}
