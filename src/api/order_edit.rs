//! Back-office order edits (cancel / refund) forwarded to the gateway

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::api::AppState;
use crate::error::PaymentError;
use crate::reconciliation::{OrderEditEvent, OrderEditOutcome};

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

fn error_status(e: &PaymentError) -> StatusCode {
    match e {
        PaymentError::OperationNotAllowed { .. } | PaymentError::CurrencyUnresolvable { .. } => {
            StatusCode::CONFLICT
        }
        PaymentError::TransactionNotFound { .. } => StatusCode::NOT_FOUND,
        PaymentError::InvalidAmount { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        PaymentError::GatewayUnavailable { .. } => StatusCode::BAD_GATEWAY,
        PaymentError::UnknownStatusCode { .. }
        | PaymentError::ForbiddenTransition { .. }
        | PaymentError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub async fn handle_order_edit(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    Json(event): Json<OrderEditEvent>,
) -> Response {
    info!(order_id = %order_id, "Order edit received: {:?}", event);

    match state.engine.handle_order_edit(&order_id, event).await {
        Ok(outcome) => (StatusCode::OK, Json::<OrderEditOutcome>(outcome)).into_response(),
        Err(e) => {
            let status = error_status(&e);
            if status.is_server_error() {
                error!(order_id = %order_id, "Order edit failed: {}", e);
            } else {
                warn!(order_id = %order_id, "Order edit refused: {}", e);
            }
            let body = ErrorBody {
                code: e.error_code().to_string(),
                message: e.to_string(),
            };
            (status, Json(body)).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciliation::TransactionState;

    #[test]
    fn test_refusals_map_to_conflict() {
        assert_eq!(
            error_status(&PaymentError::OperationNotAllowed {
                current: TransactionState::Open
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            error_status(&PaymentError::gateway_unavailable("refund", "timeout")),
            StatusCode::BAD_GATEWAY
        );
    }
}
