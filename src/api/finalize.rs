//! Customer return from the hosted checkout

use axum::extract::{Query, State};
use axum::response::Redirect;
use serde::Deserialize;
use tracing::{info, warn};

use crate::api::AppState;
use crate::error::PaymentError;
use crate::payments::types::PaymentReference;
use crate::reconciliation::TransactionState;

pub const CUSTOMER_CANCELED: &str = "CUSTOMER_CANCELED_EXTERNAL_PAYMENT";
pub const PROCESS_INTERRUPTED: &str = "ASYNC_PAYMENT_PROCESS_INTERRUPTED";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeQuery {
    pub hosted_checkout_id: Option<String>,
    pub changed_payment: Option<String>,
}

/// Append `error-code=<code>`, joining with `&` when a query string exists.
pub fn append_error_code(url: &str, code: &str) -> String {
    append_query_param(url, "error-code", code)
}

fn append_query_param(url: &str, key: &str, value: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}={}", url, separator, key, value)
}

fn is_truthy(value: Option<&str>) -> bool {
    matches!(value, Some("1") | Some("true") | Some("on") | Some("yes"))
}

pub async fn finalize_transaction(
    State(state): State<AppState>,
    query: Option<Query<FinalizeQuery>>,
) -> Redirect {
    let Some(Query(query)) = query else {
        warn!("Finalize called with a malformed query string");
        return Redirect::to("/");
    };

    let Some(hosted_checkout_id) = query
        .hosted_checkout_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
    else {
        return Redirect::to("/");
    };

    let storefront = &state.config.storefront;
    let reference = PaymentReference::new(hosted_checkout_id);

    let order = match state.engine.find_by_reference(&reference).await {
        Ok(order) => order,
        Err(e) => {
            warn!(hosted_checkout_id = %reference, "Finalize failed: {}", e);
            return Redirect::to(&append_error_code(&storefront.error_url, e.error_code()));
        }
    };
    let edit_url = storefront.edit_order_url(&order.order_id);

    match state.engine.reconcile(&reference).await {
        Ok(TransactionState::Cancelled) => {
            info!(order_id = %order.order_id, "Customer cancelled the hosted checkout");
            Redirect::to(&append_error_code(&edit_url, CUSTOMER_CANCELED))
        }
        Ok(TransactionState::Failed) => {
            info!(order_id = %order.order_id, "Hosted checkout payment failed");
            Redirect::to(&append_error_code(&edit_url, PROCESS_INTERRUPTED))
        }
        Ok(transaction_state) => {
            info!(
                order_id = %order.order_id,
                "Hosted checkout finalized, transaction is '{}'",
                transaction_state
            );
            let mut finish_url =
                append_query_param(&storefront.finish_url, "orderId", &order.order_id);
            if is_truthy(query.changed_payment.as_deref()) {
                finish_url = append_query_param(&finish_url, "changedPayment", "1");
            }
            Redirect::to(&finish_url)
        }
        Err(e) => {
            log_failure(&order.order_id, &e);
            Redirect::to(&append_error_code(&edit_url, e.error_code()))
        }
    }
}

fn log_failure(order_id: &str, e: &PaymentError) {
    if e.is_recoverable() {
        warn!(order_id = %order_id, "Finalize could not reconcile: {}", e);
    } else {
        tracing::error!(order_id = %order_id, "Finalize reconciliation failed: {}", e);
    }
}
