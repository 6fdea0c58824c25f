//! HTTP surface: health, gateway callbacks and the back-office order edit hook

pub mod finalize;
pub mod health;
pub mod order_edit;
pub mod webhook;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::reconciliation::ReconciliationEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReconciliationEngine>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(engine: Arc<ReconciliationEngine>, config: Config) -> Self {
        Self {
            engine,
            config: Arc::new(config),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let internal = Router::new()
        .route(
            "/internal/orders/:order_id/edit",
            post(order_edit::handle_order_edit),
        )
        .route_layer(middleware::from_fn_with_state(
            state.config.internal_api_key.clone(),
            require_internal_api_key,
        ));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/payment/webhook", post(webhook::handle_webhook))
        .route(
            "/payment/finalize-transaction",
            get(finalize::finalize_transaction),
        )
        .merge(internal)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

pub async fn require_internal_api_key(
    State(expected): State<String>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let provided = request
        .headers()
        .get("X-Internal-Api-Key")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    if expected.is_empty() || provided != expected {
        tracing::warn!("Rejected internal request without a valid API key");
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }

    next.run(request).await
}
