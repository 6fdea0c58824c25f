#![allow(dead_code)]

use axum::body::{to_bytes, Body};
use axum::http::{Request, Response};
use axum::Router;
use rust_decimal::Decimal;
use std::sync::Arc;
use tower::ServiceExt;

use worldline_payments::api::{self, AppState};
use worldline_payments::config::Config;
use worldline_payments::database::memory::InMemoryOrderTransactionStore;
use worldline_payments::database::repository::{
    OrderTransaction, OrderTransactionStore, PaymentCustomFields,
};
use worldline_payments::payments::providers::MockGateway;
use worldline_payments::payments::{GatewayStatusCode, PaymentReference};
use worldline_payments::reconciliation::{ReconciliationEngine, TransactionState};

pub const INTERNAL_KEY: &str = "test-internal-key";

pub struct TestApp {
    pub store: InMemoryOrderTransactionStore,
    pub gateway: MockGateway,
    pub engine: Arc<ReconciliationEngine>,
    pub router: Router,
}

pub fn test_config() -> Config {
    Config {
        internal_api_key: INTERNAL_KEY.to_string(),
        ..Config::default()
    }
}

pub fn spawn_app(gateway: MockGateway, config: Config) -> TestApp {
    let store = InMemoryOrderTransactionStore::new();
    let engine = Arc::new(ReconciliationEngine::new(
        Arc::new(gateway.clone()),
        Arc::new(store.clone()),
    ));
    let router = api::router(AppState::new(engine.clone(), config));

    TestApp {
        store,
        gateway,
        engine,
        router,
    }
}

/// Seed an order whose transaction already carries a hosted checkout id.
pub async fn seed_with_checkout(
    store: &InMemoryOrderTransactionStore,
    checkout_id: &str,
    amount: Decimal,
    currency: Option<&str>,
    state: TransactionState,
) -> OrderTransaction {
    let tx = store.seed_order("10001", amount, currency, state).await;
    store
        .save_custom_fields(
            &tx.order_id,
            &tx.transaction_id,
            &PaymentCustomFields::new(&PaymentReference::new(checkout_id), GatewayStatusCode(0)),
        )
        .await
        .unwrap();
    store.find_by_order_id(&tx.order_id).await.unwrap().unwrap()
}

pub async fn current_state(
    store: &InMemoryOrderTransactionStore,
    order_id: &str,
) -> TransactionState {
    store.find_by_order_id(order_id).await.unwrap().unwrap().state
}

pub async fn send(router: &Router, request: Request<Body>) -> Response<Body> {
    router.clone().oneshot(request).await.unwrap()
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub fn location(response: &Response<Body>) -> String {
    response
        .headers()
        .get(http::header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
