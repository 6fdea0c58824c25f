use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::config::GatewayConfig;

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub environment: String,
    pub gateway: String,
    pub live_mode: bool,
    pub webhook_signature_check: bool,
}

pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, StatusCode> {
    let version = env!("CARGO_PKG_VERSION").to_string();
    let config = &state.config;

    let (gateway, live_mode) = match &config.gateway {
        GatewayConfig::Worldline(worldline) => ("worldline", worldline.live_mode),
        GatewayConfig::Mock => ("mock", false),
    };

    let response = HealthResponse {
        status: "healthy".to_string(),
        version,
        environment: config.server.environment.clone(),
        gateway: gateway.to_string(),
        live_mode,
        webhook_signature_check: config.webhook.is_some(),
    };

    Ok(Json(response))
}
