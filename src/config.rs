use anyhow::{anyhow, Context, Result};
use std::env;

use crate::payments::providers::WorldlineConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    /// Required when built with the `postgres` feature
    pub database: Option<DatabaseConfig>,
    pub gateway: GatewayConfig,
    pub webhook: Option<WebhookConfig>,
    pub storefront: StorefrontConfig,
    pub internal_api_key: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub enum GatewayConfig {
    Worldline(WorldlineConfig),
    /// Scripted in-process gateway for local runs
    Mock,
}

/// Shared secret for verifying webhook deliveries
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub key_id: String,
    pub secret: String,
}

/// Storefront pages the finalize redirect sends customers to
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    pub finish_url: String,
    pub error_url: String,
    /// May contain an `{orderId}` placeholder
    pub edit_order_url: String,
}

impl Default for StorefrontConfig {
    fn default() -> Self {
        Self {
            finish_url: "/checkout/finish".to_string(),
            error_url: "/checkout/cart".to_string(),
            edit_order_url: "/account/order/edit/{orderId}".to_string(),
        }
    }
}

impl StorefrontConfig {
    pub fn edit_order_url(&self, order_id: &str) -> String {
        self.edit_order_url.replace("{orderId}", order_id)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                environment: "development".to_string(),
            },
            database: None,
            gateway: GatewayConfig::Mock,
            webhook: None,
            storefront: StorefrontConfig::default(),
            internal_api_key: String::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let server = ServerConfig {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .context("PORT not set")?
                .parse()
                .context("PORT must be a valid number")?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        };

        let database = match env::var("DATABASE_URL") {
            Ok(url) => Some(DatabaseConfig {
                url,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()
                    .context("DATABASE_MAX_CONNECTIONS must be a valid number")?,
            }),
            Err(_) => None,
        };

        let gateway = match env::var("PAYMENT_GATEWAY")
            .unwrap_or_else(|_| "worldline".to_string())
            .as_str()
        {
            "worldline" => GatewayConfig::Worldline(WorldlineConfig::from_env()?),
            "mock" => GatewayConfig::Mock,
            other => {
                return Err(anyhow!(
                    "PAYMENT_GATEWAY must be 'worldline' or 'mock', got {}",
                    other
                ))
            }
        };

        let webhook = match (
            env::var("WORLDLINE_WEBHOOK_KEY_ID").ok(),
            env::var("WORLDLINE_WEBHOOK_SECRET").ok(),
        ) {
            (Some(key_id), Some(secret)) => Some(WebhookConfig { key_id, secret }),
            (None, None) => None,
            _ => {
                return Err(anyhow!(
                    "WORLDLINE_WEBHOOK_KEY_ID and WORLDLINE_WEBHOOK_SECRET must be set together"
                ))
            }
        };

        let defaults = StorefrontConfig::default();
        let storefront = StorefrontConfig {
            finish_url: env::var("STOREFRONT_FINISH_URL").unwrap_or(defaults.finish_url),
            error_url: env::var("STOREFRONT_ERROR_URL").unwrap_or(defaults.error_url),
            edit_order_url: env::var("STOREFRONT_EDIT_ORDER_URL")
                .unwrap_or(defaults.edit_order_url),
        };

        let internal_api_key = env::var("INTERNAL_API_KEY").context("INTERNAL_API_KEY not set")?;

        let config = Config {
            server,
            database,
            gateway,
            webhook,
            storefront,
            internal_api_key,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        // Validate port range
        if self.server.port < 1024 {
            return Err(anyhow!(
                "Port must be at least 1024, got {}",
                self.server.port
            ));
        }

        // Validate environment
        let valid_environments = ["development", "staging", "production"];
        if !valid_environments.contains(&self.server.environment.as_str()) {
            return Err(anyhow!(
                "Environment must be one of: {:?}, got {}",
                valid_environments,
                self.server.environment
            ));
        }

        match &self.database {
            Some(database) => {
                if database.url.trim().is_empty() {
                    return Err(anyhow!("DATABASE_URL cannot be empty"));
                }
                if database.max_connections == 0 {
                    return Err(anyhow!("DATABASE_MAX_CONNECTIONS must be greater than 0"));
                }
            }
            None if cfg!(feature = "postgres") => {
                return Err(anyhow!("DATABASE_URL not set"));
            }
            None => {}
        }

        match &self.gateway {
            GatewayConfig::Worldline(worldline) => {
                if worldline.merchant_id.trim().is_empty()
                    || worldline.api_key.trim().is_empty()
                    || worldline.api_secret.trim().is_empty()
                {
                    return Err(anyhow!("Worldline credentials cannot be empty"));
                }
                if worldline.return_url.trim().is_empty() {
                    return Err(anyhow!("WORLDLINE_RETURN_URL cannot be empty"));
                }
                if worldline.timeout_secs == 0 || worldline.timeout_secs > 120 {
                    return Err(anyhow!(
                        "WORLDLINE_TIMEOUT_SECS must be between 1 and 120, got {}",
                        worldline.timeout_secs
                    ));
                }
            }
            GatewayConfig::Mock if self.server.environment == "production" => {
                return Err(anyhow!("The mock gateway cannot be used in production"));
            }
            GatewayConfig::Mock => {}
        }

        if let Some(webhook) = &self.webhook {
            if webhook.key_id.trim().is_empty() || webhook.secret.trim().is_empty() {
                return Err(anyhow!("Webhook key id and secret cannot be empty"));
            }
        }

        if self.internal_api_key.trim().is_empty() {
            return Err(anyhow!("INTERNAL_API_KEY cannot be empty"));
        }

        Ok(())
    }
}
