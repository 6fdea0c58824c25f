//! Scripted in-process gateway
//!
//! Answers with queued status codes (or failures) in order and records every
//! call. Used by tests and by local runs without gateway credentials.

use crate::error::{AppResult, PaymentError};
use crate::payments::traits::PaymentGateway;
use crate::payments::types::{GatewayOperation, GatewayStatusCode, HostedCheckout, PaymentReference};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A call received by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    CreatePayment {
        amount_minor: i64,
        currency: String,
        method_filter: i32,
    },
    GetStatus {
        reference: PaymentReference,
    },
    Capture {
        reference: PaymentReference,
        amount_minor: i64,
    },
    Cancel {
        reference: PaymentReference,
    },
    Refund {
        reference: PaymentReference,
        amount_minor: i64,
        currency: String,
        merchant_reference: String,
    },
}

#[derive(Debug, Clone)]
enum Scripted {
    Status(GatewayStatusCode),
    Failure(String),
}

#[derive(Debug, Default)]
struct MockState {
    responses: VecDeque<Scripted>,
    calls: Vec<GatewayCall>,
}

#[derive(Debug, Clone)]
pub struct MockGateway {
    state: Arc<Mutex<MockState>>,
    checkout_id: String,
    /// Answer used once the script is exhausted
    default_status: Option<GatewayStatusCode>,
    latency: Option<Duration>,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            checkout_id: "mock-checkout".to_string(),
            default_status: None,
            latency: None,
        }
    }
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checkout_id(mut self, checkout_id: impl Into<String>) -> Self {
        self.checkout_id = checkout_id.into();
        self
    }

    pub fn with_default_status(mut self, code: GatewayStatusCode) -> Self {
        self.default_status = Some(code);
        self
    }

    /// Delay every answer, widening race windows in concurrency tests
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn push_status(&self, code: GatewayStatusCode) {
        self.lock().responses.push_back(Scripted::Status(code));
    }

    pub fn push_failure(&self, message: impl Into<String>) {
        self.lock().responses.push_back(Scripted::Failure(message.into()));
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn respond(
        &self,
        operation: GatewayOperation,
        call: GatewayCall,
    ) -> AppResult<GatewayStatusCode> {
        let scripted = {
            let mut state = self.lock();
            state.calls.push(call);
            state.responses.pop_front()
        };

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        match scripted {
            Some(Scripted::Status(code)) => Ok(code),
            Some(Scripted::Failure(message)) => {
                Err(PaymentError::gateway_unavailable(operation.as_str(), message))
            }
            None => self.default_status.ok_or_else(|| {
                PaymentError::gateway_unavailable(operation.as_str(), "no scripted response")
            }),
        }
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_payment(
        &self,
        amount_minor: i64,
        currency: &str,
        method_filter: i32,
    ) -> AppResult<HostedCheckout> {
        self.lock().calls.push(GatewayCall::CreatePayment {
            amount_minor,
            currency: currency.to_string(),
            method_filter,
        });

        Ok(HostedCheckout {
            reference: PaymentReference::new(self.checkout_id.clone()),
            redirect_url: Some(format!(
                "https://payment.mock.local/hostedcheckout/{}",
                self.checkout_id
            )),
            return_mac: Some("mock-mac".to_string()),
        })
    }

    async fn get_status(&self, reference: &PaymentReference) -> AppResult<GatewayStatusCode> {
        self.respond(
            GatewayOperation::GetStatus,
            GatewayCall::GetStatus {
                reference: reference.clone(),
            },
        )
        .await
    }

    async fn capture(
        &self,
        reference: &PaymentReference,
        amount_minor: i64,
    ) -> AppResult<GatewayStatusCode> {
        self.respond(
            GatewayOperation::Capture,
            GatewayCall::Capture {
                reference: reference.clone(),
                amount_minor,
            },
        )
        .await
    }

    async fn cancel(&self, reference: &PaymentReference) -> AppResult<GatewayStatusCode> {
        self.respond(
            GatewayOperation::Cancel,
            GatewayCall::Cancel {
                reference: reference.clone(),
            },
        )
        .await
    }

    async fn refund(
        &self,
        reference: &PaymentReference,
        amount_minor: i64,
        currency: &str,
        merchant_reference: &str,
    ) -> AppResult<GatewayStatusCode> {
        self.respond(
            GatewayOperation::Refund,
            GatewayCall::Refund {
                reference: reference.clone(),
                amount_minor,
                currency: currency.to_string(),
                merchant_reference: merchant_reference.to_string(),
            },
        )
        .await
    }
}
