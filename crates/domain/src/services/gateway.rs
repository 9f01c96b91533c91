//! Payment gateway abstraction for push-payment initiation.
//!
//! The production implementation talks to M-Pesa Daraja and lives in the
//! api crate; this module carries the seam and a mock for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors surfaced by a payment gateway.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    /// Network, timeout or authentication problem. Safe to retry later.
    #[error("Payment gateway unavailable: {0}")]
    Unavailable(String),

    /// The provider refused the request.
    #[error("Payment request rejected: {0}")]
    Rejected(String),
}

/// A push-payment request for one registration.
#[derive(Debug, Clone, PartialEq)]
pub struct PushRequest {
    /// Canonical `2547XXXXXXXX` or `2541XXXXXXXX` number.
    pub phone_number: String,
    pub amount: Decimal,
    pub reference: String,
    pub description: String,
}

/// Provider acknowledgement of an accepted push request.
#[derive(Debug, Clone, PartialEq)]
pub struct PushReceipt {
    /// Correlation id echoed back in the asynchronous callback.
    pub checkout_request_id: String,
    pub merchant_request_id: Option<String>,
    pub customer_message: Option<String>,
}

/// Result of a status query for an earlier push request.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderStatus {
    Succeeded,
    Failed { code: i64, description: String },
    /// The customer has not acted on the prompt yet.
    Processing,
}

/// Payment gateway trait for push payments.
#[async_trait::async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Ask the provider to prompt the customer's handset for payment.
    async fn initiate_push(&self, request: PushRequest) -> Result<PushReceipt, GatewayError>;

    /// Query the provider for the result of an earlier push.
    async fn query_status(&self, checkout_request_id: &str)
        -> Result<ProviderStatus, GatewayError>;
}

/// Scripted behaviour for the mock gateway's push endpoint.
#[derive(Debug, Clone, Default)]
pub enum MockPushBehavior {
    #[default]
    Accept,
    Reject(String),
    Unavailable(String),
}

/// Mock gateway for development and testing.
///
/// Records every push and answers status queries from a programmable table.
#[derive(Debug)]
pub struct MockPaymentGateway {
    /// Keeps correlation ids unique across mock instances sharing a database.
    id_prefix: String,
    behavior: Mutex<MockPushBehavior>,
    pushes: Mutex<Vec<PushRequest>>,
    statuses: Mutex<HashMap<String, ProviderStatus>>,
    query_failure: Mutex<Option<GatewayError>>,
}

impl Default for MockPaymentGateway {
    fn default() -> Self {
        Self {
            id_prefix: uuid::Uuid::new_v4().simple().to_string()[..8].to_string(),
            behavior: Mutex::default(),
            pushes: Mutex::default(),
            statuses: Mutex::default(),
            query_failure: Mutex::default(),
        }
    }
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock gateway that rejects every push.
    pub fn rejecting(reason: impl Into<String>) -> Self {
        let gateway = Self::default();
        gateway.set_behavior(MockPushBehavior::Reject(reason.into()));
        gateway
    }

    /// Create a mock gateway that behaves as if the provider were down.
    pub fn unavailable() -> Self {
        let gateway = Self::default();
        gateway.set_behavior(MockPushBehavior::Unavailable(
            "connection refused".to_string(),
        ));
        gateway
    }

    pub fn set_behavior(&self, behavior: MockPushBehavior) {
        if let Ok(mut current) = self.behavior.lock() {
            *current = behavior;
        }
    }

    /// Program the answer for `query_status(checkout_request_id)`.
    pub fn set_status(&self, checkout_request_id: &str, status: ProviderStatus) {
        if let Ok(mut statuses) = self.statuses.lock() {
            statuses.insert(checkout_request_id.to_string(), status);
        }
    }

    /// Make every later `query_status` call return `error`.
    pub fn fail_status_queries(&self, error: GatewayError) {
        if let Ok(mut failure) = self.query_failure.lock() {
            *failure = Some(error);
        }
    }

    /// Push requests received so far, in order.
    pub fn pushes(&self) -> Vec<PushRequest> {
        self.pushes.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn push_count(&self) -> usize {
        self.pushes.lock().map(|p| p.len()).unwrap_or_default()
    }

    /// Correlation id the mock hands out for the n-th push (1-based).
    pub fn checkout_request_id_for(&self, n: usize) -> String {
        format!("ws_CO_{}_{:06}", self.id_prefix, n)
    }
}

#[async_trait::async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn initiate_push(&self, request: PushRequest) -> Result<PushReceipt, GatewayError> {
        let behavior = self
            .behavior
            .lock()
            .map(|b| b.clone())
            .unwrap_or_default();

        let n = {
            let mut pushes = self
                .pushes
                .lock()
                .map_err(|_| GatewayError::Unavailable("mock poisoned".to_string()))?;
            pushes.push(request.clone());
            pushes.len()
        };

        match behavior {
            MockPushBehavior::Accept => {
                tracing::info!(
                    amount = %request.amount,
                    reference = %request.reference,
                    "Mock: Would send STK push"
                );
                Ok(PushReceipt {
                    checkout_request_id: self.checkout_request_id_for(n),
                    merchant_request_id: Some(format!("mock-merchant-{}", n)),
                    customer_message: Some(
                        "Success. Request accepted for processing".to_string(),
                    ),
                })
            }
            MockPushBehavior::Reject(reason) => Err(GatewayError::Rejected(reason)),
            MockPushBehavior::Unavailable(reason) => Err(GatewayError::Unavailable(reason)),
        }
    }

    async fn query_status(
        &self,
        checkout_request_id: &str,
    ) -> Result<ProviderStatus, GatewayError> {
        if let Some(error) = self.query_failure.lock().ok().and_then(|f| f.clone()) {
            return Err(error);
        }
        let statuses = self
            .statuses
            .lock()
            .map_err(|_| GatewayError::Unavailable("mock poisoned".to_string()))?;
        Ok(statuses
            .get(checkout_request_id)
            .cloned()
            .unwrap_or(ProviderStatus::Processing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PushRequest {
        PushRequest {
            phone_number: "254712345678".to_string(),
            amount: Decimal::from(1500),
            reference: "TKT123".to_string(),
            description: "Meetup".to_string(),
        }
    }

    #[tokio::test]
    async fn test_mock_records_pushes() {
        let gateway = MockPaymentGateway::new();
        let receipt = gateway.initiate_push(request()).await.unwrap();

        assert_eq!(receipt.checkout_request_id, gateway.checkout_request_id_for(1));
        assert_ne!(
            receipt.checkout_request_id,
            MockPaymentGateway::new().checkout_request_id_for(1)
        );
        assert_eq!(gateway.push_count(), 1);
        assert_eq!(gateway.pushes()[0].phone_number, "254712345678");
    }

    #[tokio::test]
    async fn test_mock_rejection() {
        let gateway = MockPaymentGateway::rejecting("Invalid PhoneNumber");
        let err = gateway.initiate_push(request()).await.unwrap_err();
        assert_eq!(err, GatewayError::Rejected("Invalid PhoneNumber".to_string()));
    }

    #[tokio::test]
    async fn test_mock_status_defaults_to_processing() {
        let gateway = MockPaymentGateway::new();
        assert_eq!(
            gateway.query_status("unknown").await.unwrap(),
            ProviderStatus::Processing
        );

        gateway.set_status("ws_CO_1", ProviderStatus::Succeeded);
        assert_eq!(
            gateway.query_status("ws_CO_1").await.unwrap(),
            ProviderStatus::Succeeded
        );
    }
}
