//! Event registration domain models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Lifecycle status of a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistrationStatus {
    Pending,
    Confirmed,
    Cancelled,
    Failed,
}

impl RegistrationStatus {
    /// Active registrations hold the `(event, user)` slot.
    pub fn is_active(&self) -> bool {
        matches!(self, RegistrationStatus::Pending | RegistrationStatus::Confirmed)
    }
}

impl std::fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistrationStatus::Pending => write!(f, "pending"),
            RegistrationStatus::Confirmed => write!(f, "confirmed"),
            RegistrationStatus::Cancelled => write!(f, "cancelled"),
            RegistrationStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Payment sub-state of a registration. Only meaningful for paid events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    None,
    Pending,
    Success,
    Failed,
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentStatus::None => write!(f, "none"),
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Success => write!(f, "success"),
            PaymentStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One row of the admission ledger: a user's registration for an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub quantity: i32,
    pub status: RegistrationStatus,
    pub payment_status: PaymentStatus,
    pub phone_number: Option<String>,
    pub payment_amount: Option<Decimal>,
    pub payment_currency: Option<String>,
    pub gateway_request_id: Option<String>,
    pub merchant_request_id: Option<String>,
    pub payment_reference: Option<String>,
    pub settled_amount: Option<Decimal>,
    pub settled_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Registration {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Whether this row is waiting on a provider result.
    pub fn awaiting_payment(&self) -> bool {
        self.payment_status == PaymentStatus::Pending
    }
}

/// Request payload for `POST /events/:event_id/register`.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterForEventRequest {
    /// Only checked for paid events, by the registration service.
    pub phone_number: Option<String>,

    #[serde(default = "default_quantity")]
    #[validate(custom(function = "shared::validation::validate_ticket_quantity"))]
    pub quantity: i32,
}

fn default_quantity() -> i32 {
    1
}

/// Registration as returned to the registrant.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationView {
    pub id: Uuid,
    pub event_id: Uuid,
    pub quantity: i32,
    pub status: RegistrationStatus,
    pub payment_status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Registration> for RegistrationView {
    fn from(registration: Registration) -> Self {
        Self {
            id: registration.id,
            event_id: registration.event_id,
            quantity: registration.quantity,
            status: registration.status,
            payment_status: registration.payment_status,
            payment_amount: registration.payment_amount,
            payment_currency: registration.payment_currency,
            payment_reference: registration.payment_reference,
            failure_reason: registration.failure_reason,
            cancelled_at: registration.cancelled_at,
            created_at: registration.created_at,
            updated_at: registration.updated_at,
        }
    }
}

/// Response payload for a registration attempt.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterForEventResponse {
    pub message: String,
    pub requires_payment: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_message: Option<String>,
    pub registration: RegistrationView,
}

/// Optional request payload for `POST /events/:event_id/cancel-rsvp`.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CancelRegistrationRequest {
    #[validate(length(max = 500, message = "Reason must be at most 500 characters"))]
    pub reason: Option<String>,
}

/// Response payload for a cancellation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRegistrationResponse {
    pub message: String,
    pub registration: RegistrationView,
}
