//! Event registration entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::models::{PaymentStatus, Registration, RegistrationStatus};
use rust_decimal::Decimal;
use sqlx::FromRow;
use uuid::Uuid;

/// Database enum for registration status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "registration_status", rename_all = "lowercase")]
pub enum RegistrationStatusDb {
    Pending,
    Confirmed,
    Cancelled,
    Failed,
}

impl From<RegistrationStatusDb> for RegistrationStatus {
    fn from(status: RegistrationStatusDb) -> Self {
        match status {
            RegistrationStatusDb::Pending => RegistrationStatus::Pending,
            RegistrationStatusDb::Confirmed => RegistrationStatus::Confirmed,
            RegistrationStatusDb::Cancelled => RegistrationStatus::Cancelled,
            RegistrationStatusDb::Failed => RegistrationStatus::Failed,
        }
    }
}

impl From<RegistrationStatus> for RegistrationStatusDb {
    fn from(status: RegistrationStatus) -> Self {
        match status {
            RegistrationStatus::Pending => RegistrationStatusDb::Pending,
            RegistrationStatus::Confirmed => RegistrationStatusDb::Confirmed,
            RegistrationStatus::Cancelled => RegistrationStatusDb::Cancelled,
            RegistrationStatus::Failed => RegistrationStatusDb::Failed,
        }
    }
}

/// Database enum for payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
pub enum PaymentStatusDb {
    None,
    Pending,
    Success,
    Failed,
}

impl From<PaymentStatusDb> for PaymentStatus {
    fn from(status: PaymentStatusDb) -> Self {
        match status {
            PaymentStatusDb::None => PaymentStatus::None,
            PaymentStatusDb::Pending => PaymentStatus::Pending,
            PaymentStatusDb::Success => PaymentStatus::Success,
            PaymentStatusDb::Failed => PaymentStatus::Failed,
        }
    }
}

impl From<PaymentStatus> for PaymentStatusDb {
    fn from(status: PaymentStatus) -> Self {
        match status {
            PaymentStatus::None => PaymentStatusDb::None,
            PaymentStatus::Pending => PaymentStatusDb::Pending,
            PaymentStatus::Success => PaymentStatusDb::Success,
            PaymentStatus::Failed => PaymentStatusDb::Failed,
        }
    }
}

/// Database row mapping for the event_registrations table.
#[derive(Debug, Clone, FromRow)]
pub struct RegistrationEntity {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub quantity: i32,
    pub status: RegistrationStatusDb,
    pub payment_status: PaymentStatusDb,
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

impl From<RegistrationEntity> for Registration {
    fn from(entity: RegistrationEntity) -> Self {
        Self {
            id: entity.id,
            event_id: entity.event_id,
            user_id: entity.user_id,
            quantity: entity.quantity,
            status: entity.status.into(),
            payment_status: entity.payment_status.into(),
            phone_number: entity.phone_number,
            payment_amount: entity.payment_amount,
            payment_currency: entity.payment_currency,
            gateway_request_id: entity.gateway_request_id,
            merchant_request_id: entity.merchant_request_id,
            payment_reference: entity.payment_reference,
            settled_amount: entity.settled_amount,
            settled_at: entity.settled_at,
            failure_reason: entity.failure_reason,
            cancelled_at: entity.cancelled_at,
            cancellation_reason: entity.cancellation_reason,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        }
    }
}

/// Column list shared by every query returning a full registration row.
pub const REGISTRATION_COLUMNS: &str = "id, event_id, user_id, quantity, status, payment_status, \
    phone_number, payment_amount, payment_currency, gateway_request_id, merchant_request_id, \
    payment_reference, settled_amount, settled_at, failure_reason, cancelled_at, \
    cancellation_reason, created_at, updated_at";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_conversions_round_trip() {
        for status in [
            RegistrationStatus::Pending,
            RegistrationStatus::Confirmed,
            RegistrationStatus::Cancelled,
            RegistrationStatus::Failed,
        ] {
            let db: RegistrationStatusDb = status.into();
            assert_eq!(RegistrationStatus::from(db), status);
        }
        assert_eq!(
            PaymentStatus::from(PaymentStatusDb::from(PaymentStatus::Success)),
            PaymentStatus::Success
        );
    }
}
