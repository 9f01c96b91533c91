//! Registration store: the persisted admission ledger.
//!
//! Every check-and-write that guards capacity or the per-pair uniqueness rule
//! happens inside a single store operation, so callers never see a window
//! between the check and the write.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{
    Event, PaymentOutcome, PaymentStatus, Registration, RegistrationStatus, Settlement,
};
use crate::services::gateway::PushReceipt;
use crate::services::notification::Recipient;

/// Reason recorded when a success would oversell the event.
pub const CAPACITY_EXHAUSTED_AT_SETTLEMENT: &str = "capacity exhausted at settlement";

/// Reason recorded when a pending payment times out.
pub const PAYMENT_EXPIRED: &str = "payment expired";

/// Storage errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Storage conflict: {0}")]
    Conflict(String),
}

/// What kind of slot is being reserved.
#[derive(Debug, Clone, PartialEq)]
pub enum ReservationKind {
    /// Confirmed on write.
    Free,
    /// Held as PENDING until the payment settles.
    Paid {
        phone_number: String,
        amount: Decimal,
        currency: String,
    },
}

/// An admission attempt for one `(event, user)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReservation {
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub quantity: i32,
    pub kind: ReservationKind,
}

/// Result of an atomic admission attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionOutcome {
    /// The row was written. `reused` is set when an inactive row was reset.
    Admitted {
        registration: Registration,
        reused: bool,
    },
    AlreadyRegistered,
    InProgress,
    CapacityExceeded {
        remaining: i64,
    },
    EventNotFound,
}

/// Result of applying a provider result to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum SettlementOutcome {
    /// PENDING became CONFIRMED. The only outcome that issues a ticket.
    Confirmed(Registration),
    /// The payment failed; the row is FAILED (or stays CANCELLED).
    Failed(Registration),
    /// Paid, but confirming would oversell. Needs an out-of-band refund.
    OverCapacity(Registration),
    /// Paid after the user cancelled. Needs an out-of-band refund.
    SettledAfterCancel(Registration),
    /// A result was already applied; nothing changed.
    AlreadySettled(Registration),
    /// No registration carries this correlation id.
    UnknownRequest,
}

impl SettlementOutcome {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            SettlementOutcome::Confirmed(_) => "confirmed",
            SettlementOutcome::Failed(_) => "failed",
            SettlementOutcome::OverCapacity(_) => "over_capacity",
            SettlementOutcome::SettledAfterCancel(_) => "settled_after_cancel",
            SettlementOutcome::AlreadySettled(_) => "already_settled",
            SettlementOutcome::UnknownRequest => "unknown_request",
        }
    }
}

/// Persisted admission ledger.
#[async_trait::async_trait]
pub trait RegistrationStore: Send + Sync {
    async fn find_event(&self, event_id: Uuid) -> Result<Option<Event>, StoreError>;

    /// Contact details for ticket delivery.
    async fn find_contact(&self, user_id: Uuid) -> Result<Option<Recipient>, StoreError>;

    async fn find_registration(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Registration>, StoreError>;

    /// Atomically check conflicts and capacity, then create or reuse the row.
    async fn reserve(&self, reservation: NewReservation) -> Result<AdmissionOutcome, StoreError>;

    /// Store the provider correlation ids on a PENDING registration.
    async fn attach_gateway_request(
        &self,
        registration_id: Uuid,
        receipt: &PushReceipt,
    ) -> Result<Option<Registration>, StoreError>;

    /// Fail a registration whose payment never got a provider result.
    ///
    /// Only applies while the payment is still PENDING; returns `None` otherwise.
    async fn mark_initiation_failed(
        &self,
        registration_id: Uuid,
        reason: &str,
    ) -> Result<Option<Registration>, StoreError>;

    /// Apply a provider result. Only a PENDING payment transitions.
    async fn settle(&self, settlement: &Settlement) -> Result<SettlementOutcome, StoreError>;

    /// Cancel the pair's active registration. `None` when nothing is active.
    async fn cancel(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        reason: Option<String>,
    ) -> Result<Option<Registration>, StoreError>;

    /// PENDING payments last touched before `older_than`, oldest first.
    async fn list_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Registration>, StoreError>;
}

#[derive(Debug, Default)]
struct Ledger {
    events: HashMap<Uuid, Event>,
    contacts: HashMap<Uuid, Recipient>,
    registrations: HashMap<Uuid, Registration>,
}

impl Ledger {
    fn pair(&self, event_id: Uuid, user_id: Uuid) -> Option<&Registration> {
        self.registrations
            .values()
            .find(|r| r.event_id == event_id && r.user_id == user_id)
    }

    fn by_request(&self, gateway_request_id: &str) -> Option<Uuid> {
        self.registrations
            .values()
            .find(|r| r.gateway_request_id.as_deref() == Some(gateway_request_id))
            .map(|r| r.id)
    }

    fn confirmed_quantity(&self, event_id: Uuid) -> i64 {
        self.registrations
            .values()
            .filter(|r| r.event_id == event_id && r.status == RegistrationStatus::Confirmed)
            .map(|r| i64::from(r.quantity))
            .sum()
    }
}

/// In-memory store for tests and local development.
///
/// A single mutex serializes every operation, which gives the same
/// guarantees the Postgres store gets from row locks.
#[derive(Debug, Default)]
pub struct InMemoryRegistrationStore {
    ledger: Mutex<Ledger>,
}

impl InMemoryRegistrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_event(&self, event: Event) {
        self.ledger.lock().await.events.insert(event.id, event);
    }

    pub async fn insert_contact(&self, user_id: Uuid, recipient: Recipient) {
        self.ledger.lock().await.contacts.insert(user_id, recipient);
    }

    /// Change an event's price after registrations exist.
    pub async fn set_event_price(&self, event_id: Uuid, price: Decimal) {
        if let Some(event) = self.ledger.lock().await.events.get_mut(&event_id) {
            event.price = price;
        }
    }

    /// Move a registration's `updated_at` into the past.
    pub async fn backdate(&self, registration_id: Uuid, updated_at: DateTime<Utc>) {
        if let Some(r) = self
            .ledger
            .lock()
            .await
            .registrations
            .get_mut(&registration_id)
        {
            r.updated_at = updated_at;
        }
    }

    /// All registrations, in no particular order.
    pub async fn snapshot(&self) -> Vec<Registration> {
        self.ledger
            .lock()
            .await
            .registrations
            .values()
            .cloned()
            .collect()
    }

    pub async fn confirmed_quantity(&self, event_id: Uuid) -> i64 {
        self.ledger.lock().await.confirmed_quantity(event_id)
    }
}

fn reset_for_attempt(registration: &mut Registration, reservation: &NewReservation, now: DateTime<Utc>) {
    registration.quantity = reservation.quantity;
    registration.gateway_request_id = None;
    registration.merchant_request_id = None;
    registration.payment_reference = None;
    registration.settled_amount = None;
    registration.settled_at = None;
    registration.failure_reason = None;
    registration.cancelled_at = None;
    registration.cancellation_reason = None;
    registration.updated_at = now;

    match &reservation.kind {
        ReservationKind::Free => {
            registration.status = RegistrationStatus::Confirmed;
            registration.payment_status = PaymentStatus::None;
            registration.phone_number = None;
            registration.payment_amount = None;
            registration.payment_currency = None;
        }
        ReservationKind::Paid {
            phone_number,
            amount,
            currency,
        } => {
            registration.status = RegistrationStatus::Pending;
            registration.payment_status = PaymentStatus::Pending;
            registration.phone_number = Some(phone_number.clone());
            registration.payment_amount = Some(*amount);
            registration.payment_currency = Some(currency.clone());
        }
    }
}

#[async_trait::async_trait]
impl RegistrationStore for InMemoryRegistrationStore {
    async fn find_event(&self, event_id: Uuid) -> Result<Option<Event>, StoreError> {
        Ok(self.ledger.lock().await.events.get(&event_id).cloned())
    }

    async fn find_contact(&self, user_id: Uuid) -> Result<Option<Recipient>, StoreError> {
        Ok(self.ledger.lock().await.contacts.get(&user_id).cloned())
    }

    async fn find_registration(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Registration>, StoreError> {
        Ok(self.ledger.lock().await.pair(event_id, user_id).cloned())
    }

    async fn reserve(&self, reservation: NewReservation) -> Result<AdmissionOutcome, StoreError> {
        let mut ledger = self.ledger.lock().await;

        let Some(event) = ledger.events.get(&reservation.event_id).cloned() else {
            return Ok(AdmissionOutcome::EventNotFound);
        };

        let existing = ledger
            .pair(reservation.event_id, reservation.user_id)
            .map(|r| (r.id, r.status));
        match existing {
            Some((_, RegistrationStatus::Confirmed)) => {
                return Ok(AdmissionOutcome::AlreadyRegistered)
            }
            Some((_, RegistrationStatus::Pending)) => return Ok(AdmissionOutcome::InProgress),
            _ => {}
        }

        let confirmed = ledger.confirmed_quantity(event.id);
        if let Some(remaining) = event.remaining_capacity(confirmed) {
            if i64::from(reservation.quantity) > remaining {
                return Ok(AdmissionOutcome::CapacityExceeded { remaining });
            }
        }

        let now = Utc::now();
        let (registration, reused) = match existing {
            Some((id, _)) => {
                let row = ledger
                    .registrations
                    .get_mut(&id)
                    .ok_or_else(|| StoreError::Backend("registration vanished".to_string()))?;
                reset_for_attempt(row, &reservation, now);
                (row.clone(), true)
            }
            None => {
                let mut row = Registration {
                    id: Uuid::new_v4(),
                    event_id: reservation.event_id,
                    user_id: reservation.user_id,
                    quantity: reservation.quantity,
                    status: RegistrationStatus::Confirmed,
                    payment_status: PaymentStatus::None,
                    phone_number: None,
                    payment_amount: None,
                    payment_currency: None,
                    gateway_request_id: None,
                    merchant_request_id: None,
                    payment_reference: None,
                    settled_amount: None,
                    settled_at: None,
                    failure_reason: None,
                    cancelled_at: None,
                    cancellation_reason: None,
                    created_at: now,
                    updated_at: now,
                };
                reset_for_attempt(&mut row, &reservation, now);
                ledger.registrations.insert(row.id, row.clone());
                (row, false)
            }
        };

        Ok(AdmissionOutcome::Admitted {
            registration,
            reused,
        })
    }

    async fn attach_gateway_request(
        &self,
        registration_id: Uuid,
        receipt: &PushReceipt,
    ) -> Result<Option<Registration>, StoreError> {
        let mut ledger = self.ledger.lock().await;

        if let Some(owner) = ledger.by_request(&receipt.checkout_request_id) {
            if owner != registration_id {
                return Err(StoreError::Conflict(format!(
                    "gateway request {} already attached",
                    receipt.checkout_request_id
                )));
            }
        }

        let Some(row) = ledger.registrations.get_mut(&registration_id) else {
            return Ok(None);
        };
        if !row.awaiting_payment() {
            return Ok(None);
        }
        row.gateway_request_id = Some(receipt.checkout_request_id.clone());
        row.merchant_request_id = receipt.merchant_request_id.clone();
        row.updated_at = Utc::now();
        Ok(Some(row.clone()))
    }

    async fn mark_initiation_failed(
        &self,
        registration_id: Uuid,
        reason: &str,
    ) -> Result<Option<Registration>, StoreError> {
        let mut ledger = self.ledger.lock().await;
        let Some(row) = ledger.registrations.get_mut(&registration_id) else {
            return Ok(None);
        };
        if !row.awaiting_payment() {
            return Ok(None);
        }
        row.payment_status = PaymentStatus::Failed;
        if row.status == RegistrationStatus::Pending {
            row.status = RegistrationStatus::Failed;
        }
        row.failure_reason = Some(reason.to_string());
        row.updated_at = Utc::now();
        Ok(Some(row.clone()))
    }

    async fn settle(&self, settlement: &Settlement) -> Result<SettlementOutcome, StoreError> {
        let mut ledger = self.ledger.lock().await;

        let Some(id) = ledger.by_request(&settlement.gateway_request_id) else {
            return Ok(SettlementOutcome::UnknownRequest);
        };
        let Some(current) = ledger.registrations.get(&id).cloned() else {
            return Ok(SettlementOutcome::UnknownRequest);
        };
        if !current.awaiting_payment() {
            return Ok(SettlementOutcome::AlreadySettled(current));
        }

        let event = ledger.events.get(&current.event_id).cloned();
        let confirmed = ledger.confirmed_quantity(current.event_id);
        let now = Utc::now();
        let mut row = current;

        let outcome: fn(Registration) -> SettlementOutcome = match &settlement.outcome {
            PaymentOutcome::Succeeded {
                receipt,
                amount,
                settled_at,
            } => {
                row.payment_status = PaymentStatus::Success;
                row.payment_reference = receipt.clone();
                row.settled_amount = amount.or(row.payment_amount);
                row.settled_at = Some(settled_at.unwrap_or(now));

                match row.status {
                    RegistrationStatus::Pending => {
                        let remaining = event.and_then(|e| e.remaining_capacity(confirmed));
                        if remaining.is_some_and(|left| i64::from(row.quantity) > left) {
                            row.status = RegistrationStatus::Failed;
                            row.failure_reason = Some(CAPACITY_EXHAUSTED_AT_SETTLEMENT.to_string());
                            SettlementOutcome::OverCapacity
                        } else {
                            row.status = RegistrationStatus::Confirmed;
                            SettlementOutcome::Confirmed
                        }
                    }
                    _ => SettlementOutcome::SettledAfterCancel,
                }
            }
            PaymentOutcome::Failed { reason, .. } => {
                row.payment_status = PaymentStatus::Failed;
                if row.status == RegistrationStatus::Pending {
                    row.status = RegistrationStatus::Failed;
                }
                row.failure_reason = Some(reason.clone());
                SettlementOutcome::Failed
            }
        };

        row.updated_at = now;
        ledger.registrations.insert(row.id, row.clone());
        Ok(outcome(row))
    }

    async fn cancel(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        reason: Option<String>,
    ) -> Result<Option<Registration>, StoreError> {
        let mut ledger = self.ledger.lock().await;
        let Some(id) = ledger
            .pair(event_id, user_id)
            .filter(|r| r.is_active())
            .map(|r| r.id)
        else {
            return Ok(None);
        };
        let Some(row) = ledger.registrations.get_mut(&id) else {
            return Ok(None);
        };

        let now = Utc::now();
        row.status = RegistrationStatus::Cancelled;
        row.cancelled_at = Some(now);
        row.cancellation_reason = reason;
        row.updated_at = now;
        Ok(Some(row.clone()))
    }

    async fn list_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Registration>, StoreError> {
        let ledger = self.ledger.lock().await;
        let mut stale: Vec<Registration> = ledger
            .registrations
            .values()
            .filter(|r| r.awaiting_payment() && r.updated_at < older_than)
            .cloned()
            .collect();
        stale.sort_by_key(|r| r.updated_at);
        stale.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(stale)
    }
}
