//! Registration service: admission, the free and paid branches, cancellation.

use std::sync::Arc;

use shared::validation::{
    mask_phone_number, normalize_phone_number, MAX_TICKET_QUANTITY, MIN_TICKET_QUANTITY,
};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{Event, Registration};
use crate::services::gateway::{GatewayError, PaymentGateway, PushRequest};
use crate::services::notification::{NotificationResult, TicketIssuer, TicketNotice};
use crate::services::store::{
    AdmissionOutcome, NewReservation, RegistrationStore, ReservationKind, StoreError,
};

/// Errors returned by registration operations.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Quantity must be between {min} and {max}")]
    InvalidQuantity { min: i32, max: i32 },

    #[error("Phone number is required for paid events")]
    PhoneNumberRequired,

    #[error("Invalid phone number format")]
    InvalidPhoneFormat,

    #[error("Event not found")]
    EventNotFound,

    #[error("Paid event has no valid price")]
    EventNotChargeable,

    #[error("Registration not found")]
    NotFound,

    #[error("Already registered for this event")]
    AlreadyRegistered,

    #[error("A registration for this event is awaiting payment")]
    RegistrationInProgress,

    #[error("Not enough tickets left ({remaining} remaining)")]
    CapacityExceeded { remaining: i64 },

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Successful outcome of a registration attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationResult {
    /// Free event: the registration is confirmed and the ticket sent.
    Confirmed { registration: Registration },
    /// Paid event: the customer has been prompted on their handset.
    PaymentInitiated {
        registration: Registration,
        checkout_request_id: String,
        customer_message: Option<String>,
    },
}

impl RegistrationResult {
    pub fn registration(&self) -> &Registration {
        match self {
            RegistrationResult::Confirmed { registration }
            | RegistrationResult::PaymentInitiated { registration, .. } => registration,
        }
    }

    pub fn requires_payment(&self) -> bool {
        matches!(self, RegistrationResult::PaymentInitiated { .. })
    }
}

/// Admission control and the two registration branches.
pub struct RegistrationService {
    store: Arc<dyn RegistrationStore>,
    gateway: Arc<dyn PaymentGateway>,
    tickets: Arc<dyn TicketIssuer>,
    max_quantity: i32,
}

impl RegistrationService {
    pub fn new(
        store: Arc<dyn RegistrationStore>,
        gateway: Arc<dyn PaymentGateway>,
        tickets: Arc<dyn TicketIssuer>,
    ) -> Self {
        Self {
            store,
            gateway,
            tickets,
            max_quantity: MAX_TICKET_QUANTITY,
        }
    }

    /// Lower the per-registration ticket limit. Never raised above the hard limit.
    pub fn with_max_quantity(mut self, max_quantity: i32) -> Self {
        self.max_quantity = max_quantity.clamp(MIN_TICKET_QUANTITY, MAX_TICKET_QUANTITY);
        self
    }

    /// Register `user_id` for `event_id`.
    pub async fn register(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        quantity: i32,
        phone_number: Option<&str>,
    ) -> Result<RegistrationResult, RegistrationError> {
        if !(MIN_TICKET_QUANTITY..=self.max_quantity).contains(&quantity) {
            return Err(RegistrationError::InvalidQuantity {
                min: MIN_TICKET_QUANTITY,
                max: self.max_quantity,
            });
        }

        let event = self
            .store
            .find_event(event_id)
            .await?
            .ok_or(RegistrationError::EventNotFound)?;

        let kind = if event.is_paid {
            if !event.is_chargeable() {
                warn!(event_id = %event.id, price = %event.price, "Paid event has no valid price");
                return Err(RegistrationError::EventNotChargeable);
            }
            let raw = phone_number
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .ok_or(RegistrationError::PhoneNumberRequired)?;
            let phone_number =
                normalize_phone_number(raw).map_err(|_| RegistrationError::InvalidPhoneFormat)?;
            ReservationKind::Paid {
                phone_number,
                amount: event.total_price(quantity),
                currency: event.currency.clone(),
            }
        } else {
            ReservationKind::Free
        };

        let outcome = self
            .store
            .reserve(NewReservation {
                event_id,
                user_id,
                quantity,
                kind,
            })
            .await?;

        let (registration, reused) = match outcome {
            AdmissionOutcome::Admitted {
                registration,
                reused,
            } => (registration, reused),
            AdmissionOutcome::AlreadyRegistered => return Err(RegistrationError::AlreadyRegistered),
            AdmissionOutcome::InProgress => return Err(RegistrationError::RegistrationInProgress),
            AdmissionOutcome::CapacityExceeded { remaining } => {
                info!(%event_id, quantity, remaining, "Registration rejected: capacity exceeded");
                return Err(RegistrationError::CapacityExceeded { remaining });
            }
            AdmissionOutcome::EventNotFound => return Err(RegistrationError::EventNotFound),
        };

        info!(
            registration_id = %registration.id,
            %event_id,
            %user_id,
            quantity,
            reused,
            status = %registration.status,
            "Registration admitted"
        );

        if !event.is_paid {
            deliver_tickets(self.store.as_ref(), self.tickets.as_ref(), &registration, &event)
                .await;
            return Ok(RegistrationResult::Confirmed { registration });
        }

        self.initiate_payment(registration, &event).await
    }

    async fn initiate_payment(
        &self,
        registration: Registration,
        event: &Event,
    ) -> Result<RegistrationResult, RegistrationError> {
        let request = PushRequest {
            phone_number: registration.phone_number.clone().unwrap_or_default(),
            amount: registration.payment_amount.unwrap_or_default(),
            reference: format!("TKT{}", registration.id.simple()),
            description: event.title.clone(),
        };
        let masked = mask_phone_number(&request.phone_number);

        let receipt = match self.gateway.initiate_push(request).await {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!(
                    registration_id = %registration.id,
                    phone = %masked,
                    error = %e,
                    "Payment initiation failed"
                );
                self.store
                    .mark_initiation_failed(registration.id, &e.to_string())
                    .await?;
                return Err(RegistrationError::Gateway(e));
            }
        };

        let registration = self
            .store
            .attach_gateway_request(registration.id, &receipt)
            .await?
            .unwrap_or(registration);

        info!(
            registration_id = %registration.id,
            checkout_request_id = %receipt.checkout_request_id,
            phone = %masked,
            amount = ?registration.payment_amount,
            "Payment initiated"
        );

        Ok(RegistrationResult::PaymentInitiated {
            registration,
            checkout_request_id: receipt.checkout_request_id,
            customer_message: receipt.customer_message,
        })
    }

    /// Cancel the caller's active registration.
    pub async fn cancel(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        reason: Option<String>,
    ) -> Result<Registration, RegistrationError> {
        let reason = reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
        let registration = self
            .store
            .cancel(event_id, user_id, reason)
            .await?
            .ok_or(RegistrationError::NotFound)?;

        info!(
            registration_id = %registration.id,
            %event_id,
            %user_id,
            "Registration cancelled"
        );
        Ok(registration)
    }

    /// The caller's registration for this event, if any.
    pub async fn find(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Registration>, RegistrationError> {
        Ok(self.store.find_registration(event_id, user_id).await?)
    }
}

/// Issue the ticket and notify the organizer. Failures are logged only.
pub(crate) async fn deliver_tickets(
    store: &dyn RegistrationStore,
    tickets: &dyn TicketIssuer,
    registration: &Registration,
    event: &Event,
) {
    let attendee = match store.find_contact(registration.user_id).await {
        Ok(contact) => contact,
        Err(e) => {
            warn!(registration_id = %registration.id, error = %e, "Failed to load attendee contact");
            None
        }
    };
    let organizer = match store.find_contact(event.organizer_id).await {
        Ok(contact) => contact,
        Err(e) => {
            warn!(event_id = %event.id, error = %e, "Failed to load organizer contact");
            None
        }
    };

    let notice = TicketNotice {
        registration: registration.clone(),
        event: event.clone(),
        attendee,
        organizer,
    };

    if let NotificationResult::Failed(e) = tickets.issue_ticket(&notice).await {
        warn!(registration_id = %registration.id, error = %e, "Failed to issue ticket");
    }
    if let NotificationResult::Failed(e) = tickets.notify_organizer(&notice).await {
        warn!(registration_id = %registration.id, error = %e, "Failed to notify organizer");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PaymentStatus, RegistrationStatus};
    use crate::services::gateway::MockPaymentGateway;
    use crate::services::notification::MockTicketIssuer;
    use crate::services::store::InMemoryRegistrationStore;
    use rust_decimal::Decimal;

    struct Harness {
        store: Arc<InMemoryRegistrationStore>,
        gateway: Arc<MockPaymentGateway>,
        tickets: Arc<MockTicketIssuer>,
        service: RegistrationService,
    }

    fn harness_with(gateway: MockPaymentGateway) -> Harness {
        let store = Arc::new(InMemoryRegistrationStore::new());
        let gateway = Arc::new(gateway);
        let tickets = Arc::new(MockTicketIssuer::new());
        let service = RegistrationService::new(store.clone(), gateway.clone(), tickets.clone());
        Harness {
            store,
            gateway,
            tickets,
            service,
        }
    }

    fn harness() -> Harness {
        harness_with(MockPaymentGateway::new())
    }

    async fn seed_event(h: &Harness, max_attendees: i32, price: i64) -> Event {
        let event = Event {
            id: Uuid::new_v4(),
            organizer_id: Uuid::new_v4(),
            title: "Nairobi Tech Week".to_string(),
            max_attendees,
            is_paid: price > 0,
            price: Decimal::from(price),
            currency: "KES".to_string(),
            starts_at: None,
        };
        h.store.insert_event(event.clone()).await;
        event
    }

    #[tokio::test]
    async fn test_free_event_fills_up() {
        let h = harness();
        let event = seed_event(&h, 2, 0).await;

        let result = h
            .service
            .register(event.id, Uuid::new_v4(), 2, None)
            .await
            .unwrap();
        assert!(!result.requires_payment());
        assert_eq!(result.registration().status, RegistrationStatus::Confirmed);
        assert_eq!(result.registration().payment_status, PaymentStatus::None);
        assert_eq!(h.tickets.tickets_issued(), 1);
        assert_eq!(h.tickets.organizer_notices(), 1);

        let err = h
            .service
            .register(event.id, Uuid::new_v4(), 1, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::CapacityExceeded { remaining: 0 }
        ));
        assert_eq!(h.gateway.push_count(), 0);
    }

    #[tokio::test]
    async fn test_paid_event_initiates_push() {
        let h = harness();
        let event = seed_event(&h, 100, 500).await;

        let result = h
            .service
            .register(event.id, Uuid::new_v4(), 3, Some("0712345678"))
            .await
            .unwrap();

        let RegistrationResult::PaymentInitiated {
            registration,
            checkout_request_id,
            ..
        } = result
        else {
            panic!("Expected payment initiation");
        };
        assert_eq!(registration.status, RegistrationStatus::Pending);
        assert_eq!(registration.payment_status, PaymentStatus::Pending);
        assert_eq!(registration.payment_amount, Some(Decimal::from(1500)));
        assert_eq!(registration.phone_number.as_deref(), Some("254712345678"));
        assert_eq!(
            registration.gateway_request_id.as_deref(),
            Some(checkout_request_id.as_str())
        );

        let pushes = h.gateway.pushes();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].amount, Decimal::from(1500));
        assert_eq!(pushes[0].phone_number, "254712345678");
        assert_eq!(h.tickets.tickets_issued(), 0);
    }

    #[tokio::test]
    async fn test_validation_happens_before_any_write() {
        let h = harness();
        let event = seed_event(&h, 0, 500).await;
        let user = Uuid::new_v4();

        let err = h.service.register(event.id, user, 0, None).await.unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidQuantity { .. }));
        let err = h.service.register(event.id, user, 11, None).await.unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidQuantity { .. }));
        let err = h.service.register(event.id, user, 1, None).await.unwrap_err();
        assert!(matches!(err, RegistrationError::PhoneNumberRequired));
        let err = h
            .service
            .register(event.id, user, 1, Some("12345678"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidPhoneFormat));

        assert!(h.store.snapshot().await.is_empty());
        assert_eq!(h.gateway.push_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_event() {
        let h = harness();
        let err = h
            .service
            .register(Uuid::new_v4(), Uuid::new_v4(), 1, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::EventNotFound));
    }

    #[tokio::test]
    async fn test_duplicate_registration_conflicts() {
        let h = harness();
        let free = seed_event(&h, 0, 0).await;
        let paid = seed_event(&h, 0, 500).await;
        let user = Uuid::new_v4();

        h.service.register(free.id, user, 1, None).await.unwrap();
        let err = h.service.register(free.id, user, 1, None).await.unwrap_err();
        assert!(matches!(err, RegistrationError::AlreadyRegistered));

        h.service
            .register(paid.id, user, 1, Some("254712345678"))
            .await
            .unwrap();
        let err = h
            .service
            .register(paid.id, user, 1, Some("254712345678"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::RegistrationInProgress));
        assert_eq!(h.gateway.push_count(), 1);
    }

    #[tokio::test]
    async fn test_gateway_rejection_fails_registration() {
        let h = harness_with(MockPaymentGateway::rejecting("Invalid Access Token"));
        let event = seed_event(&h, 0, 500).await;
        let user = Uuid::new_v4();

        let err = h
            .service
            .register(event.id, user, 1, Some("0712345678"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::Gateway(GatewayError::Rejected(_))
        ));

        let row = h.service.find(event.id, user).await.unwrap().unwrap();
        assert_eq!(row.status, RegistrationStatus::Failed);
        assert_eq!(row.payment_status, PaymentStatus::Failed);
        assert!(row.failure_reason.unwrap().contains("Invalid Access Token"));

        h.gateway.set_behavior(crate::services::gateway::MockPushBehavior::Accept);
        let retry = h
            .service
            .register(event.id, user, 1, Some("0712345678"))
            .await
            .unwrap();
        assert_eq!(retry.registration().id, row.id);
        assert!(retry.registration().failure_reason.is_none());
    }

    #[tokio::test]
    async fn test_cancel_then_reregister_reuses_row() {
        let h = harness();
        let event = seed_event(&h, 0, 0).await;
        let user = Uuid::new_v4();

        let first = h.service.register(event.id, user, 1, None).await.unwrap();
        let cancelled = h
            .service
            .cancel(event.id, user, Some("  Schedule clash ".to_string()))
            .await
            .unwrap();
        assert_eq!(cancelled.status, RegistrationStatus::Cancelled);
        assert_eq!(cancelled.cancellation_reason.as_deref(), Some("Schedule clash"));
        assert!(cancelled.cancelled_at.is_some());

        let err = h.service.cancel(event.id, user, None).await.unwrap_err();
        assert!(matches!(err, RegistrationError::NotFound));

        let second = h.service.register(event.id, user, 4, None).await.unwrap();
        assert_eq!(second.registration().id, first.registration().id);
        assert_eq!(second.registration().quantity, 4);
        assert_eq!(second.registration().status, RegistrationStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_amount_snapshot_survives_price_change() {
        let h = harness();
        let event = seed_event(&h, 0, 500).await;
        let user = Uuid::new_v4();

        h.service
            .register(event.id, user, 2, Some("0712345678"))
            .await
            .unwrap();
        h.store.set_event_price(event.id, Decimal::from(900)).await;

        let row = h.service.find(event.id, user).await.unwrap().unwrap();
        assert_eq!(row.payment_amount, Some(Decimal::from(1000)));
    }

    #[tokio::test]
    async fn test_configured_max_quantity() {
        let store = Arc::new(InMemoryRegistrationStore::new());
        let service = RegistrationService::new(
            store,
            Arc::new(MockPaymentGateway::new()),
            Arc::new(MockTicketIssuer::new()),
        )
        .with_max_quantity(4);

        let err = service
            .register(Uuid::new_v4(), Uuid::new_v4(), 5, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::InvalidQuantity { min: 1, max: 4 }
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registrations_for_last_slot() {
        let h = harness();
        let event = seed_event(&h, 3, 0).await;
        h.service
            .register(event.id, Uuid::new_v4(), 2, None)
            .await
            .unwrap();

        let service = Arc::new(h.service);
        let mut handles = Vec::new();
        for _ in 0..12 {
            let service = service.clone();
            let event_id = event.id;
            handles.push(tokio::spawn(async move {
                service.register(event_id, Uuid::new_v4(), 1, None).await
            }));
        }

        let mut confirmed = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => confirmed += 1,
                Err(RegistrationError::CapacityExceeded { remaining }) => {
                    assert_eq!(remaining, 0)
                }
                Err(e) => panic!("Unexpected error {:?}", e),
            }
        }
        assert_eq!(confirmed, 1);
        assert_eq!(h.store.confirmed_quantity(event.id).await, 3);
    }
}
