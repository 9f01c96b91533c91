//! Domain services for event ticketing.
//!
//! Services contain business logic that operates on domain models. Storage,
//! the payment provider and ticket delivery sit behind traits.

pub mod gateway;
pub mod notification;
pub mod registration;
pub mod settlement;
pub mod store;

pub use gateway::{
    GatewayError, MockPaymentGateway, MockPushBehavior, PaymentGateway, ProviderStatus, PushReceipt,
    PushRequest,
};

pub use notification::{
    MockTicketIssuer, NotificationResult, Recipient, TicketIssuer, TicketNotice,
};

pub use registration::{RegistrationError, RegistrationResult, RegistrationService};

pub use settlement::{
    CallbackDisposition, ReconciliationPolicy, ReconciliationReport, SettlementService,
};

pub use store::{
    AdmissionOutcome, InMemoryRegistrationStore, NewReservation, RegistrationStore,
    ReservationKind, SettlementOutcome, StoreError, CAPACITY_EXHAUSTED_AT_SETTLEMENT,
    PAYMENT_EXPIRED,
};
