//! Domain models for event ticketing.

pub mod event;
pub mod payment_callback;
pub mod registration;

pub use event::Event;
pub use payment_callback::{CallbackAck, PaymentOutcome, Settlement, StkCallbackEnvelope};
pub use registration::{
    CancelRegistrationRequest, CancelRegistrationResponse, PaymentStatus, RegisterForEventRequest,
    RegisterForEventResponse, Registration, RegistrationStatus, RegistrationView,
};
