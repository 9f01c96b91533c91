//! Database entity definitions.
//!
//! Entities are direct mappings to database rows.

pub mod event;
pub mod registration;
pub mod user;

pub use event::EventEntity;
pub use registration::{
    PaymentStatusDb, RegistrationEntity, RegistrationStatusDb, REGISTRATION_COLUMNS,
};
pub use user::UserContactEntity;
