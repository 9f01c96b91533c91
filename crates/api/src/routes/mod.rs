//! HTTP route handlers.

pub mod health;
pub mod payments;
pub mod registrations;
