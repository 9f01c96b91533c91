//! Domain layer for the ticketing backend.
//!
//! This crate contains:
//! - Domain models (Event, Registration, payment callback envelope)
//! - Registration and settlement services
//! - The storage, payment gateway and ticket issuance seams

pub mod models;
pub mod services;
