//! Shared utilities and common types for the ticketing backend.
//!
//! This crate provides common functionality used across all other crates:
//! - JWT access token validation
//! - Phone number normalization and request validation helpers

pub mod jwt;
pub mod validation;
