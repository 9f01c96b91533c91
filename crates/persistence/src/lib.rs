//! Persistence layer for the ticketing backend.
//!
//! This crate contains:
//! - Database connection management
//! - Entity definitions (database row mappings)
//! - Repository implementations, including the Postgres registration store

pub mod db;
pub mod entities;
pub mod metrics;
pub mod repositories;
