//! Event entity (database row mapping).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;
use uuid::Uuid;

/// Database row mapping for the events table.
#[derive(Debug, Clone, FromRow)]
pub struct EventEntity {
    pub id: Uuid,
    pub organizer_id: Uuid,
    pub title: String,
    pub max_attendees: i32,
    pub is_paid: bool,
    pub price: Decimal,
    pub currency: String,
    pub starts_at: Option<DateTime<Utc>>,
}

impl From<EventEntity> for domain::models::Event {
    fn from(entity: EventEntity) -> Self {
        Self {
            id: entity.id,
            organizer_id: entity.organizer_id,
            title: entity.title,
            max_attendees: entity.max_attendees,
            is_paid: entity.is_paid,
            price: entity.price,
            currency: entity.currency,
            starts_at: entity.starts_at,
        }
    }
}
