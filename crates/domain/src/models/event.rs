//! Event domain model.
//!
//! Events are owned by the club/event management service; the ticketing
//! flow only reads the fields that drive admission and pricing.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An event users can register for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Uuid,
    pub organizer_id: Uuid,
    pub title: String,
    /// Total ticket capacity. Zero means unlimited.
    pub max_attendees: i32,
    pub is_paid: bool,
    pub price: Decimal,
    pub currency: String,
    pub starts_at: Option<DateTime<Utc>>,
}

impl Event {
    /// Whether admission is bounded by `max_attendees`.
    pub fn has_capacity_limit(&self) -> bool {
        self.max_attendees > 0
    }

    /// Whether the event can actually be charged for.
    pub fn is_chargeable(&self) -> bool {
        self.is_paid && self.price > Decimal::ZERO
    }

    /// Total charge for `quantity` tickets at the current price.
    pub fn total_price(&self, quantity: i32) -> Decimal {
        self.price * Decimal::from(quantity)
    }

    /// Remaining slots given the quantity already confirmed, or `None` when unlimited.
    pub fn remaining_capacity(&self, confirmed_quantity: i64) -> Option<i64> {
        self.has_capacity_limit()
            .then(|| (i64::from(self.max_attendees) - confirmed_quantity).max(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(max_attendees: i32, is_paid: bool, price: i64) -> Event {
        Event {
            id: Uuid::new_v4(),
            organizer_id: Uuid::new_v4(),
            title: "Rust Nairobi Meetup".to_string(),
            max_attendees,
            is_paid,
            price: Decimal::from(price),
            currency: "KES".to_string(),
            starts_at: None,
        }
    }

    #[test]
    fn test_unlimited_capacity() {
        let event = event(0, false, 0);
        assert!(!event.has_capacity_limit());
        assert_eq!(event.remaining_capacity(1_000), None);
    }

    #[test]
    fn test_remaining_capacity_never_negative() {
        let event = event(5, false, 0);
        assert_eq!(event.remaining_capacity(3), Some(2));
        assert_eq!(event.remaining_capacity(5), Some(0));
        assert_eq!(event.remaining_capacity(7), Some(0));
    }

    #[test]
    fn test_total_price() {
        let event = event(0, true, 500);
        assert_eq!(event.total_price(3), Decimal::from(1500));
    }

    #[test]
    fn test_paid_event_without_price_is_not_chargeable() {
        assert!(event(0, true, 500).is_chargeable());
        assert!(!event(0, true, 0).is_chargeable());
        assert!(!event(0, false, 500).is_chargeable());
    }
}
