//! Ticket issuance and organizer notification.
//!
//! Both the free registration path and payment settlement hand a confirmed
//! registration to a [`TicketIssuer`] exactly once.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::models::{Event, Registration};

/// Contact details of a ticket recipient.
#[derive(Debug, Clone, PartialEq)]
pub struct Recipient {
    pub email: String,
    pub display_name: Option<String>,
}

/// Everything a ticket notice is rendered from.
#[derive(Debug, Clone)]
pub struct TicketNotice {
    pub registration: Registration,
    pub event: Event,
    pub attendee: Option<Recipient>,
    pub organizer: Option<Recipient>,
}

/// Result of a notification send attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationResult {
    /// Notification was sent successfully.
    Sent,
    /// No address is known for the recipient.
    NoRecipient,
    /// Sending failed (non-blocking).
    Failed(String),
    /// Issuance is disabled.
    Skipped,
}

/// Delivers tickets to attendees and confirmations to organizers.
#[async_trait::async_trait]
pub trait TicketIssuer: Send + Sync {
    /// Send the ticket for a confirmed registration to the attendee.
    async fn issue_ticket(&self, notice: &TicketNotice) -> NotificationResult;

    /// Tell the event organizer about a new confirmed attendee.
    async fn notify_organizer(&self, notice: &TicketNotice) -> NotificationResult;
}

/// Mock ticket issuer for development and testing.
///
/// Logs notices and counts them instead of sending anything.
#[derive(Debug, Default)]
pub struct MockTicketIssuer {
    /// Whether to simulate failures for testing.
    pub simulate_failure: bool,
    tickets: AtomicUsize,
    organizer_notices: AtomicUsize,
}

impl MockTicketIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock issuer that simulates failures.
    pub fn failing() -> Self {
        Self {
            simulate_failure: true,
            ..Self::default()
        }
    }

    /// Tickets issued so far.
    pub fn tickets_issued(&self) -> usize {
        self.tickets.load(Ordering::SeqCst)
    }

    /// Organizer notices sent so far.
    pub fn organizer_notices(&self) -> usize {
        self.organizer_notices.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TicketIssuer for MockTicketIssuer {
    async fn issue_ticket(&self, notice: &TicketNotice) -> NotificationResult {
        self.tickets.fetch_add(1, Ordering::SeqCst);
        if self.simulate_failure {
            tracing::warn!(
                registration_id = %notice.registration.id,
                "Mock ticket issuer simulating failure"
            );
            return NotificationResult::Failed("Simulated failure".to_string());
        }

        tracing::info!(
            registration_id = %notice.registration.id,
            event_id = %notice.event.id,
            quantity = notice.registration.quantity,
            "Mock: Would send ticket"
        );
        NotificationResult::Sent
    }

    async fn notify_organizer(&self, notice: &TicketNotice) -> NotificationResult {
        self.organizer_notices.fetch_add(1, Ordering::SeqCst);
        if self.simulate_failure {
            return NotificationResult::Failed("Simulated failure".to_string());
        }

        tracing::info!(
            registration_id = %notice.registration.id,
            organizer_id = %notice.event.organizer_id,
            "Mock: Would notify organizer"
        );
        NotificationResult::Sent
    }
}
