//! Email delivery of tickets and organizer notices.
//!
//! Supports two providers:
//! - `console`: Logs emails (development)
//! - `sendgrid`: Uses the SendGrid v3 API

use crate::config::EmailConfig;
use domain::models::{Event, Registration};
use domain::services::{NotificationResult, TicketIssuer, TicketNotice};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Errors that can occur during email operations.
#[derive(Debug, Error)]
pub enum EmailError {
    #[error("Email service not configured")]
    NotConfigured,

    #[error("Failed to send email: {0}")]
    SendFailed(String),

    #[error("Provider error: {0}")]
    ProviderError(String),
}

/// Email message to be sent.
#[derive(Debug, Clone)]
pub struct EmailMessage {
    /// Recipient email address
    pub to: String,
    /// Recipient name (optional)
    pub to_name: Option<String>,
    pub subject: String,
    pub body_text: String,
}

/// Sends ticket emails through the configured provider.
#[derive(Clone)]
pub struct EmailService {
    config: Arc<EmailConfig>,
    client: Client,
}

impl EmailService {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            config: Arc::new(config),
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Send an email message.
    pub async fn send(&self, message: EmailMessage) -> Result<(), EmailError> {
        match self.config.provider.as_str() {
            "console" => self.send_console(message).await,
            "sendgrid" => self.send_sendgrid(message).await,
            provider => {
                error!(provider = %provider, "Unknown email provider");
                Err(EmailError::NotConfigured)
            }
        }
    }

    /// Console provider - logs the email instead of sending it.
    async fn send_console(&self, message: EmailMessage) -> Result<(), EmailError> {
        info!(
            to = %message.to,
            to_name = ?message.to_name,
            subject = %message.subject,
            from = %self.config.sender_email,
            "Email (console provider)"
        );
        debug!(body_text = %message.body_text, "Email body");
        Ok(())
    }

    /// SendGrid provider - sends via the SendGrid API.
    async fn send_sendgrid(&self, message: EmailMessage) -> Result<(), EmailError> {
        if self.config.sendgrid_api_key.is_empty() {
            return Err(EmailError::NotConfigured);
        }

        let mut to = serde_json::json!({ "email": message.to });
        if let Some(name) = &message.to_name {
            to["name"] = serde_json::json!(name);
        }

        let body = serde_json::json!({
            "personalizations": [{ "to": [to] }],
            "from": {
                "email": self.config.sender_email,
                "name": self.config.sender_name
            },
            "subject": message.subject,
            "content": [{
                "type": "text/plain",
                "value": message.body_text
            }]
        });

        let url = format!(
            "{}/v3/mail/send",
            self.config.sendgrid_base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.config.sendgrid_api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmailError::SendFailed(format!("SendGrid request failed: {}", e)))?;

        if response.status().is_success() {
            info!(to = %message.to, subject = %message.subject, "Email sent via SendGrid");
            Ok(())
        } else {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            error!(status = %status, error = %error_body, "SendGrid API error");
            Err(EmailError::ProviderError(format!(
                "SendGrid returned {}: {}",
                status, error_body
            )))
        }
    }

    async fn deliver(&self, message: Option<EmailMessage>) -> NotificationResult {
        if !self.config.enabled {
            return NotificationResult::Skipped;
        }
        let Some(message) = message else {
            return NotificationResult::NoRecipient;
        };
        match self.send(message).await {
            Ok(()) => NotificationResult::Sent,
            Err(e) => {
                warn!(error = %e, "Ticket email failed");
                NotificationResult::Failed(e.to_string())
            }
        }
    }
}

#[async_trait::async_trait]
impl TicketIssuer for EmailService {
    async fn issue_ticket(&self, notice: &TicketNotice) -> NotificationResult {
        let message = notice.attendee.as_ref().map(|attendee| EmailMessage {
            to: attendee.email.clone(),
            to_name: attendee.display_name.clone(),
            subject: format!("Your ticket for {}", notice.event.title),
            body_text: ticket_body(
                attendee.display_name.as_deref(),
                &notice.event,
                &notice.registration,
            ),
        });
        self.deliver(message).await
    }

    async fn notify_organizer(&self, notice: &TicketNotice) -> NotificationResult {
        let message = notice.organizer.as_ref().map(|organizer| EmailMessage {
            to: organizer.email.clone(),
            to_name: organizer.display_name.clone(),
            subject: format!("New registration for {}", notice.event.title),
            body_text: organizer_body(
                &notice.event,
                &notice.registration,
                notice.attendee.as_ref().map(|a| a.email.as_str()),
            ),
        });
        self.deliver(message).await
    }
}

fn ticket_body(name: Option<&str>, event: &Event, registration: &Registration) -> String {
    let mut body = format!(
        "Hi{name},\n\nYou're registered for {title}.\n\nTicket: {id}\nQuantity: {quantity}\n",
        name = name.map(|n| format!(" {}", n)).unwrap_or_default(),
        title = event.title,
        id = registration.id,
        quantity = registration.quantity,
    );
    if let Some(starts_at) = event.starts_at {
        body.push_str(&format!("Starts: {}\n", starts_at.format("%Y-%m-%d %H:%M UTC")));
    }
    if let (Some(amount), Some(receipt)) =
        (registration.settled_amount, registration.payment_reference.as_deref())
    {
        body.push_str(&format!(
            "Paid: {} {} (M-Pesa receipt {})\n",
            event.currency, amount, receipt
        ));
    }
    body.push_str("\nPresent this email at the entrance.\n");
    body
}

fn organizer_body(
    event: &Event,
    registration: &Registration,
    attendee_email: Option<&str>,
) -> String {
    format!(
        "A new registration for {title} is confirmed.\n\nAttendee: {attendee}\nQuantity: {quantity}\nRegistration: {id}\n",
        title = event.title,
        attendee = attendee_email.unwrap_or("unknown"),
        quantity = registration.quantity,
        id = registration.id,
    )
}
