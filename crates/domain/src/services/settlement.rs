//! Payment settlement from provider callbacks and status queries.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::models::{CallbackAck, PaymentOutcome, Registration, Settlement, StkCallbackEnvelope};
use crate::services::gateway::{PaymentGateway, ProviderStatus};
use crate::services::notification::TicketIssuer;
use crate::services::registration::deliver_tickets;
use crate::services::store::{RegistrationStore, SettlementOutcome, StoreError, PAYMENT_EXPIRED};

/// What happened to one callback delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackDisposition {
    Settled(SettlementOutcome),
    /// The body was not a recognizable callback envelope.
    Malformed,
    /// The store failed; the result will be picked up by reconciliation.
    StoreFailed,
}

impl CallbackDisposition {
    /// The provider is always acknowledged so it stops retrying.
    pub fn ack(&self) -> CallbackAck {
        CallbackAck::processed()
    }

    pub fn label(&self) -> &'static str {
        match self {
            CallbackDisposition::Settled(outcome) => outcome.label(),
            CallbackDisposition::Malformed => "malformed",
            CallbackDisposition::StoreFailed => "store_error",
        }
    }
}

/// Timing rules for reconciling pending payments.
#[derive(Debug, Clone)]
pub struct ReconciliationPolicy {
    /// Minimum age before the provider is queried.
    pub query_after: Duration,
    /// Age at which a still-processing payment is failed.
    pub expire_after: Duration,
    pub batch_size: i64,
}

impl Default for ReconciliationPolicy {
    fn default() -> Self {
        Self {
            query_after: Duration::from_secs(120),
            expire_after: Duration::from_secs(1800),
            batch_size: 100,
        }
    }
}

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationReport {
    pub examined: usize,
    pub confirmed: usize,
    pub failed: usize,
    pub expired: usize,
    pub still_pending: usize,
    pub errors: usize,
}

/// Applies provider results to the ledger and issues tickets on confirmation.
pub struct SettlementService {
    store: Arc<dyn RegistrationStore>,
    gateway: Arc<dyn PaymentGateway>,
    tickets: Arc<dyn TicketIssuer>,
}

impl SettlementService {
    pub fn new(
        store: Arc<dyn RegistrationStore>,
        gateway: Arc<dyn PaymentGateway>,
        tickets: Arc<dyn TicketIssuer>,
    ) -> Self {
        Self {
            store,
            gateway,
            tickets,
        }
    }

    /// Handle a raw callback body. Never fails.
    pub async fn handle_callback(&self, body: &[u8]) -> CallbackDisposition {
        let envelope: StkCallbackEnvelope = match serde_json::from_slice(body) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, body_len = body.len(), "Unparseable payment callback");
                return CallbackDisposition::Malformed;
            }
        };

        let settlement = envelope.into_settlement();
        debug!(
            checkout_request_id = %settlement.gateway_request_id,
            "Payment callback received"
        );

        match self.apply(settlement).await {
            Ok(outcome) => CallbackDisposition::Settled(outcome),
            Err(e) => {
                error!(error = %e, "Failed to apply payment callback");
                CallbackDisposition::StoreFailed
            }
        }
    }

    /// Apply one provider result. Tickets are issued only on the transition to CONFIRMED.
    pub async fn apply(&self, settlement: Settlement) -> Result<SettlementOutcome, StoreError> {
        let checkout_request_id = settlement.gateway_request_id.clone();
        let outcome = self.store.settle(&settlement).await?;

        match &outcome {
            SettlementOutcome::Confirmed(registration) => {
                info!(
                    registration_id = %registration.id,
                    %checkout_request_id,
                    receipt = ?registration.payment_reference,
                    "Payment settled, registration confirmed"
                );
                self.issue(registration).await;
            }
            SettlementOutcome::Failed(registration) => {
                info!(
                    registration_id = %registration.id,
                    %checkout_request_id,
                    reason = ?registration.failure_reason,
                    "Payment failed"
                );
            }
            SettlementOutcome::OverCapacity(registration) => {
                error!(
                    registration_id = %registration.id,
                    %checkout_request_id,
                    receipt = ?registration.payment_reference,
                    amount = ?registration.settled_amount,
                    "Payment received but event is full; refund required"
                );
            }
            SettlementOutcome::SettledAfterCancel(registration) => {
                error!(
                    registration_id = %registration.id,
                    %checkout_request_id,
                    receipt = ?registration.payment_reference,
                    amount = ?registration.settled_amount,
                    "Payment received for a cancelled registration; refund required"
                );
            }
            SettlementOutcome::AlreadySettled(registration) => {
                info!(
                    registration_id = %registration.id,
                    %checkout_request_id,
                    "Duplicate payment result ignored"
                );
            }
            SettlementOutcome::UnknownRequest => match &settlement.outcome {
                PaymentOutcome::Succeeded {
                    receipt, amount, ..
                } => error!(
                    %checkout_request_id,
                    receipt = ?receipt,
                    amount = ?amount,
                    "Payment received for unknown request; refund required"
                ),
                PaymentOutcome::Failed { .. } => {
                    warn!(%checkout_request_id, "Payment result for unknown request")
                }
            },
        }

        Ok(outcome)
    }

    async fn issue(&self, registration: &Registration) {
        match self.store.find_event(registration.event_id).await {
            Ok(Some(event)) => {
                deliver_tickets(self.store.as_ref(), self.tickets.as_ref(), registration, &event)
                    .await
            }
            Ok(None) => warn!(
                registration_id = %registration.id,
                "Confirmed registration has no event; ticket not issued"
            ),
            Err(e) => warn!(
                registration_id = %registration.id,
                error = %e,
                "Failed to load event for ticket"
            ),
        }
    }

    /// Query the provider for stale PENDING payments and settle what it reports.
    pub async fn reconcile_pending(
        &self,
        now: DateTime<Utc>,
        policy: &ReconciliationPolicy,
    ) -> Result<ReconciliationReport, StoreError> {
        let query_cutoff = now - to_chrono(policy.query_after);
        let expiry_cutoff = now - to_chrono(policy.expire_after);

        let pending = self
            .store
            .list_stale_pending(query_cutoff, policy.batch_size)
            .await?;

        let mut report = ReconciliationReport {
            examined: pending.len(),
            ..ReconciliationReport::default()
        };

        for registration in pending {
            let expired = registration.updated_at < expiry_cutoff;

            let Some(checkout_request_id) = registration.gateway_request_id.clone() else {
                if !expired {
                    report.still_pending += 1;
                    continue;
                }
                match self
                    .store
                    .mark_initiation_failed(registration.id, PAYMENT_EXPIRED)
                    .await
                {
                    Ok(Some(_)) => {
                        info!(registration_id = %registration.id, "Expired payment without request id");
                        report.expired += 1;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!(registration_id = %registration.id, error = %e, "Failed to expire payment");
                        report.errors += 1;
                    }
                }
                continue;
            };

            let status = match self.gateway.query_status(&checkout_request_id).await {
                Ok(status) => status,
                // an expired row is failed even when the provider cannot answer
                Err(e) if expired => {
                    warn!(
                        registration_id = %registration.id,
                        %checkout_request_id,
                        error = %e,
                        "Payment status query failed; expiring payment"
                    );
                    ProviderStatus::Processing
                }
                Err(e) => {
                    warn!(
                        registration_id = %registration.id,
                        %checkout_request_id,
                        error = %e,
                        "Payment status query failed"
                    );
                    report.errors += 1;
                    continue;
                }
            };

            let outcome = match status {
                ProviderStatus::Succeeded => PaymentOutcome::Succeeded {
                    receipt: None,
                    amount: None,
                    settled_at: None,
                },
                ProviderStatus::Failed { code, description } => PaymentOutcome::Failed {
                    code,
                    reason: description,
                },
                ProviderStatus::Processing if expired => PaymentOutcome::Failed {
                    code: -1,
                    reason: PAYMENT_EXPIRED.to_string(),
                },
                ProviderStatus::Processing => {
                    report.still_pending += 1;
                    continue;
                }
            };
            let expiring = matches!(&outcome, PaymentOutcome::Failed { code: -1, .. });

            let settled = self
                .apply(Settlement {
                    gateway_request_id: checkout_request_id.clone(),
                    outcome,
                })
                .await;
            match settled {
                Ok(SettlementOutcome::Confirmed(_)) => report.confirmed += 1,
                Ok(SettlementOutcome::Failed(_)) if expiring => report.expired += 1,
                Ok(SettlementOutcome::Failed(_) | SettlementOutcome::OverCapacity(_)) => {
                    report.failed += 1
                }
                Ok(_) => {}
                Err(e) => {
                    error!(
                        registration_id = %registration.id,
                        %checkout_request_id,
                        error = %e,
                        "Failed to apply reconciled payment status"
                    );
                    report.errors += 1;
                }
            }
        }

        if report.examined > 0 {
            info!(
                examined = report.examined,
                confirmed = report.confirmed,
                failed = report.failed,
                expired = report.expired,
                still_pending = report.still_pending,
                errors = report.errors,
                "Payment reconciliation pass complete"
            );
        }
        Ok(report)
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}
