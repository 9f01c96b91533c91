//! Background job that settles payments whose callback never arrived.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use domain::services::{ReconciliationPolicy, SettlementService};

use super::scheduler::{Job, JobFrequency};
use crate::config::RegistrationConfig;

/// Queries the provider for stale PENDING registrations and expires the ones
/// that never resolve.
pub struct PaymentReconciliationJob {
    settlement: Arc<SettlementService>,
    policy: ReconciliationPolicy,
}

impl PaymentReconciliationJob {
    pub fn new(settlement: Arc<SettlementService>, policy: ReconciliationPolicy) -> Self {
        Self { settlement, policy }
    }

    /// Build the job with timing taken from the registration settings.
    pub fn from_config(settlement: Arc<SettlementService>, config: &RegistrationConfig) -> Self {
        Self::new(
            settlement,
            ReconciliationPolicy {
                query_after: Duration::from_secs(config.pending_query_after_secs),
                expire_after: Duration::from_secs(config.pending_expiry_secs),
                batch_size: config.reconciliation_batch_size,
            },
        )
    }
}

#[async_trait::async_trait]
impl Job for PaymentReconciliationJob {
    fn name(&self) -> &'static str {
        "payment_reconciliation"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Minutes(1)
    }

    async fn execute(&self) -> Result<(), String> {
        let report = self
            .settlement
            .reconcile_pending(Utc::now(), &self.policy)
            .await
            .map_err(|e| format!("Reconciliation failed: {}", e))?;

        metrics::counter!("payments_reconciled_total", "outcome" => "confirmed")
            .increment(report.confirmed as u64);
        metrics::counter!("payments_reconciled_total", "outcome" => "failed")
            .increment(report.failed as u64);
        metrics::counter!("payments_reconciled_total", "outcome" => "expired")
            .increment(report.expired as u64);

        if report.errors > 0 {
            tracing::warn!(
                errors = report.errors,
                examined = report.examined,
                "Some payment status queries failed"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::models::{Event, RegistrationStatus};
    use domain::services::{
        InMemoryRegistrationStore, MockPaymentGateway, MockTicketIssuer, ProviderStatus,
        RegistrationResult, RegistrationService,
    };
    use rust_decimal::Decimal;
    use uuid::Uuid;

    struct Fixture {
        store: Arc<InMemoryRegistrationStore>,
        gateway: Arc<MockPaymentGateway>,
        tickets: Arc<MockTicketIssuer>,
        registrations: RegistrationService,
        job: PaymentReconciliationJob,
        event: Event,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryRegistrationStore::new());
        let gateway = Arc::new(MockPaymentGateway::new());
        let tickets = Arc::new(MockTicketIssuer::new());
        let event = Event {
            id: Uuid::new_v4(),
            organizer_id: Uuid::new_v4(),
            title: "Nairobi Tech Week".to_string(),
            max_attendees: 50,
            is_paid: true,
            price: Decimal::from(1000),
            currency: "KES".to_string(),
            starts_at: None,
        };
        store.insert_event(event.clone()).await;

        let settlement = Arc::new(SettlementService::new(
            store.clone(),
            gateway.clone(),
            tickets.clone(),
        ));
        Fixture {
            registrations: RegistrationService::new(
                store.clone(),
                gateway.clone(),
                tickets.clone(),
            ),
            job: PaymentReconciliationJob::from_config(settlement, &RegistrationConfig::default()),
            store,
            gateway,
            tickets,
            event,
        }
    }

    async fn pending(f: &Fixture, age: chrono::Duration) -> (Uuid, String) {
        let user = Uuid::new_v4();
        let result = f
            .registrations
            .register(f.event.id, user, 1, Some("+254712345678"))
            .await
            .unwrap();
        let RegistrationResult::PaymentInitiated {
            registration,
            checkout_request_id,
            ..
        } = result
        else {
            panic!("expected a payment push");
        };
        f.store.backdate(registration.id, Utc::now() - age).await;
        (user, checkout_request_id)
    }

    #[test]
    fn test_policy_from_config() {
        let config = RegistrationConfig {
            pending_query_after_secs: 60,
            pending_expiry_secs: 600,
            reconciliation_batch_size: 25,
            ..RegistrationConfig::default()
        };
        let settlement = Arc::new(SettlementService::new(
            Arc::new(InMemoryRegistrationStore::new()),
            Arc::new(MockPaymentGateway::new()),
            Arc::new(MockTicketIssuer::new()),
        ));
        let job = PaymentReconciliationJob::from_config(settlement, &config);

        assert_eq!(job.policy.query_after, Duration::from_secs(60));
        assert_eq!(job.policy.expire_after, Duration::from_secs(600));
        assert_eq!(job.policy.batch_size, 25);
        assert_eq!(job.name(), "payment_reconciliation");
        assert_eq!(job.frequency().duration(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_confirms_stale_payment_reported_paid() {
        let f = fixture().await;
        let (user, checkout) = pending(&f, chrono::Duration::minutes(5)).await;
        f.gateway.set_status(&checkout, ProviderStatus::Succeeded);

        f.job.execute().await.unwrap();

        let row = f.registrations.find(f.event.id, user).await.unwrap().unwrap();
        assert_eq!(row.status, RegistrationStatus::Confirmed);
        assert_eq!(f.tickets.tickets_issued(), 1);
    }

    #[tokio::test]
    async fn test_expires_payment_that_never_resolves() {
        let f = fixture().await;
        let (user, checkout) = pending(&f, chrono::Duration::hours(1)).await;
        f.gateway.set_status(&checkout, ProviderStatus::Processing);

        f.job.execute().await.unwrap();

        let row = f.registrations.find(f.event.id, user).await.unwrap().unwrap();
        assert_eq!(row.status, RegistrationStatus::Failed);
        assert_eq!(f.tickets.tickets_issued(), 0);
    }

    #[tokio::test]
    async fn test_leaves_fresh_payment_alone() {
        let f = fixture().await;
        let (user, checkout) = pending(&f, chrono::Duration::seconds(10)).await;
        f.gateway.set_status(&checkout, ProviderStatus::Succeeded);

        f.job.execute().await.unwrap();

        let row = f.registrations.find(f.event.id, user).await.unwrap().unwrap();
        assert_eq!(row.status, RegistrationStatus::Pending);
    }
}
