//! Registration repository: the Postgres admission ledger.
//!
//! Admission and settlement lock the event row first, then the registration
//! row. Every writer that touches both follows that order.

use chrono::{DateTime, Utc};
use domain::models::{Event, PaymentOutcome, Registration, Settlement};
use domain::services::{
    AdmissionOutcome, NewReservation, PushReceipt, Recipient, RegistrationStore, ReservationKind,
    SettlementOutcome, StoreError, CAPACITY_EXHAUSTED_AT_SETTLEMENT,
};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::db::is_unique_violation;
use crate::entities::{
    EventEntity, PaymentStatusDb, RegistrationEntity, RegistrationStatusDb, REGISTRATION_COLUMNS,
};
use crate::metrics::QueryTimer;
use crate::repositories::{EventRepository, UserRepository};

fn store_error(error: sqlx::Error) -> StoreError {
    if is_unique_violation(&error) {
        StoreError::Conflict(error.to_string())
    } else {
        StoreError::Backend(error.to_string())
    }
}

/// Postgres implementation of [`RegistrationStore`].
#[derive(Clone)]
pub struct RegistrationRepository {
    pool: PgPool,
    events: EventRepository,
    users: UserRepository,
}

impl RegistrationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            events: EventRepository::new(pool.clone()),
            users: UserRepository::new(pool.clone()),
            pool,
        }
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn lock_event(
        tx: &mut Transaction<'_, Postgres>,
        event_id: Uuid,
    ) -> Result<Option<EventEntity>, sqlx::Error> {
        sqlx::query_as::<_, EventEntity>(
            r#"
            SELECT id, organizer_id, title, max_attendees, is_paid, price, currency, starts_at
            FROM events
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(event_id)
        .fetch_optional(&mut **tx)
        .await
    }

    async fn confirmed_quantity(
        tx: &mut Transaction<'_, Postgres>,
        event_id: Uuid,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(SUM(quantity), 0)::BIGINT
            FROM event_registrations
            WHERE event_id = $1 AND status = 'confirmed'
            "#,
        )
        .bind(event_id)
        .fetch_one(&mut **tx)
        .await
    }

    async fn reserve_in_tx(
        &self,
        reservation: &NewReservation,
    ) -> Result<AdmissionOutcome, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let Some(event) = Self::lock_event(&mut tx, reservation.event_id).await? else {
            return Ok(AdmissionOutcome::EventNotFound);
        };
        let event: Event = event.into();

        let sql = format!(
            "SELECT {} FROM event_registrations WHERE event_id = $1 AND user_id = $2 FOR UPDATE",
            REGISTRATION_COLUMNS
        );
        let existing = sqlx::query_as::<_, RegistrationEntity>(&sql)
            .bind(reservation.event_id)
            .bind(reservation.user_id)
            .fetch_optional(&mut *tx)
            .await?;

        match existing.as_ref().map(|r| r.status) {
            Some(RegistrationStatusDb::Confirmed) => return Ok(AdmissionOutcome::AlreadyRegistered),
            Some(RegistrationStatusDb::Pending) => return Ok(AdmissionOutcome::InProgress),
            _ => {}
        }

        let confirmed = Self::confirmed_quantity(&mut tx, event.id).await?;
        if let Some(remaining) = event.remaining_capacity(confirmed) {
            if i64::from(reservation.quantity) > remaining {
                return Ok(AdmissionOutcome::CapacityExceeded { remaining });
            }
        }

        let (status, payment_status, phone_number, amount, currency) = match &reservation.kind {
            ReservationKind::Free => (
                RegistrationStatusDb::Confirmed,
                PaymentStatusDb::None,
                None,
                None,
                None,
            ),
            ReservationKind::Paid {
                phone_number,
                amount,
                currency,
            } => (
                RegistrationStatusDb::Pending,
                PaymentStatusDb::Pending,
                Some(phone_number.as_str()),
                Some(*amount),
                Some(currency.as_str()),
            ),
        };

        let (entity, reused) = match existing {
            Some(row) => {
                let sql = format!(
                    r#"
                    UPDATE event_registrations
                    SET quantity = $2, status = $3, payment_status = $4, phone_number = $5,
                        payment_amount = $6, payment_currency = $7,
                        gateway_request_id = NULL, merchant_request_id = NULL,
                        payment_reference = NULL, settled_amount = NULL, settled_at = NULL,
                        failure_reason = NULL, cancelled_at = NULL, cancellation_reason = NULL,
                        updated_at = NOW()
                    WHERE id = $1
                    RETURNING {}
                    "#,
                    REGISTRATION_COLUMNS
                );
                let entity = sqlx::query_as::<_, RegistrationEntity>(&sql)
                    .bind(row.id)
                    .bind(reservation.quantity)
                    .bind(status)
                    .bind(payment_status)
                    .bind(phone_number)
                    .bind(amount)
                    .bind(currency)
                    .fetch_one(&mut *tx)
                    .await?;
                (entity, true)
            }
            None => {
                let sql = format!(
                    r#"
                    INSERT INTO event_registrations
                        (event_id, user_id, quantity, status, payment_status,
                         phone_number, payment_amount, payment_currency)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    RETURNING {}
                    "#,
                    REGISTRATION_COLUMNS
                );
                let entity = sqlx::query_as::<_, RegistrationEntity>(&sql)
                    .bind(reservation.event_id)
                    .bind(reservation.user_id)
                    .bind(reservation.quantity)
                    .bind(status)
                    .bind(payment_status)
                    .bind(phone_number)
                    .bind(amount)
                    .bind(currency)
                    .fetch_one(&mut *tx)
                    .await?;
                (entity, false)
            }
        };

        tx.commit().await?;
        tracing::debug!(
            registration_id = %entity.id,
            event_id = %reservation.event_id,
            reused,
            "Reservation written"
        );
        Ok(AdmissionOutcome::Admitted {
            registration: entity.into(),
            reused,
        })
    }

    async fn settle_in_tx(&self, settlement: &Settlement) -> Result<SettlementOutcome, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let event_id = sqlx::query_scalar::<_, Uuid>(
            "SELECT event_id FROM event_registrations WHERE gateway_request_id = $1",
        )
        .bind(&settlement.gateway_request_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(event_id) = event_id else {
            return Ok(SettlementOutcome::UnknownRequest);
        };

        let event: Option<Event> = Self::lock_event(&mut tx, event_id).await?.map(Into::into);

        let sql = format!(
            "SELECT {} FROM event_registrations WHERE gateway_request_id = $1 FOR UPDATE",
            REGISTRATION_COLUMNS
        );
        let Some(current) = sqlx::query_as::<_, RegistrationEntity>(&sql)
            .bind(&settlement.gateway_request_id)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(SettlementOutcome::UnknownRequest);
        };

        if current.payment_status != PaymentStatusDb::Pending {
            return Ok(SettlementOutcome::AlreadySettled(current.into()));
        }

        let (updated, outcome): (Option<RegistrationEntity>, fn(Registration) -> SettlementOutcome) =
            match &settlement.outcome {
                PaymentOutcome::Succeeded {
                    receipt,
                    amount,
                    settled_at,
                } => {
                    let (status, failure_reason, outcome): (
                        RegistrationStatusDb,
                        Option<&str>,
                        fn(Registration) -> SettlementOutcome,
                    ) = match current.status {
                        RegistrationStatusDb::Pending => {
                            let confirmed = Self::confirmed_quantity(&mut tx, event_id).await?;
                            let remaining = event.as_ref().and_then(|e| e.remaining_capacity(confirmed));
                            if remaining.is_some_and(|left| i64::from(current.quantity) > left) {
                                (
                                    RegistrationStatusDb::Failed,
                                    Some(CAPACITY_EXHAUSTED_AT_SETTLEMENT),
                                    SettlementOutcome::OverCapacity,
                                )
                            } else {
                                (
                                    RegistrationStatusDb::Confirmed,
                                    None,
                                    SettlementOutcome::Confirmed,
                                )
                            }
                        }
                        other => (other, None, SettlementOutcome::SettledAfterCancel),
                    };

                    let updated = Self::record_success(
                        &mut tx,
                        current.id,
                        status,
                        receipt.as_deref(),
                        *amount,
                        settled_at.unwrap_or_else(Utc::now),
                        failure_reason,
                    )
                    .await?;
                    (updated, outcome)
                }
                PaymentOutcome::Failed { reason, .. } => {
                    let updated = Self::record_failure(&mut *tx, current.id, reason).await?;
                    (updated, SettlementOutcome::Failed)
                }
            };

        tx.commit().await?;
        Ok(match updated {
            Some(entity) => outcome(entity.into()),
            None => SettlementOutcome::AlreadySettled(current.into()),
        })
    }

    async fn record_success(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        status: RegistrationStatusDb,
        receipt: Option<&str>,
        amount: Option<Decimal>,
        settled_at: DateTime<Utc>,
        failure_reason: Option<&str>,
    ) -> Result<Option<RegistrationEntity>, sqlx::Error> {
        let sql = format!(
            r#"
            UPDATE event_registrations
            SET status = $2, payment_status = 'success', payment_reference = $3,
                settled_amount = COALESCE($4, payment_amount), settled_at = $5,
                failure_reason = COALESCE($6, failure_reason), updated_at = NOW()
            WHERE id = $1 AND payment_status = 'pending'
            RETURNING {}
            "#,
            REGISTRATION_COLUMNS
        );
        sqlx::query_as::<_, RegistrationEntity>(&sql)
            .bind(id)
            .bind(status)
            .bind(receipt)
            .bind(amount)
            .bind(settled_at)
            .bind(failure_reason)
            .fetch_optional(&mut **tx)
            .await
    }

    async fn record_failure<'e, E>(
        executor: E,
        id: Uuid,
        reason: &str,
    ) -> Result<Option<RegistrationEntity>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let sql = format!(
            r#"
            UPDATE event_registrations
            SET payment_status = 'failed',
                status = CASE WHEN status = 'pending'
                              THEN 'failed'::registration_status
                              ELSE status END,
                failure_reason = $2, updated_at = NOW()
            WHERE id = $1 AND payment_status = 'pending'
            RETURNING {}
            "#,
            REGISTRATION_COLUMNS
        );
        sqlx::query_as::<_, RegistrationEntity>(&sql)
            .bind(id)
            .bind(reason)
            .fetch_optional(executor)
            .await
    }
}

#[async_trait::async_trait]
impl RegistrationStore for RegistrationRepository {
    async fn find_event(&self, event_id: Uuid) -> Result<Option<Event>, StoreError> {
        self.events
            .find_by_id(event_id)
            .await
            .map(|e| e.map(Into::into))
            .map_err(store_error)
    }

    async fn find_contact(&self, user_id: Uuid) -> Result<Option<Recipient>, StoreError> {
        self.users
            .find_contact(user_id)
            .await
            .map(|c| c.map(Into::into))
            .map_err(store_error)
    }

    async fn find_registration(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Registration>, StoreError> {
        let timer = QueryTimer::new("find_registration_by_event_user");
        let sql = format!(
            "SELECT {} FROM event_registrations WHERE event_id = $1 AND user_id = $2",
            REGISTRATION_COLUMNS
        );
        let result = sqlx::query_as::<_, RegistrationEntity>(&sql)
            .bind(event_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await;
        timer.record();
        result.map(|r| r.map(Into::into)).map_err(store_error)
    }

    async fn reserve(&self, reservation: NewReservation) -> Result<AdmissionOutcome, StoreError> {
        let timer = QueryTimer::new("reserve_registration");
        let result = self.reserve_in_tx(&reservation).await;
        timer.record();
        result.map_err(store_error)
    }

    async fn attach_gateway_request(
        &self,
        registration_id: Uuid,
        receipt: &PushReceipt,
    ) -> Result<Option<Registration>, StoreError> {
        let timer = QueryTimer::new("attach_gateway_request");
        let sql = format!(
            r#"
            UPDATE event_registrations
            SET gateway_request_id = $2, merchant_request_id = $3, updated_at = NOW()
            WHERE id = $1 AND payment_status = 'pending'
            RETURNING {}
            "#,
            REGISTRATION_COLUMNS
        );
        let result = sqlx::query_as::<_, RegistrationEntity>(&sql)
            .bind(registration_id)
            .bind(&receipt.checkout_request_id)
            .bind(receipt.merchant_request_id.as_deref())
            .fetch_optional(&self.pool)
            .await;
        timer.record();
        result.map(|r| r.map(Into::into)).map_err(store_error)
    }

    async fn mark_initiation_failed(
        &self,
        registration_id: Uuid,
        reason: &str,
    ) -> Result<Option<Registration>, StoreError> {
        let timer = QueryTimer::new("mark_payment_initiation_failed");
        let result = Self::record_failure(&self.pool, registration_id, reason).await;
        timer.record();
        result.map(|r| r.map(Into::into)).map_err(store_error)
    }

    async fn settle(&self, settlement: &Settlement) -> Result<SettlementOutcome, StoreError> {
        let timer = QueryTimer::new("settle_registration");
        let result = self.settle_in_tx(settlement).await;
        timer.record();
        result.map_err(store_error)
    }

    async fn cancel(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        reason: Option<String>,
    ) -> Result<Option<Registration>, StoreError> {
        let timer = QueryTimer::new("cancel_registration");
        let sql = format!(
            r#"
            UPDATE event_registrations
            SET status = 'cancelled', cancelled_at = NOW(), cancellation_reason = $3,
                updated_at = NOW()
            WHERE event_id = $1 AND user_id = $2 AND status IN ('pending', 'confirmed')
            RETURNING {}
            "#,
            REGISTRATION_COLUMNS
        );
        let result = sqlx::query_as::<_, RegistrationEntity>(&sql)
            .bind(event_id)
            .bind(user_id)
            .bind(reason)
            .fetch_optional(&self.pool)
            .await;
        timer.record();
        result.map(|r| r.map(Into::into)).map_err(store_error)
    }

    async fn list_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Registration>, StoreError> {
        let timer = QueryTimer::new("list_stale_pending_payments");
        let sql = format!(
            r#"
            SELECT {}
            FROM event_registrations
            WHERE payment_status = 'pending' AND updated_at < $1
            ORDER BY updated_at ASC
            LIMIT $2
            "#,
            REGISTRATION_COLUMNS
        );
        let result = sqlx::query_as::<_, RegistrationEntity>(&sql)
            .bind(older_than)
            .bind(limit)
            .fetch_all(&self.pool)
            .await;
        timer.record();
        result
            .map(|rows| rows.into_iter().map(Into::into).collect())
            .map_err(store_error)
    }
}
