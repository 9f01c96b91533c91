//! Payment provider webhook handlers.

use axum::{body::Bytes, extract::State, Json};
use domain::models::CallbackAck;
use tracing::info;

use crate::app::AppState;
use crate::middleware::metrics::record_callback;

/// M-Pesa STK push result callback.
///
/// POST /api/v1/payments/mpesa/callback
///
/// Takes the raw body so malformed payloads are still acknowledged. The
/// provider always gets the success acknowledgement; anomalies are logged.
pub async fn mpesa_callback(State(state): State<AppState>, body: Bytes) -> Json<CallbackAck> {
    let disposition = state.settlement.handle_callback(&body).await;
    let outcome = disposition.label();
    record_callback(outcome);
    info!(outcome, "Payment callback handled");
    Json(disposition.ack())
}
