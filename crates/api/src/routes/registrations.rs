//! Event registration endpoint handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use domain::models::{
    CancelRegistrationRequest, CancelRegistrationResponse, RegisterForEventRequest,
    RegisterForEventResponse, RegistrationView,
};
use domain::services::{GatewayError, RegistrationError, RegistrationResult};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::UserAuth;
use crate::middleware::metrics::record_registration;

/// Register the caller for an event.
///
/// POST /api/v1/events/:event_id/register
pub async fn register_for_event(
    State(state): State<AppState>,
    user: UserAuth,
    Path(event_id): Path<Uuid>,
    Json(request): Json<RegisterForEventRequest>,
) -> Result<(StatusCode, Json<RegisterForEventResponse>), ApiError> {
    request.validate()?;

    let result = state
        .registrations
        .register(
            event_id,
            user.user_id,
            request.quantity,
            request.phone_number.as_deref(),
        )
        .await;

    let result = match result {
        Ok(result) => result,
        Err(e) => {
            record_registration(error_label(&e));
            return Err(e.into());
        }
    };

    let response = match result {
        RegistrationResult::Confirmed { registration } => {
            record_registration("confirmed");
            RegisterForEventResponse {
                message: "Registration confirmed. No payment required.".to_string(),
                requires_payment: false,
                checkout_request_id: None,
                customer_message: None,
                registration: registration.into(),
            }
        }
        RegistrationResult::PaymentInitiated {
            registration,
            checkout_request_id,
            customer_message,
        } => {
            record_registration("payment_initiated");
            RegisterForEventResponse {
                message: "Payment initiated. Complete the payment on your phone.".to_string(),
                requires_payment: true,
                checkout_request_id: Some(checkout_request_id),
                customer_message,
                registration: registration.into(),
            }
        }
    };

    info!(
        event_id = %event_id,
        user_id = %user.user_id,
        requires_payment = response.requires_payment,
        "Registration accepted"
    );

    Ok((StatusCode::CREATED, Json(response)))
}

/// Cancel the caller's registration.
///
/// POST /api/v1/events/:event_id/cancel-rsvp
pub async fn cancel_registration(
    State(state): State<AppState>,
    user: UserAuth,
    Path(event_id): Path<Uuid>,
    request: Option<Json<CancelRegistrationRequest>>,
) -> Result<Json<CancelRegistrationResponse>, ApiError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    request.validate()?;

    let registration = state
        .registrations
        .cancel(event_id, user.user_id, request.reason)
        .await?;

    Ok(Json(CancelRegistrationResponse {
        message: "Registration cancelled".to_string(),
        registration: registration.into(),
    }))
}

/// The caller's registration for an event.
///
/// GET /api/v1/events/:event_id/registration
pub async fn get_registration(
    State(state): State<AppState>,
    user: UserAuth,
    Path(event_id): Path<Uuid>,
) -> Result<Json<RegistrationView>, ApiError> {
    let registration = state
        .registrations
        .find(event_id, user.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Registration not found".to_string()))?;

    Ok(Json(registration.into()))
}

/// Metric label for a failed registration attempt.
fn error_label(error: &RegistrationError) -> &'static str {
    match error {
        RegistrationError::InvalidQuantity { .. }
        | RegistrationError::PhoneNumberRequired
        | RegistrationError::InvalidPhoneFormat => "invalid",
        RegistrationError::EventNotFound | RegistrationError::NotFound => "not_found",
        RegistrationError::EventNotChargeable => "not_chargeable",
        RegistrationError::AlreadyRegistered => "already_registered",
        RegistrationError::RegistrationInProgress => "in_progress",
        RegistrationError::CapacityExceeded { .. } => "capacity_exceeded",
        RegistrationError::Gateway(GatewayError::Rejected(_)) => "gateway_rejected",
        RegistrationError::Gateway(GatewayError::Unavailable(_)) => "gateway_unavailable",
        RegistrationError::Store(_) => "store_error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_labels() {
        assert_eq!(
            error_label(&RegistrationError::CapacityExceeded { remaining: 0 }),
            "capacity_exceeded"
        );
        assert_eq!(
            error_label(&RegistrationError::Gateway(GatewayError::Unavailable(
                "timeout".into()
            ))),
            "gateway_unavailable"
        );
        assert_eq!(error_label(&RegistrationError::InvalidPhoneFormat), "invalid");
    }

    #[test]
    fn test_register_request_defaults_quantity() {
        let request: RegisterForEventRequest =
            serde_json::from_str(r#"{"phoneNumber":"0712345678"}"#).unwrap();
        assert_eq!(request.quantity, 1);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_register_request_rejects_quantity_above_limit() {
        let request: RegisterForEventRequest =
            serde_json::from_str(r#"{"quantity":11}"#).unwrap();
        assert!(request.validate().is_err());
    }
}
