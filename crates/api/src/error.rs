use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::services::{GatewayError, RegistrationError};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Capacity exceeded: {message}")]
    CapacityExceeded { message: String, remaining: i64 },

    #[error("Validation error: {0}")]
    Validation(String),

    /// The payment provider refused the push request.
    #[error("Payment rejected: {0}")]
    PaymentRejected(String),

    /// The payment provider could not be reached.
    #[error("Payment unavailable: {0}")]
    PaymentUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    remaining: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Vec<ValidationDetail>>,
}

#[derive(Debug, Serialize)]
pub struct ValidationDetail {
    pub field: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut remaining = None;
        let (status, error_code, message) = match &self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            ApiError::CapacityExceeded {
                message,
                remaining: left,
            } => {
                remaining = Some(*left);
                (StatusCode::CONFLICT, "conflict", message.clone())
            }
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg.clone()),
            ApiError::PaymentRejected(msg) => {
                (StatusCode::BAD_GATEWAY, "payment_failed", msg.clone())
            }
            ApiError::PaymentUnavailable(msg) => {
                tracing::warn!("Payment gateway unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "payment_failed",
                    "Payment service is temporarily unavailable. Please try again.".into(),
                )
            }
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".into(),
                )
            }
            ApiError::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                msg.clone(),
            ),
        };

        let body = ErrorBody {
            error: error_code.into(),
            message,
            remaining,
            details: None,
        };

        (status, Json(body)).into_response()
    }
}

impl From<RegistrationError> for ApiError {
    fn from(err: RegistrationError) -> Self {
        match err {
            RegistrationError::InvalidQuantity { .. }
            | RegistrationError::PhoneNumberRequired
            | RegistrationError::InvalidPhoneFormat => ApiError::Validation(err.to_string()),
            RegistrationError::EventNotFound | RegistrationError::NotFound => {
                ApiError::NotFound(err.to_string())
            }
            RegistrationError::AlreadyRegistered | RegistrationError::RegistrationInProgress => {
                ApiError::Conflict(err.to_string())
            }
            RegistrationError::CapacityExceeded { remaining } => ApiError::CapacityExceeded {
                message: err.to_string(),
                remaining,
            },
            RegistrationError::EventNotChargeable => ApiError::Internal(err.to_string()),
            RegistrationError::Gateway(GatewayError::Rejected(reason)) => {
                ApiError::PaymentRejected(reason)
            }
            RegistrationError::Gateway(GatewayError::Unavailable(reason)) => {
                ApiError::PaymentUnavailable(reason)
            }
            RegistrationError::Store(e) => ApiError::Internal(format!("Store error: {}", e)),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("Resource not found".into()),
            sqlx::Error::Database(db_err) => {
                if let Some(code) = db_err.code() {
                    match code.as_ref() {
                        "23505" => ApiError::Conflict("Resource already exists".into()),
                        "23503" => ApiError::NotFound("Referenced resource not found".into()),
                        _ => ApiError::Internal(format!("Database error: {}", db_err)),
                    }
                } else {
                    ApiError::Internal(format!("Database error: {}", db_err))
                }
            }
            _ => ApiError::Internal(format!("Database error: {}", err)),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let details: Vec<ValidationDetail> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |e| ValidationDetail {
                    field: field.to_string(),
                    message: e.message.clone().map(|m| m.to_string()).unwrap_or_default(),
                })
            })
            .collect();

        let message = if details.len() == 1 {
            details[0].message.clone()
        } else {
            format!("{} validation errors", details.len())
        };

        ApiError::Validation(message)
    }
}
