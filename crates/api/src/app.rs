use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use domain::services::{
    PaymentGateway, RegistrationService, RegistrationStore, SettlementService, TicketIssuer,
};
use persistence::repositories::RegistrationRepository;
use shared::jwt::{JwtConfig, JwtError};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::Config;
use crate::middleware::user_auth::UserAuth;
use crate::middleware::{metrics_handler, metrics_middleware, require_user_auth, trace_id};
use crate::routes::{health, payments, registrations};
use crate::services::{DisabledPaymentGateway, EmailService, MpesaClient, MpesaError};

/// Errors building the application from configuration.
#[derive(Debug, thiserror::Error)]
pub enum AppBuildError {
    #[error("JWT configuration error: {0}")]
    Jwt(#[from] JwtError),

    #[error("M-Pesa configuration error: {0}")]
    Mpesa(#[from] MpesaError),
}

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub jwt: Arc<JwtConfig>,
    pub registrations: Arc<RegistrationService>,
    pub settlement: Arc<SettlementService>,
}

impl AppState {
    /// Wire the production services: Postgres store, M-Pesa (or the disabled
    /// gateway) and email ticket delivery.
    pub fn from_config(config: Config, pool: PgPool) -> Result<Self, AppBuildError> {
        let gateway: Arc<dyn PaymentGateway> = if config.mpesa.enabled {
            Arc::new(MpesaClient::new(&config.mpesa)?)
        } else {
            tracing::warn!("M-Pesa disabled; paid registrations will be refused");
            Arc::new(DisabledPaymentGateway)
        };
        let tickets: Arc<dyn TicketIssuer> = Arc::new(EmailService::new(config.email.clone()));

        Self::with_services(config, pool, gateway, tickets)
    }

    /// Wire the state around a given gateway and ticket issuer.
    pub fn with_services(
        config: Config,
        pool: PgPool,
        gateway: Arc<dyn PaymentGateway>,
        tickets: Arc<dyn TicketIssuer>,
    ) -> Result<Self, AppBuildError> {
        let jwt = UserAuth::create_jwt_config(&config.jwt)?;
        let store: Arc<dyn RegistrationStore> = Arc::new(RegistrationRepository::new(pool.clone()));

        let registrations = RegistrationService::new(
            Arc::clone(&store),
            Arc::clone(&gateway),
            Arc::clone(&tickets),
        )
        .with_max_quantity(config.registration.max_quantity);
        let settlement = SettlementService::new(store, gateway, tickets);

        Ok(Self {
            pool,
            config: Arc::new(config),
            jwt: Arc::new(jwt),
            registrations: Arc::new(registrations),
            settlement: Arc::new(settlement),
        })
    }
}

pub fn create_app(state: AppState) -> Router {
    let config = Arc::clone(&state.config);

    // Build CORS layer based on configuration
    let cors = if config.security.cors_origins.is_empty() {
        // Default: allow any origin (for development)
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .security
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    // Registration routes (require JWT user authentication)
    let registration_routes = Router::new()
        .route(
            "/api/v1/events/:event_id/register",
            post(registrations::register_for_event),
        )
        .route(
            "/api/v1/events/:event_id/cancel-rsvp",
            post(registrations::cancel_registration),
        )
        .route(
            "/api/v1/events/:event_id/registration",
            get(registrations::get_registration),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_user_auth,
        ));

    // Provider webhooks (no authentication, always acknowledged)
    let webhook_routes = Router::new().route(
        "/api/v1/payments/mpesa/callback",
        post(payments::mpesa_callback),
    );

    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/ready", get(health::ready))
        .route("/api/health/live", get(health::live))
        .route("/metrics", get(metrics_handler));

    Router::new()
        .merge(public_routes)
        .merge(registration_routes)
        .merge(webhook_routes)
        // Global middleware (order matters: bottom layers run first)
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id))
        .layer(cors)
        .with_state(state)
}
