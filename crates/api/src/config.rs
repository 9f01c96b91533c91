use serde::Deserialize;
use std::net::SocketAddr;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    /// JWT authentication configuration
    pub jwt: JwtAuthConfig,
    /// M-Pesa Daraja configuration
    #[serde(default)]
    pub mpesa: MpesaConfig,
    /// Ticket email configuration
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub registration: RegistrationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl DatabaseConfig {
    /// Pool settings in the form the persistence crate expects.
    pub fn pool_config(&self) -> persistence::db::DatabaseConfig {
        persistence::db::DatabaseConfig {
            url: self.url.clone(),
            max_connections: self.max_connections,
            min_connections: self.min_connections,
            connect_timeout_secs: self.connect_timeout_secs,
            idle_timeout_secs: self.idle_timeout_secs,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityConfig {
    /// Allowed CORS origins. Empty allows any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_connections() -> u32 {
    20
}
fn default_min_connections() -> u32 {
    5
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_idle_timeout() -> u64 {
    600
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtAuthConfig {
    /// RSA private key in PEM format for signing tokens (optional, validation only needs the public key)
    #[serde(default)]
    pub private_key: String,

    /// RSA public key in PEM format for verifying tokens
    #[serde(default)]
    pub public_key: String,

    /// Shared HS256 secret, used only when no public key is configured (local development)
    #[serde(default)]
    pub secret: String,

    /// Access token expiration in seconds (default: 3600 = 1 hour)
    #[serde(default = "default_access_token_expiry")]
    pub access_token_expiry_secs: i64,

    /// Leeway in seconds for clock skew tolerance (default: 30)
    #[serde(default = "default_jwt_leeway")]
    pub leeway_secs: u64,
}

fn default_access_token_expiry() -> i64 {
    3600 // 1 hour
}

fn default_jwt_leeway() -> u64 {
    30
}

/// M-Pesa Daraja API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MpesaConfig {
    /// Whether paid registrations can be charged
    #[serde(default)]
    pub enabled: bool,

    /// sandbox or production
    #[serde(default = "default_mpesa_environment")]
    pub environment: String,

    /// Overrides the environment's base URL (tests, proxies)
    #[serde(default)]
    pub base_url: String,

    #[serde(default)]
    pub consumer_key: String,

    #[serde(default)]
    pub consumer_secret: String,

    /// Business short code (paybill or till)
    #[serde(default)]
    pub shortcode: String,

    #[serde(default)]
    pub passkey: String,

    /// Public URL the provider posts settlement callbacks to
    #[serde(default)]
    pub callback_url: String,

    /// Request timeout in milliseconds
    #[serde(default = "default_mpesa_timeout_ms")]
    pub timeout_ms: u64,

    /// Seconds before token expiry at which a new token is fetched
    #[serde(default = "default_token_safety_margin")]
    pub token_safety_margin_secs: u64,

    #[serde(default = "default_transaction_type")]
    pub transaction_type: String,
}

impl Default for MpesaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            environment: default_mpesa_environment(),
            base_url: String::new(),
            consumer_key: String::new(),
            consumer_secret: String::new(),
            shortcode: String::new(),
            passkey: String::new(),
            callback_url: String::new(),
            timeout_ms: default_mpesa_timeout_ms(),
            token_safety_margin_secs: default_token_safety_margin(),
            transaction_type: default_transaction_type(),
        }
    }
}

fn default_mpesa_environment() -> String {
    "sandbox".to_string()
}

fn default_mpesa_timeout_ms() -> u64 {
    30000
}

fn default_token_safety_margin() -> u64 {
    300
}

fn default_transaction_type() -> String {
    "CustomerPayBillOnline".to_string()
}

/// Email configuration for ticket delivery.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    /// Whether email sending is enabled
    #[serde(default)]
    pub enabled: bool,

    /// Email provider: sendgrid, or console (for development)
    #[serde(default = "default_email_provider")]
    pub provider: String,

    /// SendGrid API key (for sendgrid provider)
    #[serde(default)]
    pub sendgrid_api_key: String,

    /// SendGrid API base URL
    #[serde(default = "default_sendgrid_base_url")]
    pub sendgrid_base_url: String,

    /// Sender email address (From header)
    #[serde(default = "default_sender_email")]
    pub sender_email: String,

    /// Sender name (From header)
    #[serde(default = "default_sender_name")]
    pub sender_name: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_email_provider(),
            sendgrid_api_key: String::new(),
            sendgrid_base_url: default_sendgrid_base_url(),
            sender_email: default_sender_email(),
            sender_name: default_sender_name(),
        }
    }
}

fn default_email_provider() -> String {
    "console".to_string()
}

fn default_sendgrid_base_url() -> String {
    "https://api.sendgrid.com".to_string()
}

fn default_sender_email() -> String {
    "tickets@ticketing.app".to_string()
}

fn default_sender_name() -> String {
    "Event Tickets".to_string()
}

/// Registration limits and pending-payment reconciliation.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationConfig {
    /// Tickets per registration (never above 10)
    #[serde(default = "default_max_quantity")]
    pub max_quantity: i32,

    #[serde(default = "default_reconciliation_enabled")]
    pub reconciliation_enabled: bool,

    /// Age at which a PENDING payment is queried at the provider
    #[serde(default = "default_pending_query_after")]
    pub pending_query_after_secs: u64,

    /// Age at which an unresolved PENDING payment is failed
    #[serde(default = "default_pending_expiry")]
    pub pending_expiry_secs: u64,

    #[serde(default = "default_reconciliation_batch_size")]
    pub reconciliation_batch_size: i64,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            max_quantity: default_max_quantity(),
            reconciliation_enabled: default_reconciliation_enabled(),
            pending_query_after_secs: default_pending_query_after(),
            pending_expiry_secs: default_pending_expiry(),
            reconciliation_batch_size: default_reconciliation_batch_size(),
        }
    }
}

fn default_max_quantity() -> i32 {
    10
}

fn default_reconciliation_enabled() -> bool {
    true
}

fn default_pending_query_after() -> u64 {
    120
}

fn default_pending_expiry() -> u64 {
    1800
}

fn default_reconciliation_batch_size() -> i64 {
    100
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. config/default.toml - base configuration with defaults
    /// 2. config/local.toml - local overrides (optional, not in git)
    /// 3. Environment variables with TKT__ prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("TKT").separator("__"))
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Load configuration for testing with custom overrides.
    ///
    /// Defaults are embedded so tests do not depend on the config directory.
    #[cfg(test)]
    pub fn load_for_test(overrides: &[(&str, &str)]) -> Result<Self, config::ConfigError> {
        let defaults = r#"
            [server]
            host = "0.0.0.0"
            port = 8080
            request_timeout_secs = 30

            [database]
            url = ""
            max_connections = 20
            min_connections = 5
            connect_timeout_secs = 10
            idle_timeout_secs = 600

            [logging]
            level = "info"
            format = "json"

            [security]
            cors_origins = []

            [jwt]
            secret = "test-secret"
            access_token_expiry_secs = 3600
            leeway_secs = 30

            [mpesa]
            enabled = false
            environment = "sandbox"

            [email]
            enabled = false
            provider = "console"
            sender_email = "test@example.com"
            sender_name = "Test"

            [registration]
            max_quantity = 10
            reconciliation_enabled = false
        "#;

        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(defaults, config::FileFormat::Toml));

        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        // Skip validation in tests to allow partial configs
        Ok(cfg)
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.database.url.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "TKT__DATABASE__URL environment variable must be set".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "Server port cannot be 0".to_string(),
            ));
        }
        self.socket_addr()?;

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigValidationError::InvalidValue(
                "min_connections cannot exceed max_connections".to_string(),
            ));
        }

        if self.jwt.public_key.trim().is_empty() && self.jwt.secret.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "jwt.public_key (or jwt.secret for development) must be set".to_string(),
            ));
        }

        if self.mpesa.enabled {
            let required = [
                ("mpesa.consumer_key", &self.mpesa.consumer_key),
                ("mpesa.consumer_secret", &self.mpesa.consumer_secret),
                ("mpesa.shortcode", &self.mpesa.shortcode),
                ("mpesa.passkey", &self.mpesa.passkey),
                ("mpesa.callback_url", &self.mpesa.callback_url),
            ];
            for (name, value) in required {
                if value.trim().is_empty() {
                    return Err(ConfigValidationError::MissingRequired(format!(
                        "{} must be set when mpesa.enabled is true",
                        name
                    )));
                }
            }
            if !matches!(self.mpesa.environment.as_str(), "sandbox" | "production") {
                return Err(ConfigValidationError::InvalidValue(format!(
                    "mpesa.environment must be sandbox or production, got {}",
                    self.mpesa.environment
                )));
            }
        }

        if self.email.enabled {
            match self.email.provider.as_str() {
                "console" => {}
                "sendgrid" if !self.email.sendgrid_api_key.is_empty() => {}
                "sendgrid" => {
                    return Err(ConfigValidationError::MissingRequired(
                        "email.sendgrid_api_key must be set for the sendgrid provider".to_string(),
                    ))
                }
                other => {
                    return Err(ConfigValidationError::InvalidValue(format!(
                        "Unknown email provider: {}",
                        other
                    )))
                }
            }
        }

        if !(1..=10).contains(&self.registration.max_quantity) {
            return Err(ConfigValidationError::InvalidValue(
                "registration.max_quantity must be between 1 and 10".to_string(),
            ));
        }

        if self.registration.pending_expiry_secs <= self.registration.pending_query_after_secs {
            return Err(ConfigValidationError::InvalidValue(
                "registration.pending_expiry_secs must exceed pending_query_after_secs"
                    .to_string(),
            ));
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigValidationError> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|_| {
                ConfigValidationError::InvalidValue(format!(
                    "Invalid socket address {}:{}",
                    self.server.host, self.server.port
                ))
            })
    }
}
