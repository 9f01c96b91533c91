//! External service integrations.

pub mod email;
pub mod mpesa;

pub use email::{EmailError, EmailMessage, EmailService};
pub use mpesa::{DisabledPaymentGateway, MpesaClient, MpesaEnvironment, MpesaError};
