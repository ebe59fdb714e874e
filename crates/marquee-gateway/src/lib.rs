//! # Marquee Gateway
//!
//! Request authentication, access control and rate limiting for the Marquee
//! media server, plus the HTTP surface for account management.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Authentication and authorization.
pub mod auth;
/// Per-client rate limiting.
pub mod ratelimit;
mod server;
/// Background maintenance tasks.
pub mod tasks;

pub use auth::{AuthError, AuthResponse, AuthService, Identity, PublicUser, User, UserRole};
pub use ratelimit::{ClientKey, RateLimiter, RateLimiters, RatePolicy};
pub use server::{Gateway, GatewayBuilder, GatewayConfig, GatewayState};
pub use tasks::BackgroundTasks;

/// Start the gateway server and run until Ctrl-C.
///
/// # Errors
///
/// Returns error if server fails to start.
pub async fn start(config: GatewayConfig) -> Result<(), GatewayError> {
    let gateway = Gateway::new(config)?;
    gateway.run().await
}

/// Gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Server error.
    #[error("Server error: {0}")]
    Server(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// Authentication setup error.
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
