//! Authentication and authorization for the media server.
//!
//! This module provides:
//! - Signed, time-bound access tokens ([`TokenCodec`])
//! - User and refresh-session storage ([`CredentialStore`], [`SledCredentialStore`])
//! - Registration, login, refresh rotation and logout ([`AuthService`])
//! - Request gates for protected and admin-only routes ([`gate`])
//! - Bootstrap of the first admin account ([`setup`])

/// Request gate filters and identity extractors.
pub mod gate;
mod service;
/// First-run admin bootstrap.
pub mod setup;
mod store;
mod token;
mod users;

pub use gate::{CurrentUser, MaybeUser};
pub use service::{AuthResponse, AuthService};
pub use store::{CredentialStore, NewUser, RotateOutcome, SessionRecord, SledCredentialStore};
pub use token::{Claims, Identity, TokenCodec, TokenPair};
pub use users::{Argon2Hasher, PasswordHasher, PublicUser, User, UserRole};

use std::time::Duration;

use marquee_core::ValidationError;
use thiserror::Error;

/// Authentication errors.
///
/// Every failure path in the auth core returns one of these. The HTTP status
/// and body for each variant are decided in [`gate`] and nowhere else.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Malformed registration input.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Username or email already registered.
    #[error("Already registered: {0}")]
    Conflict(String),

    /// Unknown username or wrong password. Deliberately carries no detail.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Token missing, malformed, expired, or already rotated.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Authenticated but not allowed.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimited {
        /// Time until the client's window resets.
        retry_after: Duration,
    },

    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration or crypto setup error.
    #[error("Config error: {0}")]
    Config(String),
}

impl AuthError {
    /// Whether this is an infrastructure failure rather than a client error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Config(_))
    }
}

impl From<sled::Error> for AuthError {
    fn from(e: sled::Error) -> Self {
        Self::Storage(e.to_string())
    }
}
