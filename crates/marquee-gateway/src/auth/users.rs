//! User model and password hashing.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{
        self, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString, rand_core::OsRng,
    },
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AuthError;

/// User role for access control.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Regular library user.
    #[default]
    User,
    /// Server administrator.
    Admin,
}

impl UserRole {
    /// Check if this role has admin privileges.
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for UserRole {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            _ => Err(AuthError::Config(format!("Unknown role: {s}"))),
        }
    }
}

/// User account as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique numeric user ID.
    pub id: u64,
    /// Display username.
    pub username: String,
    /// Email address (lowercased).
    pub email: String,
    /// Argon2 password hash. Never leaves the server; see [`PublicUser`].
    pub password_hash: String,
    /// User role.
    pub role: UserRole,
    /// Whether the user finished onboarding.
    #[serde(default)]
    pub onboarded: bool,
    /// When the user was created.
    pub created_at: DateTime<Utc>,
    /// When the user last logged in.
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    /// Create a safe version of user for API responses (no password hash).
    #[must_use]
    pub fn to_public(&self) -> PublicUser {
        PublicUser {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            role: self.role,
            onboarded: self.onboarded,
            created_at: self.created_at,
            last_login: self.last_login,
        }
    }
}

/// Public user representation (for API responses).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicUser {
    /// Unique user ID.
    pub id: u64,
    /// Username.
    pub username: String,
    /// Email address.
    pub email: String,
    /// User role.
    pub role: UserRole,
    /// Whether onboarding is complete.
    pub onboarded: bool,
    /// When created.
    pub created_at: DateTime<Utc>,
    /// Last login time.
    pub last_login: Option<DateTime<Utc>>,
}

/// One-way password hashing with constant-time verification.
pub trait PasswordHasher: Send + Sync {
    /// Hash a password into a self-describing string.
    ///
    /// # Errors
    ///
    /// Returns error if hashing fails.
    fn hash(&self, password: &str) -> Result<String, AuthError>;

    /// Verify a password against a stored hash.
    ///
    /// Returns `Ok(false)` on mismatch; `Err` only for unusable hashes.
    ///
    /// # Errors
    ///
    /// Returns error if the stored hash cannot be parsed.
    fn verify(&self, password: &str, hash: &str) -> Result<bool, AuthError>;
}

/// Argon2id hasher with the crate's default parameters.
#[derive(Default)]
pub struct Argon2Hasher {
    argon2: Argon2<'static>,
}

impl std::fmt::Debug for Argon2Hasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Argon2Hasher").finish_non_exhaustive()
    }
}

impl Argon2Hasher {
    /// Create a hasher with default Argon2id parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an Argon2id hasher with explicit cost parameters.
    ///
    /// `memory_kib` is the memory cost in KiB, `iterations` the time cost.
    ///
    /// # Errors
    ///
    /// Returns error if the parameters are out of range.
    pub fn with_params(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self, AuthError> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|e| AuthError::Config(format!("Invalid Argon2 parameters: {e}")))?;

        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }
}

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);

        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| AuthError::Config(format!("Password hashing failed: {e}")))
    }

    fn verify(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        let parsed =
            PasswordHash::new(hash).map_err(|e| AuthError::Config(format!("Invalid hash: {e}")))?;

        match self.argon2.verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(e) => Err(AuthError::Config(format!("Password verification failed: {e}"))),
        }
    }
}
