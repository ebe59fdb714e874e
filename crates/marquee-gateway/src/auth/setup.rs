//! First-run admin bootstrap.

use rand::Rng;

use super::AuthError;
use super::service::AuthService;
use super::users::{User, UserRole};

/// Env var holding the bootstrap admin username.
pub const ADMIN_USERNAME_ENV: &str = "MARQUEE_ADMIN_USERNAME";
/// Env var holding the bootstrap admin email.
pub const ADMIN_EMAIL_ENV: &str = "MARQUEE_ADMIN_EMAIL";
/// Env var holding the bootstrap admin password.
pub const ADMIN_PASSWORD_ENV: &str = "MARQUEE_ADMIN_PASSWORD";

/// Credentials for the account created on an empty store.
#[derive(Clone)]
pub struct AdminBootstrap {
    /// Username.
    pub username: String,
    /// Email; defaults to `<username>@marquee.local`.
    pub email: String,
    /// Plaintext password, hashed on creation.
    pub password: String,
}

impl std::fmt::Debug for AdminBootstrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminBootstrap")
            .field("username", &self.username)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

impl AdminBootstrap {
    /// Read bootstrap credentials from the environment.
    ///
    /// Returns `None` unless both username and password are set and non-empty.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());

        Self::from_parts(
            var(ADMIN_USERNAME_ENV),
            var(ADMIN_EMAIL_ENV),
            var(ADMIN_PASSWORD_ENV),
        )
    }

    fn from_parts(
        username: Option<String>,
        email: Option<String>,
        password: Option<String>,
    ) -> Option<Self> {
        let username = username?;
        let password = password?;
        let email = email.unwrap_or_else(|| format!("{}@marquee.local", username.trim()));

        Some(Self {
            username,
            email,
            password,
        })
    }
}

/// Create the admin account if the store is still empty.
///
/// Returns the created user, or `None` if accounts already exist.
///
/// # Errors
///
/// Returns error if the credentials are invalid or storage fails.
pub async fn bootstrap_admin(
    auth: &AuthService,
    bootstrap: &AdminBootstrap,
) -> Result<Option<User>, AuthError> {
    if auth.user_count().await? > 0 {
        tracing::debug!("Accounts exist, skipping admin bootstrap");
        return Ok(None);
    }

    let admin = auth
        .create_user(
            &bootstrap.username,
            &bootstrap.email,
            &bootstrap.password,
            UserRole::Admin,
        )
        .await?;

    tracing::info!(user_id = admin.id, username = %admin.username, "Admin user created from environment");

    Ok(Some(admin))
}

/// Generate a random password from an unambiguous alphabet.
#[must_use]
pub fn generate_password(length: usize) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnpqrstuvwxyz23456789!@#$%^&*";
    let mut rng = rand::thread_rng();

    (0..length)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}
