//! Registration, login, refresh-token rotation, logout and token validation.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use marquee_core::validation::limits::MAX_PASSWORD_BYTES;
use marquee_core::{AuthConfig, normalize_email, normalize_username, validate_password};
use serde::Serialize;
use tokio::sync::OnceCell;

use super::AuthError;
use super::store::{CredentialStore, NewUser, RotateOutcome, SessionRecord, SledCredentialStore};
use super::token::{
    Identity, TokenCodec, TokenPair, expiry_after, new_family_id, new_refresh_token,
    refresh_token_digest,
};
use super::users::{Argon2Hasher, PasswordHasher, PublicUser, User, UserRole};

/// Successful register/login/refresh result.
#[derive(Debug, Clone, Serialize)]
pub struct AuthResponse {
    /// The authenticated user.
    pub user: PublicUser,
    /// Freshly issued tokens.
    #[serde(flatten)]
    pub tokens: TokenPair,
}

/// Authentication service.
///
/// Owns the token codec and talks to the credential store and password
/// hasher through their traits. `validate_token` touches only the codec.
pub struct AuthService {
    config: AuthConfig,
    codec: TokenCodec,
    store: Arc<dyn CredentialStore>,
    hasher: Arc<dyn PasswordHasher>,
    dummy_hash: OnceCell<String>,
}

impl AuthService {
    /// Create a service from its collaborators.
    #[must_use]
    pub fn new(
        config: AuthConfig,
        codec: TokenCodec,
        store: Arc<dyn CredentialStore>,
        hasher: Arc<dyn PasswordHasher>,
    ) -> Self {
        Self {
            config,
            codec,
            store,
            hasher,
            dummy_hash: OnceCell::new(),
        }
    }

    /// Open the sled store under `data_dir` and build the codec from config.
    ///
    /// Generates an ephemeral signing secret if none is configured.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be opened or the secret is malformed.
    pub fn initialize(config: AuthConfig, data_dir: &Path) -> Result<Self, AuthError> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| AuthError::Storage(format!("Failed to create data dir: {e}")))?;
        let store = SledCredentialStore::open(data_dir)?;

        let codec = match &config.jwt_secret {
            Some(secret) => TokenCodec::from_hex_secret(secret, config.access_token_ttl())?,
            None => {
                tracing::warn!(
                    "No signing secret configured; generated an ephemeral one, tokens will not survive a restart"
                );
                TokenCodec::new(&TokenCodec::generate_secret(), config.access_token_ttl())
            }
        };

        Ok(Self::new(
            config,
            codec,
            Arc::new(store),
            Arc::new(Argon2Hasher::new()),
        ))
    }

    /// Auth configuration.
    #[must_use]
    pub const fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Token codec.
    #[must_use]
    pub const fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Register a new account and open its first session.
    ///
    /// # Errors
    ///
    /// `Forbidden` if registration is closed, `Validation` on malformed input,
    /// `Conflict` if the username or email is taken.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, AuthError> {
        if !self.config.allow_registration {
            return Err(AuthError::Forbidden("Registration is disabled".to_string()));
        }

        let user = self
            .create_account(username, email, password, UserRole::User, self.config.first_user_admin)
            .await?;
        let tokens = self.open_session(&user).await?;

        tracing::info!(user_id = user.id, username = %user.username, role = %user.role, "User registered");

        Ok(AuthResponse {
            user: user.to_public(),
            tokens,
        })
    }

    /// Create an account directly, bypassing the registration switch.
    ///
    /// Used by administrative tooling and environment bootstrap.
    ///
    /// # Errors
    ///
    /// `Validation` on malformed input, `Conflict` on duplicates.
    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        password: &str,
        role: UserRole,
    ) -> Result<User, AuthError> {
        self.create_account(username, email, password, role, false)
            .await
    }

    async fn create_account(
        &self,
        username: &str,
        email: &str,
        password: &str,
        role: UserRole,
        promote_if_first: bool,
    ) -> Result<User, AuthError> {
        let username = normalize_username(username)?;
        let email = normalize_email(email)?;
        validate_password(password, self.config.min_password_length)?;

        let password_hash = self.hash_password(password).await?;

        self.store
            .create_user(NewUser {
                username_key: self.username_key(&username),
                username,
                email,
                password_hash,
                role,
                promote_if_first,
            })
            .await
    }

    /// Authenticate with username and password and open a new session.
    ///
    /// # Errors
    ///
    /// `InvalidCredentials` for an unknown username or a wrong password alike.
    pub async fn login(&self, username: &str, password: &str) -> Result<AuthResponse, AuthError> {
        // Oversized passwords can never have been registered and are not hashed
        let oversized = password.len() > MAX_PASSWORD_BYTES;
        let user = match normalize_username(username) {
            Ok(name) if !oversized => self.store.user_by_username(&self.username_key(&name)).await?,
            _ => None,
        };

        let Some(mut user) = user else {
            // Unknown usernames pay for one verification too
            let dummy = self.dummy_hash().await?;
            let candidate = if oversized { "" } else { password };
            let _ = self.verify_password(candidate, dummy).await;
            tracing::warn!(username = %username, "Login failed");
            return Err(AuthError::InvalidCredentials);
        };

        if !self.verify_password(password, &user.password_hash).await? {
            tracing::warn!(username = %username, "Login failed");
            return Err(AuthError::InvalidCredentials);
        }

        let now = Utc::now();
        self.store.record_login(user.id, now).await?;
        user.last_login = Some(now);

        let tokens = self.open_session(&user).await?;
        tracing::info!(user_id = user.id, username = %user.username, "User logged in");

        Ok(AuthResponse {
            user: user.to_public(),
            tokens,
        })
    }

    /// Exchange a refresh token for a new token pair, consuming it.
    ///
    /// # Errors
    ///
    /// `InvalidToken` if the token is unknown, expired or already used.
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthResponse, AuthError> {
        if refresh_token.is_empty() {
            return Err(AuthError::InvalidToken("Missing refresh token".to_string()));
        }

        let next = new_refresh_token();
        let next_hash = refresh_token_digest(&next);
        let now = Utc::now();
        let expires_at = expiry_after(now, self.config.refresh_token_ttl())?;

        let outcome = self
            .store
            .rotate_session(&refresh_token_digest(refresh_token), &next_hash, expires_at, now)
            .await?;

        let session = match outcome {
            RotateOutcome::Rotated(session) => session,
            RotateOutcome::Expired => {
                return Err(AuthError::InvalidToken("Refresh token expired".to_string()));
            }
            RotateOutcome::Reused { user_id, family_id } => {
                tracing::warn!(user_id, family_id = %family_id, "Refresh token replayed, session family revoked");
                return Err(AuthError::InvalidToken("Refresh token already used".to_string()));
            }
            RotateOutcome::Unknown => {
                return Err(AuthError::InvalidToken("Unknown refresh token".to_string()));
            }
        };

        let Some(user) = self.store.user_by_id(session.user_id).await? else {
            self.store.delete_session(&next_hash).await?;
            return Err(AuthError::InvalidToken("Account no longer exists".to_string()));
        };

        let (access_token, access_expires_at) =
            self.codec.sign(user.id, &user.username, user.role)?;
        tracing::debug!(user_id = user.id, "Refresh token rotated");

        Ok(AuthResponse {
            user: user.to_public(),
            tokens: TokenPair {
                access_token,
                refresh_token: next,
                expires_at: access_expires_at,
                refresh_expires_at: session.expires_at,
                token_type: "Bearer".to_string(),
            },
        })
    }

    /// Invalidate a refresh token. Unknown or already-invalid tokens are fine.
    ///
    /// # Errors
    ///
    /// Only storage failures.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        if refresh_token.is_empty() {
            return Ok(());
        }

        if self
            .store
            .delete_session(&refresh_token_digest(refresh_token))
            .await?
        {
            tracing::debug!("Session closed");
        }
        Ok(())
    }

    /// Invalidate every session of a user. Returns how many were closed.
    ///
    /// # Errors
    ///
    /// Only storage failures.
    pub async fn logout_all(&self, user_id: u64) -> Result<usize, AuthError> {
        let closed = self.store.delete_user_sessions(user_id).await?;
        tracing::info!(user_id, closed, "All sessions closed");
        Ok(closed)
    }

    /// Verify an access token and return the identity it carries.
    ///
    /// # Errors
    ///
    /// `InvalidToken` on bad signature, malformed structure, or expiry.
    pub fn validate_token(&self, token: &str) -> Result<Identity, AuthError> {
        self.codec.verify(token)
    }

    /// Load the public record of a user.
    ///
    /// # Errors
    ///
    /// `InvalidToken` if the account behind a valid token no longer exists.
    pub async fn current_user(&self, user_id: u64) -> Result<PublicUser, AuthError> {
        self.store
            .user_by_id(user_id)
            .await?
            .map(|u| u.to_public())
            .ok_or_else(|| AuthError::InvalidToken("Account no longer exists".to_string()))
    }

    /// List all users.
    ///
    /// # Errors
    ///
    /// Only storage failures.
    pub async fn list_users(&self) -> Result<Vec<PublicUser>, AuthError> {
        Ok(self
            .store
            .list_users()
            .await?
            .iter()
            .map(User::to_public)
            .collect())
    }

    /// Number of registered users.
    ///
    /// # Errors
    ///
    /// Only storage failures.
    pub async fn user_count(&self) -> Result<u64, AuthError> {
        self.store.user_count().await
    }

    /// Remove expired sessions and tombstones.
    ///
    /// # Errors
    ///
    /// Only storage failures.
    pub async fn purge_expired_sessions(&self) -> Result<usize, AuthError> {
        let removed = self.store.purge_expired(Utc::now()).await?;
        if removed > 0 {
            tracing::debug!(removed, "Purged expired sessions");
        }
        Ok(removed)
    }

    async fn open_session(&self, user: &User) -> Result<TokenPair, AuthError> {
        let (access_token, expires_at) = self.codec.sign(user.id, &user.username, user.role)?;

        let refresh_token = new_refresh_token();
        let now = Utc::now();
        let session = SessionRecord {
            user_id: user.id,
            family_id: new_family_id(),
            created_at: now,
            expires_at: expiry_after(now, self.config.refresh_token_ttl())?,
        };
        self.store
            .insert_session(&refresh_token_digest(&refresh_token), &session)
            .await?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_at,
            refresh_expires_at: session.expires_at,
            token_type: "Bearer".to_string(),
        })
    }

    fn username_key(&self, username: &str) -> String {
        if self.config.case_insensitive_usernames {
            username.to_lowercase()
        } else {
            username.to_string()
        }
    }

    async fn dummy_hash(&self) -> Result<&str, AuthError> {
        self.dummy_hash
            .get_or_try_init(|| self.hash_password("marquee-timing-equalizer"))
            .await
            .map(String::as_str)
    }

    async fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let hasher = Arc::clone(&self.hasher);
        let password = password.to_string();

        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AuthError::Config(format!("Hashing task failed: {e}")))?
    }

    async fn verify_password(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        let hasher = Arc::clone(&self.hasher);
        let password = password.to_string();
        let hash = hash.to_string();

        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| AuthError::Config(format!("Verification task failed: {e}")))?
    }
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("codec", &self.codec)
            .field("allow_registration", &self.config.allow_registration)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Service over a temp sled store with a cheap hasher.
    pub(crate) fn test_service(config: AuthConfig) -> (TempDir, AuthService) {
        let temp_dir = TempDir::new().unwrap();
        let store = SledCredentialStore::open(temp_dir.path()).unwrap();
        let codec = TokenCodec::new(&TokenCodec::generate_secret(), Duration::from_secs(900));
        let hasher = Argon2Hasher::with_params(64, 1, 1).unwrap();

        let service = AuthService::new(config, codec, Arc::new(store), Arc::new(hasher));
        (temp_dir, service)
    }

    #[tokio::test]
    async fn test_register_returns_tokens() {
        let (_dir, service) = test_service(AuthConfig::default());

        let resp = service.register("alice", "a@x.com", "pw123456").await.unwrap();
        assert_eq!(resp.user.username, "alice");
        assert!(!resp.tokens.access_token.is_empty());
        assert!(!resp.tokens.refresh_token.is_empty());
        assert_eq!(resp.tokens.token_type, "Bearer");

        let identity = service.validate_token(&resp.tokens.access_token).unwrap();
        assert_eq!(identity.user_id, resp.user.id);
    }

    #[tokio::test]
    async fn test_first_user_becomes_admin() {
        let (_dir, service) = test_service(AuthConfig::default());

        let first = service.register("alice", "a@x.com", "pw123456").await.unwrap();
        let second = service.register("bob", "b@x.com", "pw123456").await.unwrap();
        assert_eq!(first.user.role, UserRole::Admin);
        assert_eq!(second.user.role, UserRole::User);

        let (_dir, service) = test_service(AuthConfig::builder().first_user_admin(false).build());
        let first = service.register("alice", "a@x.com", "pw123456").await.unwrap();
        assert_eq!(first.user.role, UserRole::User);
    }

    #[tokio::test]
    async fn test_duplicate_registration_conflicts() {
        let (_dir, service) = test_service(AuthConfig::default());
        service.register("alice", "a@x.com", "pw123456").await.unwrap();

        let same_name = service.register("alice", "other@x.com", "pw123456").await;
        assert!(matches!(same_name, Err(AuthError::Conflict(_))));

        // Case-insensitive by default
        let other_case = service.register("ALICE", "third@x.com", "pw123456").await;
        assert!(matches!(other_case, Err(AuthError::Conflict(_))));

        let same_email = service.register("bob", "A@X.com", "pw123456").await;
        assert!(matches!(same_email, Err(AuthError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_case_sensitive_usernames() {
        let config = AuthConfig::builder().case_insensitive_usernames(false).build();
        let (_dir, service) = test_service(config);

        service.register("alice", "a@x.com", "pw123456").await.unwrap();
        assert!(service.register("Alice", "b@x.com", "pw123456").await.is_ok());
        assert!(matches!(
            service.login("ALICE", "pw123456").await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_register_validation() {
        let (_dir, service) = test_service(AuthConfig::default());

        assert!(matches!(
            service.register("alice", "a@x.com", "short").await,
            Err(AuthError::Validation(_))
        ));
        assert!(matches!(
            service.register("a b", "a@x.com", "pw123456").await,
            Err(AuthError::Validation(_))
        ));
        assert!(matches!(
            service.register("alice", "nope", "pw123456").await,
            Err(AuthError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_registration_disabled() {
        let (_dir, service) = test_service(AuthConfig::builder().allow_registration(false).build());

        assert!(matches!(
            service.register("alice", "a@x.com", "pw123456").await,
            Err(AuthError::Forbidden(_))
        ));

        // Admin tooling still works
        let user = service
            .create_user("alice", "a@x.com", "pw123456", UserRole::Admin)
            .await
            .unwrap();
        assert_eq!(user.role, UserRole::Admin);
    }

    #[tokio::test]
    async fn test_login() {
        let (_dir, service) = test_service(AuthConfig::default());
        let registered = service.register("alice", "a@x.com", "pw123456").await.unwrap();

        let login = service.login("alice", "pw123456").await.unwrap();
        assert_eq!(login.user.id, registered.user.id);
        assert!(login.user.last_login.is_some());
        assert_ne!(login.tokens.access_token, registered.tokens.access_token);
        assert_ne!(login.tokens.refresh_token, registered.tokens.refresh_token);

        // Both sessions remain usable
        assert!(service.refresh(&registered.tokens.refresh_token).await.is_ok());
        assert!(service.refresh(&login.tokens.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_login_failures_indistinguishable() {
        let (_dir, service) = test_service(AuthConfig::default());
        service.register("alice", "a@x.com", "pw123456").await.unwrap();

        let wrong_password = service.login("alice", "wrongpw").await.unwrap_err();
        let unknown_user = service.login("mallory", "pw123456").await.unwrap_err();
        let malformed_user = service.login("!!", "pw123456").await.unwrap_err();

        assert!(matches!(wrong_password, AuthError::InvalidCredentials));
        assert!(matches!(unknown_user, AuthError::InvalidCredentials));
        assert!(matches!(malformed_user, AuthError::InvalidCredentials));
        assert_eq!(wrong_password.to_string(), unknown_user.to_string());
    }

    /// Records the longest password it was asked to hash or verify.
    struct RecordingHasher {
        inner: Argon2Hasher,
        longest: std::sync::atomic::AtomicUsize,
    }

    impl PasswordHasher for RecordingHasher {
        fn hash(&self, password: &str) -> Result<String, AuthError> {
            self.longest
                .fetch_max(password.len(), std::sync::atomic::Ordering::SeqCst);
            self.inner.hash(password)
        }

        fn verify(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
            self.longest
                .fetch_max(password.len(), std::sync::atomic::Ordering::SeqCst);
            self.inner.verify(password, hash)
        }
    }

    #[tokio::test]
    async fn test_login_oversized_password_skips_hashing() {
        let temp_dir = TempDir::new().unwrap();
        let store = SledCredentialStore::open(temp_dir.path()).unwrap();
        let codec = TokenCodec::new(&TokenCodec::generate_secret(), Duration::from_secs(900));
        let hasher = Arc::new(RecordingHasher {
            inner: Argon2Hasher::with_params(64, 1, 1).unwrap(),
            longest: std::sync::atomic::AtomicUsize::new(0),
        });
        let service = AuthService::new(AuthConfig::default(), codec, Arc::new(store), hasher.clone());
        service.register("alice", "a@x.com", "pw123456").await.unwrap();

        let huge = "x".repeat(MAX_PASSWORD_BYTES + 1);
        let known_user = service.login("alice", &huge).await.unwrap_err();
        let unknown_user = service.login("mallory", &huge).await.unwrap_err();

        assert!(matches!(known_user, AuthError::InvalidCredentials));
        assert!(matches!(unknown_user, AuthError::InvalidCredentials));
        assert!(hasher.longest.load(std::sync::atomic::Ordering::SeqCst) <= MAX_PASSWORD_BYTES);

        // The cap does not affect a normal login
        assert!(service.login("alice", "pw123456").await.is_ok());
    }

    #[tokio::test]
    async fn test_unrepresentable_refresh_lifetime_is_config_error() {
        let config = AuthConfig {
            refresh_token_days: u64::MAX,
            ..AuthConfig::default()
        };
        let (_dir, service) = test_service(config);

        assert!(matches!(
            service.register("alice", "a@x.com", "pw123456").await,
            Err(AuthError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_rotation() {
        let (_dir, service) = test_service(AuthConfig::default());
        let first = service.register("alice", "a@x.com", "pw123456").await.unwrap();
        let (a1, r1) = (first.tokens.access_token, first.tokens.refresh_token);

        let second = service.refresh(&r1).await.unwrap();
        let (a2, r2) = (second.tokens.access_token, second.tokens.refresh_token);
        assert_ne!(a2, a1);
        assert_ne!(r2, r1);
        assert_eq!(second.user.id, first.user.id);
        assert!(service.validate_token(&a2).is_ok());

        // Single use
        assert!(matches!(
            service.refresh(&r1).await,
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn test_replay_revokes_descendants() {
        let (_dir, service) = test_service(AuthConfig::default());
        let first = service.register("alice", "a@x.com", "pw123456").await.unwrap();
        let r1 = first.tokens.refresh_token;

        let r2 = service.refresh(&r1).await.unwrap().tokens.refresh_token;
        assert!(service.refresh(&r1).await.is_err());

        // The stolen lineage is dead, including the legitimate successor
        assert!(matches!(
            service.refresh(&r2).await,
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_refresh_single_winner() {
        let (_dir, service) = test_service(AuthConfig::default());
        let service = Arc::new(service);
        let first = service.register("alice", "a@x.com", "pw123456").await.unwrap();
        let token = first.tokens.refresh_token;
        let start = Arc::new(tokio::sync::Barrier::new(8));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = service.clone();
            let token = token.clone();
            let start = start.clone();
            handles.push(tokio::spawn(async move {
                start.wait().await;
                service.refresh(&token).await
            }));
        }

        let mut ok = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(e) => assert!(matches!(e, AuthError::InvalidToken(_))),
            }
        }
        assert_eq!(ok, 1);
    }

    #[tokio::test]
    async fn test_refresh_garbage() {
        let (_dir, service) = test_service(AuthConfig::default());
        assert!(matches!(
            service.refresh("").await,
            Err(AuthError::InvalidToken(_))
        ));
        assert!(matches!(
            service.refresh("deadbeef").await,
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn test_logout_idempotent() {
        let (_dir, service) = test_service(AuthConfig::default());
        let resp = service.register("alice", "a@x.com", "pw123456").await.unwrap();
        let refresh = resp.tokens.refresh_token;

        service.logout(&refresh).await.unwrap();
        service.logout(&refresh).await.unwrap();
        service.logout("never-issued").await.unwrap();

        assert!(matches!(
            service.refresh(&refresh).await,
            Err(AuthError::InvalidToken(_))
        ));
        // Access tokens stay valid until expiry
        assert!(service.validate_token(&resp.tokens.access_token).is_ok());
    }

    #[tokio::test]
    async fn test_logout_all() {
        let (_dir, service) = test_service(AuthConfig::default());
        let a = service.register("alice", "a@x.com", "pw123456").await.unwrap();
        let b = service.login("alice", "pw123456").await.unwrap();

        assert_eq!(service.logout_all(a.user.id).await.unwrap(), 2);
        assert!(service.refresh(&a.tokens.refresh_token).await.is_err());
        assert!(service.refresh(&b.tokens.refresh_token).await.is_err());
    }

    #[tokio::test]
    async fn test_current_user_and_listing() {
        let (_dir, service) = test_service(AuthConfig::default());
        let resp = service.register("alice", "a@x.com", "pw123456").await.unwrap();
        service.register("bob", "b@x.com", "pw123456").await.unwrap();

        let me = service.current_user(resp.user.id).await.unwrap();
        assert_eq!(me.username, "alice");
        assert!(matches!(
            service.current_user(9999).await,
            Err(AuthError::InvalidToken(_))
        ));

        let users = service.list_users().await.unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(service.user_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_validate_token_rejects_garbage() {
        let (_dir, service) = test_service(AuthConfig::default());
        assert!(matches!(
            service.validate_token("garbage"),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_initialize_generates_secret() {
        let temp_dir = TempDir::new().unwrap();
        let service = AuthService::initialize(AuthConfig::default(), temp_dir.path()).unwrap();
        let (token, _) = service.codec().sign(1, "alice", UserRole::User).unwrap();
        assert!(service.validate_token(&token).is_ok());

        let bad = AuthConfig::builder().jwt_secret("zz").build();
        let other_dir = TempDir::new().unwrap();
        assert!(AuthService::initialize(bad, other_dir.path()).is_err());
    }
}
