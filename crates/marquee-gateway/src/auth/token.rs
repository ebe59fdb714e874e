//! Access token signing and verification, plus opaque refresh tokens.

use std::time::Duration;

use blake2::{Blake2s256, Digest};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::AuthError;
use super::users::UserRole;

/// Access token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (numeric user ID, stringified).
    pub sub: String,
    /// Username at issue time.
    pub username: String,
    /// User role.
    pub role: UserRole,
    /// Issued at (Unix timestamp).
    pub iat: i64,
    /// Expiration (Unix timestamp).
    pub exp: i64,
    /// Random token ID. Two tokens issued in the same second still differ.
    pub jti: String,
}

/// Authenticated identity carried by a valid access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    /// User ID.
    pub user_id: u64,
    /// Username.
    pub username: String,
    /// User role.
    pub role: UserRole,
}

impl Identity {
    /// Check if this identity has the admin role.
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

impl TryFrom<Claims> for Identity {
    type Error = AuthError;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        let user_id = claims
            .sub
            .parse()
            .map_err(|_| AuthError::InvalidToken("Malformed subject".to_string()))?;

        Ok(Self {
            user_id,
            username: claims.username,
            role: claims.role,
        })
    }
}

/// A pair of access and refresh tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    /// Access token.
    pub access_token: String,
    /// Refresh token.
    pub refresh_token: String,
    /// Access token expiration.
    pub expires_at: DateTime<Utc>,
    /// Refresh token expiration.
    pub refresh_expires_at: DateTime<Utc>,
    /// Token type (always "Bearer").
    pub token_type: String,
}

/// Signs and verifies access tokens (HS256).
///
/// Holds only immutable key material, so a single instance is shared by all
/// request tasks without locking.
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    access_ttl: Duration,
}

impl TokenCodec {
    /// Create a codec with a secret key.
    ///
    /// The secret should be at least 32 bytes.
    #[must_use]
    pub fn new(secret: &[u8], access_ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            access_ttl,
        }
    }

    /// Create a codec from a hex-encoded secret.
    ///
    /// # Errors
    ///
    /// Returns error if hex decoding fails.
    pub fn from_hex_secret(hex_secret: &str, access_ttl: Duration) -> Result<Self, AuthError> {
        let secret = hex::decode(hex_secret)
            .map_err(|e| AuthError::Config(format!("Invalid hex secret: {e}")))?;
        Ok(Self::new(&secret, access_ttl))
    }

    /// Generate a random 256-bit secret key.
    #[must_use]
    pub fn generate_secret() -> [u8; 32] {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes
    }

    /// Generate a random secret as hex string.
    #[must_use]
    pub fn generate_hex_secret() -> String {
        hex::encode(Self::generate_secret())
    }

    /// Access token lifetime.
    #[must_use]
    pub const fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    /// Sign an access token for a user.
    ///
    /// # Errors
    ///
    /// Returns error if token encoding fails.
    pub fn sign(
        &self,
        user_id: u64,
        username: &str,
        role: UserRole,
    ) -> Result<(String, DateTime<Utc>), AuthError> {
        let now = Utc::now();
        let exp = expiry_after(now, self.access_ttl)?;

        let claims = Claims {
            sub: user_id.to_string(),
            username: username.to_string(),
            role,
            iat: now.timestamp(),
            exp: exp.timestamp(),
            jti: random_hex(16),
        };

        let token = self.encode_claims(&claims)?;
        Ok((token, exp))
    }

    fn encode_claims(&self, claims: &Claims) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AuthError::Config(format!("Token encoding failed: {e}")))
    }

    /// Verify signature and expiry, returning the embedded identity.
    ///
    /// Pure in-memory computation; no store access.
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` on bad signature, malformed structure, or expiry.
    pub fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        Identity::try_from(data.claims)
    }

    /// Extract token from an Authorization header value.
    ///
    /// Expects format: "Bearer <token>" (scheme is case-insensitive).
    #[must_use]
    pub fn extract_from_header(header: &str) -> Option<&str> {
        let (scheme, token) = header.split_once(' ')?;
        let token = token.trim();

        (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
    }
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("access_ttl", &self.access_ttl)
            .finish_non_exhaustive()
    }
}

/// `now + ttl`, or a config error when the lifetime cannot be represented.
///
/// # Errors
///
/// Returns `Config` if `ttl` overflows the timestamp range.
pub fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, AuthError> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| AuthError::Config(format!("Token lifetime out of range: {ttl:?}")))
}

/// Generate an opaque refresh token (256 random bits, hex).
#[must_use]
pub fn new_refresh_token() -> String {
    random_hex(32)
}

/// Storage key for a refresh token. Raw tokens are never persisted.
#[must_use]
pub fn refresh_token_digest(token: &str) -> String {
    hex::encode(Blake2s256::digest(token.as_bytes()))
}

/// Random family ID for a new rotation lineage.
#[must_use]
pub fn new_family_id() -> String {
    random_hex(16)
}

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_codec() -> TokenCodec {
        let secret = TokenCodec::generate_secret();
        TokenCodec::new(&secret, Duration::from_secs(3600))
    }

    #[test]
    fn test_generate_secret() {
        let secret1 = TokenCodec::generate_secret();
        let secret2 = TokenCodec::generate_secret();
        assert_ne!(secret1, secret2);
        assert_eq!(secret1.len(), 32);
    }

    #[test]
    fn test_sign_and_verify() {
        let codec = create_codec();
        let (token, expires) = codec.sign(42, "alice", UserRole::Admin).unwrap();

        assert!(!token.is_empty());
        assert!(expires > Utc::now());

        let identity = codec.verify(&token).unwrap();
        assert_eq!(identity.user_id, 42);
        assert_eq!(identity.username, "alice");
        assert_eq!(identity.role, UserRole::Admin);
        assert!(identity.is_admin());
    }

    #[test]
    fn test_tokens_issued_together_differ() {
        let codec = create_codec();
        let (a, _) = codec.sign(1, "alice", UserRole::User).unwrap();
        let (b, _) = codec.sign(1, "alice", UserRole::User).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_unrepresentable_lifetime_is_config_error() {
        let codec = TokenCodec::new(&TokenCodec::generate_secret(), Duration::MAX);
        assert!(matches!(
            codec.sign(1, "alice", UserRole::User),
            Err(AuthError::Config(_))
        ));

        let now = Utc::now();
        assert_eq!(
            expiry_after(now, Duration::from_secs(60)).unwrap(),
            now + chrono::Duration::seconds(60)
        );
    }

    #[test]
    fn test_expired_token_rejected() {
        let codec = create_codec();
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: "1".to_string(),
            username: "alice".to_string(),
            role: UserRole::User,
            iat: now - 120,
            exp: now - 60,
            jti: random_hex(16),
        };
        let token = codec.encode_claims(&claims).unwrap();

        assert!(matches!(codec.verify(&token), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let codec = create_codec();
        let other = create_codec();
        let (token, _) = codec.sign(1, "alice", UserRole::User).unwrap();

        assert!(matches!(other.verify(&token), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn test_malformed_token_rejected() {
        let codec = create_codec();
        assert!(codec.verify("invalid.token.here").is_err());
        assert!(codec.verify("").is_err());
    }

    #[test]
    fn test_non_numeric_subject_rejected() {
        let codec = create_codec();
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: "user_abc".to_string(),
            username: "alice".to_string(),
            role: UserRole::User,
            iat: now,
            exp: now + 600,
            jti: random_hex(16),
        };
        let token = codec.encode_claims(&claims).unwrap();

        assert!(matches!(codec.verify(&token), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn test_extract_from_header() {
        assert_eq!(TokenCodec::extract_from_header("Bearer abc123"), Some("abc123"));
        assert_eq!(TokenCodec::extract_from_header("bearer abc123"), Some("abc123"));
        assert_eq!(TokenCodec::extract_from_header("BEARER abc123"), Some("abc123"));
        assert_eq!(TokenCodec::extract_from_header("abc123"), None);
        assert_eq!(TokenCodec::extract_from_header("Basic abc123"), None);
        assert_eq!(TokenCodec::extract_from_header("Bearer "), None);
    }

    #[test]
    fn test_hex_secret() {
        let hex_secret = TokenCodec::generate_hex_secret();
        assert_eq!(hex_secret.len(), 64);

        let codec = TokenCodec::from_hex_secret(&hex_secret, Duration::from_secs(60)).unwrap();
        let (token, _) = codec.sign(7, "test", UserRole::User).unwrap();
        assert!(codec.verify(&token).is_ok());

        assert!(TokenCodec::from_hex_secret("zz", Duration::from_secs(60)).is_err());
    }

    #[test]
    fn test_refresh_tokens_are_opaque_and_hashed() {
        let a = new_refresh_token();
        let b = new_refresh_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);

        let digest = refresh_token_digest(&a);
        assert_eq!(digest, refresh_token_digest(&a));
        assert_ne!(digest, a);
        assert_ne!(digest, refresh_token_digest(&b));
    }
}
