//! Configuration loading and validation.
//!
//! Config is JSON5 so operators can keep comments in it.
//! Config location: `~/.marquee/marquee.json`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Longest accepted access-token lifetime (one day).
pub const MAX_ACCESS_TOKEN_MINUTES: u64 = 24 * 60;
/// Longest accepted refresh-token lifetime.
pub const MAX_REFRESH_TOKEN_DAYS: u64 = 365;
/// Longest accepted session sweep interval (one week).
pub const MAX_SESSION_SWEEP_MINUTES: u64 = 7 * 24 * 60;
/// Longest accepted rate-limit window (one day).
pub const MAX_WINDOW_SECS: u64 = 24 * 3600;
/// Longest accepted request deadline.
pub const MAX_REQUEST_TIMEOUT_SECS: u64 = 3600;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON5 parsing error.
    #[error("Parse error: {0}")]
    Parse(#[from] json5::Error),

    /// Config validation error.
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Authentication settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Per-route-group rate limit policies.
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// # Errors
    ///
    /// Returns error if config cannot be loaded or parsed.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path.
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = json5::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a path.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or file write fails.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config file path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        Self::state_dir().join("marquee.json")
    }

    /// Get the Marquee state directory.
    ///
    /// Uses `MARQUEE_STATE_DIR` env var if set, otherwise `~/.marquee`.
    #[must_use]
    pub fn state_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("MARQUEE_STATE_DIR") {
            PathBuf::from(dir)
        } else if let Some(home) = dirs::home_dir() {
            home.join(".marquee")
        } else {
            PathBuf::from(".marquee")
        }
    }

    /// Apply environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        self.auth = self.auth.with_env_overrides();
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Validation("Server port cannot be 0".to_string()));
        }

        check_range(
            "server.requestTimeoutSecs",
            self.server.request_timeout_secs,
            MAX_REQUEST_TIMEOUT_SECS,
        )?;
        check_range(
            "auth.accessTokenMinutes",
            self.auth.access_token_minutes,
            MAX_ACCESS_TOKEN_MINUTES,
        )?;
        check_range(
            "auth.refreshTokenDays",
            self.auth.refresh_token_days,
            MAX_REFRESH_TOKEN_DAYS,
        )?;
        check_range(
            "auth.sessionSweepMinutes",
            self.auth.session_sweep_minutes,
            MAX_SESSION_SWEEP_MINUTES,
        )?;

        if let Some(secret) = &self.auth.jwt_secret {
            if secret.len() < 32 || !secret.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(ConfigError::Validation(
                    "jwtSecret must be at least 16 hex-encoded bytes".to_string(),
                ));
            }
        }

        for (name, policy) in self.rate_limits.named() {
            if policy.requests == 0 {
                return Err(ConfigError::Validation(format!(
                    "Rate limit policy '{name}' needs non-zero requests"
                )));
            }
            check_range(
                &format!("rateLimits.{name}.windowSecs"),
                policy.window_secs,
                MAX_WINDOW_SECS,
            )?;
        }

        Ok(())
    }
}

fn check_range(field: &str, value: u64, max: u64) -> Result<(), ConfigError> {
    if value == 0 || value > max {
        return Err(ConfigError::Validation(format!(
            "{field} must be between 1 and {max}, got {value}"
        )));
    }
    Ok(())
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bind address.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Data directory for the credential store. Defaults to `<state_dir>/data`.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Per-request deadline in seconds.
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            data_dir: None,
            request_timeout_secs: default_timeout(),
        }
    }
}

impl ServerConfig {
    /// Resolved data directory.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| Config::state_dir().join("data"))
    }

    /// Request deadline as a Duration.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

const fn default_port() -> u16 {
    8096
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

const fn default_timeout() -> u64 {
    30
}

const fn default_true() -> bool {
    true
}

/// Default access token lifetime in minutes.
const DEFAULT_ACCESS_TOKEN_MINUTES: u64 = 60;
/// Default refresh token lifetime in days.
const DEFAULT_REFRESH_TOKEN_DAYS: u64 = 30;
/// Default minimum password length.
const DEFAULT_MIN_PASSWORD_LENGTH: usize = 8;
/// Default interval between expired-session sweeps, in minutes.
const DEFAULT_SESSION_SWEEP_MINUTES: u64 = 60;

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// Token signing secret (hex-encoded). Generated at startup if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,

    /// Access token lifetime in minutes.
    #[serde(default = "default_access_token_minutes")]
    pub access_token_minutes: u64,

    /// Refresh token lifetime in days.
    #[serde(default = "default_refresh_token_days")]
    pub refresh_token_days: u64,

    /// Minimum accepted password length (characters).
    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,

    /// Treat usernames differing only in case as the same account.
    #[serde(default = "default_true")]
    pub case_insensitive_usernames: bool,

    /// Whether self-registration is open.
    #[serde(default = "default_true")]
    pub allow_registration: bool,

    /// Give the admin role to the first account ever registered.
    #[serde(default = "default_true")]
    pub first_user_admin: bool,

    /// Interval between expired-session sweeps, in minutes.
    #[serde(default = "default_session_sweep_minutes")]
    pub session_sweep_minutes: u64,
}

const fn default_access_token_minutes() -> u64 {
    DEFAULT_ACCESS_TOKEN_MINUTES
}

const fn default_refresh_token_days() -> u64 {
    DEFAULT_REFRESH_TOKEN_DAYS
}

const fn default_min_password_length() -> usize {
    DEFAULT_MIN_PASSWORD_LENGTH
}

const fn default_session_sweep_minutes() -> u64 {
    DEFAULT_SESSION_SWEEP_MINUTES
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            access_token_minutes: default_access_token_minutes(),
            refresh_token_days: default_refresh_token_days(),
            min_password_length: default_min_password_length(),
            case_insensitive_usernames: default_true(),
            allow_registration: default_true(),
            first_user_admin: default_true(),
            session_sweep_minutes: default_session_sweep_minutes(),
        }
    }
}

impl AuthConfig {
    /// Create a new auth config builder.
    #[must_use]
    pub fn builder() -> AuthConfigBuilder {
        AuthConfigBuilder::default()
    }

    /// Access token lifetime.
    #[must_use]
    pub const fn access_token_ttl(&self) -> Duration {
        Duration::from_secs(self.access_token_minutes.saturating_mul(60))
    }

    /// Refresh token lifetime.
    #[must_use]
    pub const fn refresh_token_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_token_days.saturating_mul(24 * 3600))
    }

    /// Expired-session sweep interval.
    #[must_use]
    pub const fn session_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.session_sweep_minutes.saturating_mul(60))
    }

    /// Load overrides from environment variables.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(secret) = std::env::var("MARQUEE_JWT_SECRET") {
            if !secret.is_empty() {
                self.jwt_secret = Some(secret);
            }
        }

        if let Ok(value) = std::env::var("MARQUEE_ALLOW_REGISTRATION") {
            self.allow_registration = value == "1" || value.eq_ignore_ascii_case("true");
        }

        self
    }
}

/// Builder for `AuthConfig`.
#[derive(Debug, Default)]
pub struct AuthConfigBuilder {
    config: AuthConfig,
}

impl AuthConfigBuilder {
    /// Set the signing secret (hex).
    #[must_use]
    pub fn jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.jwt_secret = Some(secret.into());
        self
    }

    /// Set access token lifetime in minutes.
    #[must_use]
    pub const fn access_token_minutes(mut self, minutes: u64) -> Self {
        self.config.access_token_minutes = minutes;
        self
    }

    /// Set refresh token lifetime in days.
    #[must_use]
    pub const fn refresh_token_days(mut self, days: u64) -> Self {
        self.config.refresh_token_days = days;
        self
    }

    /// Set the minimum password length.
    #[must_use]
    pub const fn min_password_length(mut self, len: usize) -> Self {
        self.config.min_password_length = len;
        self
    }

    /// Set the username case policy.
    #[must_use]
    pub const fn case_insensitive_usernames(mut self, enabled: bool) -> Self {
        self.config.case_insensitive_usernames = enabled;
        self
    }

    /// Open or close self-registration.
    #[must_use]
    pub const fn allow_registration(mut self, allowed: bool) -> Self {
        self.config.allow_registration = allowed;
        self
    }

    /// Set whether the first account becomes admin.
    #[must_use]
    pub const fn first_user_admin(mut self, enabled: bool) -> Self {
        self.config.first_user_admin = enabled;
        self
    }

    /// Build the config.
    #[must_use]
    pub fn build(self) -> AuthConfig {
        self.config
    }
}

/// A `{requests, window}` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitPolicy {
    /// Requests admitted per window.
    pub requests: u32,
    /// Window length in seconds.
    pub window_secs: u64,
}

impl RateLimitPolicy {
    /// Create a policy.
    #[must_use]
    pub const fn new(requests: u32, window_secs: u64) -> Self {
        Self {
            requests,
            window_secs,
        }
    }

    /// Window length as a Duration.
    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Rate limit policies per route group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    /// Login, registration and token endpoints.
    #[serde(default = "default_auth_policy")]
    pub auth: RateLimitPolicy,

    /// Search endpoints.
    #[serde(default = "default_search_policy")]
    pub search: RateLimitPolicy,

    /// Everything else under `/api`.
    #[serde(default = "default_api_policy")]
    pub api: RateLimitPolicy,
}

const fn default_auth_policy() -> RateLimitPolicy {
    RateLimitPolicy::new(10, 60)
}

const fn default_search_policy() -> RateLimitPolicy {
    RateLimitPolicy::new(60, 60)
}

const fn default_api_policy() -> RateLimitPolicy {
    RateLimitPolicy::new(300, 60)
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            auth: default_auth_policy(),
            search: default_search_policy(),
            api: default_api_policy(),
        }
    }
}

impl RateLimitConfig {
    /// Policies paired with their config names.
    #[must_use]
    pub const fn named(&self) -> [(&'static str, RateLimitPolicy); 3] {
        [("auth", self.auth), ("search", self.search), ("api", self.api)]
    }
}
