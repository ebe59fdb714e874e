//! Registration input validation and normalization.
//!
//! Usernames and emails are normalized before they reach the credential
//! store, so uniqueness checks compare like with like.

use thiserror::Error;
use unicode_normalization::UnicodeNormalization;
use validator::ValidateEmail;

/// Validation error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Username is outside the allowed length.
    #[error("Username must be between {min} and {max} characters")]
    UsernameLength {
        /// Minimum length.
        min: usize,
        /// Maximum length.
        max: usize,
    },

    /// Username contains characters outside `[A-Za-z0-9_.-]`.
    #[error("Username may only contain letters, digits, '_', '.' and '-'")]
    UsernameChars,

    /// Email address is malformed.
    #[error("Invalid email address")]
    InvalidEmail,

    /// Password shorter than the configured minimum.
    #[error("Password must be at least {min} characters")]
    PasswordTooShort {
        /// Configured minimum.
        min: usize,
    },

    /// Password longer than the hard cap.
    #[error("Password exceeds maximum length ({max} bytes)")]
    PasswordTooLong {
        /// Maximum allowed bytes.
        max: usize,
    },
}

/// Size limits for credential inputs.
pub mod limits {
    /// Minimum username length.
    pub const MIN_USERNAME_LENGTH: usize = 3;

    /// Maximum username length.
    pub const MAX_USERNAME_LENGTH: usize = 32;

    /// Maximum password size. Bounds hashing cost per request.
    pub const MAX_PASSWORD_BYTES: usize = 1024;

    /// Maximum email length (RFC 5321 path limit).
    pub const MAX_EMAIL_LENGTH: usize = 254;
}

/// Validate and normalize a username.
///
/// Applies NFKC normalization and trims surrounding whitespace, then checks
/// length and character set. Returns the display form; callers derive the
/// lookup key from it according to the configured case policy.
///
/// # Errors
///
/// Returns `UsernameLength` or `UsernameChars`.
pub fn normalize_username(input: &str) -> Result<String, ValidationError> {
    let normalized: String = input.trim().nfkc().collect();
    let len = normalized.chars().count();

    if !(limits::MIN_USERNAME_LENGTH..=limits::MAX_USERNAME_LENGTH).contains(&len) {
        return Err(ValidationError::UsernameLength {
            min: limits::MIN_USERNAME_LENGTH,
            max: limits::MAX_USERNAME_LENGTH,
        });
    }

    if !normalized
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(ValidationError::UsernameChars);
    }

    Ok(normalized)
}

/// Validate and normalize an email address (trimmed, lowercased).
///
/// # Errors
///
/// Returns `InvalidEmail` if the address is malformed.
pub fn normalize_email(input: &str) -> Result<String, ValidationError> {
    let email = input.trim().to_lowercase();

    if email.len() > limits::MAX_EMAIL_LENGTH || !email.as_str().validate_email() {
        return Err(ValidationError::InvalidEmail);
    }

    Ok(email)
}

/// Check a password against the length policy.
///
/// # Errors
///
/// Returns `PasswordTooShort` or `PasswordTooLong`.
pub fn validate_password(password: &str, min_len: usize) -> Result<(), ValidationError> {
    if password.len() > limits::MAX_PASSWORD_BYTES {
        return Err(ValidationError::PasswordTooLong {
            max: limits::MAX_PASSWORD_BYTES,
        });
    }

    if password.chars().count() < min_len {
        return Err(ValidationError::PasswordTooShort { min: min_len });
    }

    Ok(())
}
