//! # Marquee Core
//!
//! Configuration and input validation shared by the Marquee server crates.
//!
//! This crate provides:
//! - Configuration loading and validation (JSON5 format)
//! - Authentication and rate-limit settings
//! - Registration input validation and normalization

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod validation;

pub use config::{
    AuthConfig, AuthConfigBuilder, Config, ConfigError, RateLimitConfig, RateLimitPolicy,
    ServerConfig,
};
pub use validation::{ValidationError, normalize_email, normalize_username, validate_password};
