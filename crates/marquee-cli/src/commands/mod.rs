//! CLI command implementations.

pub mod secret;
pub mod serve;
pub mod user;

pub use secret::run_secret;
pub use serve::run_serve;
pub use user::run_user;

use std::path::Path;

use anyhow::Context;
use marquee_core::Config;

/// Load config from `path`, or the default location, then apply env overrides.
///
/// # Errors
///
/// Returns error if an explicit file is missing or any file fails to parse.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load_default().context("Failed to load config")?,
    };

    Ok(config.with_env_overrides())
}
