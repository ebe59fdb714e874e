//! Serve command - run the API server.

use std::path::PathBuf;

use anyhow::Result;
use marquee_gateway::{Gateway, GatewayConfig};

use crate::ui;

/// Serve command arguments.
#[derive(Debug, Clone, Default)]
pub struct ServeArgs {
    /// Config file override.
    pub config: Option<PathBuf>,
    /// Port override.
    pub port: Option<u16>,
    /// Bind address override.
    pub bind: Option<String>,
}

/// Start the server and run until Ctrl-C.
///
/// # Errors
///
/// Returns error if config is invalid or the server fails.
pub async fn run_serve(args: ServeArgs) -> Result<()> {
    let config = super::load_config(args.config.as_deref())?;
    let gateway_config = apply_overrides(GatewayConfig::from(&config), &args);

    ui::header("Starting Marquee");
    ui::kv(
        "Address",
        &format!("{}:{}", gateway_config.bind_address, gateway_config.port),
    );
    ui::kv("Data", &gateway_config.data_dir.display().to_string());
    ui::kv(
        "Registration",
        if gateway_config.auth.allow_registration {
            "open"
        } else {
            "closed"
        },
    );
    if gateway_config.auth.jwt_secret.is_none() {
        ui::warning("No signing secret configured; sessions will not survive a restart");
        ui::info("Generate one with: marquee secret");
    }
    println!();
    ui::info("Press Ctrl+C to stop");
    println!();

    let gateway = Gateway::new(gateway_config)?;
    gateway.run().await?;

    Ok(())
}

fn apply_overrides(mut config: GatewayConfig, args: &ServeArgs) -> GatewayConfig {
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bind) = &args.bind {
        config.bind_address.clone_from(bind);
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = ServeArgs {
            port: Some(9001),
            bind: Some("0.0.0.0".to_string()),
            ..ServeArgs::default()
        };

        let config = apply_overrides(GatewayConfig::default(), &args);
        assert_eq!(config.port, 9001);
        assert_eq!(config.bind_address, "0.0.0.0");

        let untouched = apply_overrides(GatewayConfig::default(), &ServeArgs::default());
        assert_eq!(untouched.port, 8096);
    }
}
