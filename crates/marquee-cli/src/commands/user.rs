//! User management commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use marquee_core::AuthConfig;
use marquee_gateway::auth::{
    Argon2Hasher, AuthService, PublicUser, SledCredentialStore, TokenCodec, UserRole,
    setup::generate_password,
};

use crate::ui;

/// Arguments for user commands.
#[derive(Debug)]
pub struct UserArgs {
    /// Config file override.
    pub config: Option<PathBuf>,
    /// The action to perform.
    pub action: UserAction,
}

/// User actions.
#[derive(Debug)]
pub enum UserAction {
    /// Create a new user.
    Create {
        username: String,
        email: String,
        password: Option<String>,
        role: String,
        generate_password: bool,
    },
    /// List all users.
    List { json: bool },
}

/// Run a user command against the local credential store.
///
/// # Errors
///
/// Returns error if the store cannot be opened or the operation fails.
pub async fn run_user(args: UserArgs) -> Result<()> {
    let config = super::load_config(args.config.as_deref())?;
    let auth = open_service(config.auth, &config.server.data_dir())?;

    match args.action {
        UserAction::Create {
            username,
            email,
            password,
            role,
            generate_password,
        } => {
            create_user(
                &auth,
                &username,
                &email,
                password.as_deref(),
                &role,
                generate_password,
            )
            .await
        }
        UserAction::List { json } => list_users(&auth, json).await,
    }
}

/// Open the store without a long-lived signing secret; no tokens are issued here.
fn open_service(config: AuthConfig, data_dir: &Path) -> Result<AuthService> {
    std::fs::create_dir_all(data_dir)?;
    let store = SledCredentialStore::open(data_dir).with_context(|| {
        format!(
            "Failed to open credential store at {} (is the server running?)",
            data_dir.display()
        )
    })?;
    let codec = TokenCodec::new(&TokenCodec::generate_secret(), config.access_token_ttl());

    Ok(AuthService::new(
        config,
        codec,
        Arc::new(store),
        Arc::new(Argon2Hasher::new()),
    ))
}

async fn create_user(
    auth: &AuthService,
    username: &str,
    email: &str,
    password: Option<&str>,
    role: &str,
    generate: bool,
) -> Result<()> {
    let role: UserRole = role
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid role: {role}. Use: admin or user"))?;

    let password = match (password, generate) {
        (_, true) => {
            let pwd = generate_password(20);
            ui::success(&format!("Generated password: {pwd}"));
            pwd
        }
        (Some(pwd), false) => pwd.to_string(),
        (None, false) => {
            anyhow::bail!("Password required. Use --password or --generate-password")
        }
    };

    let user = auth
        .create_user(username, email, &password, role)
        .await
        .context("Failed to create user")?;
    tracing::info!(user_id = user.id, role = %user.role, "user created from cli");

    ui::success(&format!(
        "Created user '{}' (id {}) with role '{}'",
        user.username, user.id, user.role
    ));

    Ok(())
}

async fn list_users(auth: &AuthService, json: bool) -> Result<()> {
    let users = auth.list_users().await.context("Failed to list users")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&users)?);
        return Ok(());
    }

    if users.is_empty() {
        ui::info("No users yet.");
        ui::info("Run 'marquee user create --username admin --email admin@example.com --role admin --generate-password'.");
        return Ok(());
    }

    ui::info(&format!("Users ({}):", users.len()));
    println!();
    for line in user_table(&users) {
        println!("{line}");
    }

    Ok(())
}

fn user_table(users: &[PublicUser]) -> Vec<String> {
    let mut lines = vec![
        format!(
            "{:<6} {:<20} {:<28} {:<6} {:<20}",
            "ID", "USERNAME", "EMAIL", "ROLE", "LAST LOGIN"
        ),
        "-".repeat(84),
    ];

    for user in users {
        let last_login = user.last_login.map_or_else(
            || "never".to_string(),
            |t| t.format("%Y-%m-%d %H:%M").to_string(),
        );
        lines.push(format!(
            "{:<6} {:<20} {:<28} {:<6} {:<20}",
            user.id, user.username, user.email, user.role, last_login
        ));
    }

    lines
}
