//! Marquee CLI - run the server and administer accounts.

mod commands;
mod ui;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "marquee")]
#[command(about = "Marquee - self-hosted media server")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Config file (defaults to $MARQUEE_STATE_DIR/marquee.json)
    #[arg(long, global = true, env = "MARQUEE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind address
        #[arg(long)]
        bind: Option<String>,
    },

    /// User management
    User {
        #[command(subcommand)]
        action: UserCommands,
    },

    /// Print a fresh signing secret for `auth.jwtSecret`
    Secret,
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create a new user
    Create {
        /// Username for the new user
        #[arg(long)]
        username: String,

        /// Email address
        #[arg(long)]
        email: String,

        /// Password (or use --generate-password)
        #[arg(long)]
        password: Option<String>,

        /// User role: admin or user
        #[arg(long, default_value = "user")]
        role: String,

        /// Generate a random password
        #[arg(long)]
        generate_password: bool,
    },

    /// List all users
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    match cli.command {
        Commands::Serve { port, bind } => {
            let args = commands::serve::ServeArgs {
                config: cli.config,
                port,
                bind,
            };
            commands::run_serve(args).await?;
        }

        Commands::User { action } => {
            let action = match action {
                UserCommands::Create {
                    username,
                    email,
                    password,
                    role,
                    generate_password,
                } => commands::user::UserAction::Create {
                    username,
                    email,
                    password,
                    role,
                    generate_password,
                },
                UserCommands::List { json } => commands::user::UserAction::List { json },
            };
            commands::run_user(commands::user::UserArgs {
                config: cli.config,
                action,
            })
            .await?;
        }

        Commands::Secret => commands::run_secret(),
    }

    Ok(())
}
