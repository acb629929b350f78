//! classterm - Main entry point
//!
//! Serves one persistent tmux-backed terminal per student over the browser,
//! plus an admin overview of every active terminal.

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Level, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use classterm::auth::{AuthGate, generate_secret};
use classterm::config::{self, Config};
use classterm::credentials::{CredentialRepository, JsonCredentialStore};
use classterm::server::{ServerConfig, run_server};

/// classterm - Persistent per-student browser terminals
#[derive(Parser)]
#[command(name = "classterm")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value_os_t = Config::default_path())]
    config: PathBuf,

    /// Data directory for credentials, logs and the cookie secret
    #[arg(short, long, default_value_os_t = Config::default_data_dir())]
    data_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the terminal server
    Serve {
        /// Password for the `admin` user (written on every start)
        #[arg(short = 'p', long, env = "CLASSTERM_ADMIN_PASSWORD", hide_env_values = true)]
        admin_password: String,

        /// Address to listen on (overrides config)
        #[arg(long)]
        listen: Option<SocketAddr>,

        /// Credential JSON file (overrides config)
        #[arg(long)]
        database: Option<PathBuf>,
    },

    /// Student account management
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Generate a default configuration file
    InitConfig {
        /// Output path (defaults to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Register a student account
    Add {
        /// Username (letters, digits, underscore)
        username: String,

        /// Password for the account
        #[arg(long)]
        password: String,
    },

    /// List accounts
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    match cli.command {
        Commands::Serve {
            admin_password,
            listen,
            database,
        } => {
            // For daemon mode: log to both stdout and file with rotation
            init_daemon_logging(&cli.data_dir, filter)?;
            serve(&cli.config, &cli.data_dir, admin_password, listen, database).await
        }
        Commands::User { command } => {
            init_cli_logging(filter);
            handle_user_command(command, &cli.config, &cli.data_dir).await
        }
        Commands::InitConfig { output } => {
            init_cli_logging(filter);
            generate_config(output)
        }
    }
}

/// Initialize logging for CLI commands (stdout only).
fn init_cli_logging(filter: EnvFilter) {
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}

/// Initialize logging for daemon mode (stdout + rotating file).
fn init_daemon_logging(data_dir: &Path, filter: EnvFilter) -> Result<()> {
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

    // Daily rotating file (e.g., classterm.2026-01-15.log)
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("classterm")
        .filename_suffix("log")
        .build(&log_dir)
        .with_context(|| "Failed to create log file appender")?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // The writer must outlive every log call for the life of the daemon
    std::mem::forget(guard);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false)) // stdout
        .with(fmt::layer().with_target(true).with_ansi(false).with_writer(non_blocking)) // file
        .init();

    info!("Logging to: {}", log_dir.display());
    Ok(())
}

/// Run the terminal server
async fn serve(
    config_path: &Path,
    data_dir: &Path,
    admin_password: String,
    listen_override: Option<SocketAddr>,
    database_override: Option<PathBuf>,
) -> Result<()> {
    ensure_data_dir(data_dir)?;

    if admin_password.is_empty() {
        return Err(anyhow!("Admin password must not be empty"));
    }

    let config = Config::load(config_path)?;

    let listen_addr: SocketAddr = match listen_override {
        Some(addr) => addr,
        None => config.server.listen_addr.parse().with_context(|| {
            format!("Invalid listen address in config: {}", config.server.listen_addr)
        })?,
    };

    let server_config = ServerConfig {
        listen_addr,
        credentials_path: database_override.unwrap_or_else(|| config.credentials_path(data_dir)),
        cookie_secret: config.cookie_secret(data_dir)?,
        secure_cookies: config.server.secure_cookies,
        admin_password,
        terminals: config.terminals.multiplexer_config(),
    };

    run_server(server_config).await
}

/// Ensure data directory exists
fn ensure_data_dir(data_dir: &Path) -> Result<()> {
    if !data_dir.exists() {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
        info!("Created data directory: {}", data_dir.display());
    }
    Ok(())
}

/// Handle user subcommands
async fn handle_user_command(
    command: UserCommands,
    config_path: &Path,
    data_dir: &Path,
) -> Result<()> {
    let config = Config::load(config_path)?;
    let store = Arc::new(JsonCredentialStore::open(config.credentials_path(data_dir))?);

    match command {
        UserCommands::Add { username, password } => {
            // No cookies are issued here, so a throwaway signing key is enough
            let gate = AuthGate::new(store.clone(), generate_secret(), false)?;
            gate.register(&username, &password).await?;
            println!("User {username} registered in {}", store.path().display());
            Ok(())
        }

        UserCommands::List => {
            let users = store.list().await;
            if users.is_empty() {
                println!("No users registered.");
                return Ok(());
            }

            println!("Users ({}):", users.len());
            for (username, record) in users {
                let remember = match record.remember {
                    Some(true) => "remember",
                    Some(false) => "session",
                    None => "never logged in",
                };
                println!("  {username} ({remember})");
            }
            Ok(())
        }
    }
}

/// Generate a default configuration file
fn generate_config(output: Option<PathBuf>) -> Result<()> {
    let config = config::default_config_template();

    match output {
        Some(path) => {
            std::fs::write(&path, &config)?;
            println!("Configuration written to: {}", path.display());
        }
        None => {
            print!("{config}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_serve() {
        let cli = Cli::try_parse_from([
            "classterm",
            "serve",
            "-p",
            "root-pw",
            "--listen",
            "0.0.0.0:8700",
        ])
        .unwrap();
        match cli.command {
            Commands::Serve {
                admin_password,
                listen,
                database,
            } => {
                assert_eq!(admin_password, "root-pw");
                assert_eq!(listen, Some("0.0.0.0:8700".parse().unwrap()));
                assert!(database.is_none());
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_parse_user_add() {
        let cli = Cli::try_parse_from([
            "classterm",
            "user",
            "add",
            "carol",
            "--password",
            "pw1",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::User {
                command: UserCommands::Add { .. }
            }
        ));
    }
}
