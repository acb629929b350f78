//! Configuration loading for the classterm server.
//!
//! Loads configuration from a TOML file and/or environment variables using
//! figment.
//!
//! # Configuration Sources (in order of priority, lowest to highest)
//!
//! 1. Default values (from `#[serde(default)]` attributes)
//! 2. TOML config file (if it exists)
//! 3. Environment variables (prefix: `CLASSTERM_`, nested with `__`)
//!
//! # Environment Variable Naming
//!
//! - `CLASSTERM_SERVER__LISTEN_ADDR` → `server.listen_addr`
//! - `CLASSTERM_SERVER__SECURE_COOKIES` → `server.secure_cookies`
//! - `CLASSTERM_CREDENTIALS__PATH` → `credentials.path`
//! - `CLASSTERM_TERMINALS__MAX_TERMINALS` → `terminals.max_terminals`
//!
//! The terminal `command` array is best set in the TOML file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::generate_secret;
use crate::multiplexer::PtyMultiplexerConfig;

/// Name of the generated cookie secret file inside the data directory
const COOKIE_SECRET_FILE: &str = "cookie_secret";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub credentials: CredentialsConfig,

    #[serde(default)]
    pub terminals: TerminalsConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Address to listen on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Add the `Secure` attribute to the identity cookie
    #[serde(default)]
    pub secure_cookies: bool,

    /// Cookie signing secret; generated and persisted when unset
    #[serde(default)]
    pub cookie_secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            secure_cookies: false,
            cookie_secret: None,
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:8700".to_string()
}

/// Credential store configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CredentialsConfig {
    /// Path to the JSON credential file (default: `<data_dir>/database.json`)
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Terminal multiplexer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TerminalsConfig {
    /// Maximum number of concurrently running terminals
    #[serde(default = "default_max_terminals")]
    pub max_terminals: usize,

    /// Command template; `{name}` is replaced with the terminal name
    #[serde(default = "default_command")]
    pub command: Vec<String>,

    #[serde(default = "default_rows")]
    pub rows: u16,

    #[serde(default = "default_cols")]
    pub cols: u16,
}

impl Default for TerminalsConfig {
    fn default() -> Self {
        Self {
            max_terminals: default_max_terminals(),
            command: default_command(),
            rows: default_rows(),
            cols: default_cols(),
        }
    }
}

fn default_max_terminals() -> usize {
    PtyMultiplexerConfig::default().max_terminals
}

fn default_command() -> Vec<String> {
    PtyMultiplexerConfig::default().command
}

fn default_rows() -> u16 {
    24
}

fn default_cols() -> u16 {
    80
}

impl TerminalsConfig {
    pub fn multiplexer_config(&self) -> PtyMultiplexerConfig {
        PtyMultiplexerConfig {
            command: self.command.clone(),
            max_terminals: self.max_terminals,
            rows: self.rows,
            cols: self.cols,
        }
    }
}

impl Config {
    /// Load configuration from the file (if present) and the environment.
    ///
    /// # Example
    ///
    /// ```bash
    /// # Override listen address via environment variable
    /// export CLASSTERM_SERVER__LISTEN_ADDR=0.0.0.0:8700
    /// ```
    pub fn load(path: &Path) -> Result<Self> {
        let mut figment = Figment::new();

        if path.exists() {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("CLASSTERM_").split("__"));

        figment.extract().with_context(|| {
            format!(
                "Failed to load config from {} and environment",
                path.display()
            )
        })
    }

    /// Get the default config file path
    /// - macOS: ~/Library/Application Support/classterm/config.toml
    /// - Linux: ~/.config/classterm/config.toml
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("classterm")
            .join("config.toml")
    }

    /// Get the default data directory (credentials, logs, cookie secret)
    /// - macOS: ~/Library/Application Support/classterm/
    /// - Linux: ~/.local/share/classterm/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("classterm")
    }

    /// Credential file path, falling back to the data directory.
    pub fn credentials_path(&self, data_dir: &Path) -> PathBuf {
        self.credentials
            .path
            .clone()
            .unwrap_or_else(|| data_dir.join("database.json"))
    }

    /// Cookie signing secret.
    ///
    /// Uses the configured value if set; otherwise reads
    /// `<data_dir>/cookie_secret`, generating it on first use so sessions
    /// survive restarts.
    pub fn cookie_secret(&self, data_dir: &Path) -> Result<String> {
        if let Some(secret) = &self.server.cookie_secret
            && !secret.is_empty()
        {
            return Ok(secret.clone());
        }

        let path = data_dir.join(COOKIE_SECRET_FILE);
        if path.exists() {
            let secret = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read cookie secret: {}", path.display()))?;
            let secret = secret.trim();
            if !secret.is_empty() {
                return Ok(secret.to_string());
            }
        }

        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
        let secret = generate_secret();
        std::fs::write(&path, &secret)
            .with_context(|| format!("Failed to write cookie secret: {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }

        info!("Generated cookie secret: {}", path.display());
        Ok(secret)
    }
}

/// Create a default configuration template
pub fn default_config_template() -> String {
    let data_dir = Config::default_data_dir();
    let data_dir_str = data_dir.display();

    format!(
        r#"# classterm configuration
# Data directory: {data_dir_str}

[server]
listen_addr = "127.0.0.1:8700"
# Set when serving behind HTTPS
secure_cookies = false
# cookie_secret = "..."  # Optional, generated into {data_dir_str}/cookie_secret

[credentials]
# path = "{data_dir_str}/database.json"  # Optional, defaults to data_dir/database.json

[terminals]
max_terminals = 100
# {{name}} is replaced with the student's username
command = ["tmux", "new-session", "-A", "-s", "{{name}}"]
rows = 24
cols = 80
"#
    )
}
