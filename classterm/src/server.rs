//! HTTP server startup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::auth::AuthGate;
use crate::credentials::JsonCredentialStore;
use crate::directory::SessionDirectory;
use crate::dispatcher::Dispatcher;
use crate::multiplexer::{PtyMultiplexer, PtyMultiplexerConfig};
use crate::web::{AppState, router};

/// Settings needed to start serving.
pub struct ServerConfig {
    /// Address to listen on
    pub listen_addr: SocketAddr,

    /// Credential file
    pub credentials_path: PathBuf,

    pub cookie_secret: String,

    pub secure_cookies: bool,

    /// Written to the admin record before any request is accepted
    pub admin_password: String,

    pub terminals: PtyMultiplexerConfig,
}

/// Wire the credential store, auth gate, multiplexer and directory together.
pub async fn build_state(config: &ServerConfig) -> Result<Arc<AppState>> {
    let store = Arc::new(JsonCredentialStore::open(&config.credentials_path)?);
    let gate = AuthGate::new(store, &config.cookie_secret, config.secure_cookies)?;
    gate.bootstrap_admin(&config.admin_password)
        .await
        .context("Failed to write admin credentials")?;

    let multiplexer = Arc::new(PtyMultiplexer::new(config.terminals.clone()));
    let directory = SessionDirectory::new(multiplexer);

    let dispatcher = Dispatcher::new(Arc::new(gate), Arc::new(directory));
    Ok(Arc::new(AppState::new(dispatcher)))
}

/// Run the HTTP server until Ctrl-C or SIGTERM.
pub async fn run_server(config: ServerConfig) -> Result<()> {
    let state = build_state(&config).await?;

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;

    info!(
        addr = %config.listen_addr,
        credentials = %config.credentials_path.display(),
        "Starting HTTP server"
    );
    if !config.secure_cookies {
        warn!("Identity cookie is sent without the Secure attribute");
    }

    axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    state
        .dispatcher
        .gate()
        .store()
        .persist()
        .await
        .context("Failed to write credentials on shutdown")?;

    info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialRepository;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_build_state_bootstraps_admin() {
        let temp = TempDir::new().unwrap();
        let config = ServerConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            credentials_path: temp.path().join("db").join("database.json"),
            cookie_secret: "secret".to_string(),
            secure_cookies: false,
            admin_password: "root-pw".to_string(),
            terminals: PtyMultiplexerConfig::default(),
        };

        let state = build_state(&config).await.unwrap();
        let gate = state.dispatcher.gate();
        assert!(gate.store().get("admin").await.is_some());
        assert!(gate.login("admin", "root-pw", false).await.is_ok());
        assert!(config.credentials_path.exists());
    }
}
