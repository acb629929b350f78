//! Session directory: which student owns which terminal.
//!
//! Holds lookup entries only (name and transport path); the terminal
//! processes belong to the multiplexer. Entries are created once per
//! username and never removed.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

use crate::error::DirectoryError;
use crate::identity::{Identity, terminal_name_for, transport_path_for};
use crate::multiplexer::TerminalMultiplexer;

/// Directory entry for a student's terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalSession {
    /// Terminal name, derived one-to-one from the owner
    pub name: String,

    /// Username of the owning student
    pub owner: String,

    /// Websocket path streaming this terminal
    pub transport_path: String,

    pub created_at: DateTime<Utc>,

    /// Creation order
    seq: u64,
}

/// Per-username cell; initialized exactly once even under concurrent requests
type Slot = Arc<OnceCell<TerminalSession>>;

/// Registry of terminal sessions keyed by username.
pub struct SessionDirectory {
    multiplexer: Arc<dyn TerminalMultiplexer>,
    entries: RwLock<HashMap<String, Slot>>,
    next_seq: AtomicU64,
}

impl SessionDirectory {
    pub fn new(multiplexer: Arc<dyn TerminalMultiplexer>) -> Self {
        Self {
            multiplexer,
            entries: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn multiplexer(&self) -> &Arc<dyn TerminalMultiplexer> {
        &self.multiplexer
    }

    /// Return the student's session, creating its terminal on first use.
    ///
    /// Concurrent calls for one username wait on the same creation. If
    /// creation fails nothing is recorded and the next call retries.
    pub async fn get_or_create(
        &self,
        identity: &Identity,
    ) -> Result<TerminalSession, DirectoryError> {
        if identity.is_admin() {
            return Err(DirectoryError::AdminHasNoSession);
        }
        let username = identity.username();

        let slot = {
            let mut entries = self.entries.write().await;
            entries.entry(username.to_string()).or_default().clone()
        };

        let session = slot
            .get_or_try_init(|| async {
                let name = terminal_name_for(username);
                if let Err(e) = self.multiplexer.create(&name).await {
                    warn!(username = %username, terminal = %name, "Terminal creation failed: {e}");
                    return Err(DirectoryError::from(e));
                }

                let session = TerminalSession {
                    transport_path: transport_path_for(&name),
                    name,
                    owner: username.to_string(),
                    created_at: Utc::now(),
                    seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                };
                info!(
                    username = %username,
                    terminal = %session.name,
                    "Terminal session created"
                );
                Ok(session)
            })
            .await?;

        debug!(username = %username, terminal = %session.name, "Terminal session resolved");
        Ok(session.clone())
    }

    /// All sessions in creation order. Re-reads the table on every call.
    pub async fn list_all(&self) -> Vec<TerminalSession> {
        let entries = self.entries.read().await;
        let mut sessions: Vec<TerminalSession> =
            entries.values().filter_map(|slot| slot.get().cloned()).collect();
        sessions.sort_by_key(|s| s.seq);
        sessions
    }

    pub async fn lookup(&self, username: &str) -> Option<TerminalSession> {
        let entries = self.entries.read().await;
        entries.get(username).and_then(|slot| slot.get().cloned())
    }

}
