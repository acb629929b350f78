//! Credential store: username -> {password hash, remember flag}.
//!
//! The store is read fully into memory on open and rewritten wholesale on
//! every mutation. All mutations go through one async mutex, so concurrent
//! read-modify-write cycles (two registrations for the same name, a login
//! saving its remember flag) never lose updates.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// A stored credential record.
///
/// Field names match the on-disk form: `{"psw": ..., "remember": ...}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Argon2 PHC string. Never plaintext.
    #[serde(rename = "psw", default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,

    /// Last "remember me" choice; unset until the first login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remember: Option<bool>,
}

/// Repository interface for credential records.
///
/// Every mutating method is atomic with respect to the whole store and
/// persists before returning.
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Look up a record.
    async fn get(&self, username: &str) -> Option<CredentialRecord>;

    /// All records, ordered by username.
    async fn list(&self) -> Vec<(String, CredentialRecord)>;

    /// Insert a record only if the username is absent.
    ///
    /// Returns `false` (and changes nothing) if the username already exists.
    async fn insert_new(&self, username: &str, record: CredentialRecord) -> Result<bool>;

    /// Create or replace the password hash for a username.
    async fn set_password(&self, username: &str, password_hash: String) -> Result<()>;

    /// Create or replace the remember flag for a username.
    async fn set_remember(&self, username: &str, remember: bool) -> Result<()>;

    /// Rewrite the backing storage from the in-memory state.
    async fn persist(&self) -> Result<()>;
}

/// JSON flat-file credential store.
pub struct JsonCredentialStore {
    /// Path to the JSON file
    path: PathBuf,
    /// In-memory state (username -> record)
    users: Mutex<BTreeMap<String, CredentialRecord>>,
}

impl JsonCredentialStore {
    /// Open the store, loading the file if it exists.
    ///
    /// A missing file is an empty store. A file that exists but cannot be
    /// parsed is an error: overwriting it would silently drop every account.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let users = Self::load_from_file(&path)?;

        info!(
            path = %path.display(),
            users = users.len(),
            "Credential store loaded"
        );

        Ok(Self {
            path,
            users: Mutex::new(users),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_file(path: &Path) -> Result<BTreeMap<String, CredentialRecord>> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read credential store: {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse credential store: {}", path.display()))
    }

    fn write_file(&self, users: &BTreeMap<String, CredentialRecord>) -> Result<()> {
        let content =
            serde_json::to_string_pretty(users).context("Failed to serialize credential store")?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create credential directory: {}", parent.display())
            })?;
        }

        // Write-then-rename so a crash never leaves a truncated file behind
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)
            .with_context(|| format!("Failed to write credential store: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path).with_context(|| {
            format!("Failed to replace credential store: {}", self.path.display())
        })?;

        debug!(users = users.len(), "Saved credential store");
        Ok(())
    }

    /// Apply `change` to a copy of the state, persist it, then commit.
    ///
    /// The in-memory state is left untouched if the write fails.
    async fn mutate<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, CredentialRecord>) + Send,
    {
        let mut users = self.users.lock().await;
        let mut next = users.clone();
        change(&mut next);
        self.write_file(&next)?;
        *users = next;
        Ok(())
    }
}

#[async_trait]
impl CredentialRepository for JsonCredentialStore {
    async fn get(&self, username: &str) -> Option<CredentialRecord> {
        let users = self.users.lock().await;
        users.get(username).cloned()
    }

    async fn list(&self) -> Vec<(String, CredentialRecord)> {
        let users = self.users.lock().await;
        users
            .iter()
            .map(|(name, record)| (name.clone(), record.clone()))
            .collect()
    }

    async fn insert_new(&self, username: &str, record: CredentialRecord) -> Result<bool> {
        let mut users = self.users.lock().await;
        if users.contains_key(username) {
            return Ok(false);
        }

        let mut next = users.clone();
        next.insert(username.to_string(), record);
        self.write_file(&next)?;
        *users = next;
        Ok(true)
    }

    async fn set_password(&self, username: &str, password_hash: String) -> Result<()> {
        self.mutate(|users| {
            users.entry(username.to_string()).or_default().password_hash = Some(password_hash);
        })
        .await
    }

    async fn set_remember(&self, username: &str, remember: bool) -> Result<()> {
        self.mutate(|users| {
            users.entry(username.to_string()).or_default().remember = Some(remember);
        })
        .await
    }

    async fn persist(&self) -> Result<()> {
        let users = self.users.lock().await;
        self.write_file(&users)
    }
}
