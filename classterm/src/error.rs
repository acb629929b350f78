//! Error types for classterm.
//!
//! Each domain error is recovered at the dispatcher boundary and turned into a
//! redirect; none of them is fatal to the process.

use thiserror::Error;

/// Login failure.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credential record for this username.
    #[error("Unknown user: {0}")]
    UnknownUser(String),

    /// Record exists but the password does not match.
    #[error("Bad password for user: {0}")]
    BadPassword(String),

    /// Credential store could not be read or written.
    #[error("Credential store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// Registration failure.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// Username already present in the credential store.
    #[error("User already exists: {0}")]
    UserExists(String),

    /// Password argument empty or absent.
    #[error("Missing password")]
    MissingPassword,

    /// Username is empty or contains non-word characters.
    #[error("Invalid username: {0:?}")]
    InvalidUsername(String),

    /// Credential store could not be read or written.
    #[error("Credential store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// Session directory failure.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The admin identity never owns a terminal of its own.
    #[error("Admin identity has no terminal session")]
    AdminHasNoSession,

    /// Terminal multiplexer refused to create another terminal.
    #[error("Capacity exceeded: max {0} terminals")]
    CapacityExceeded(usize),

    /// Terminal process could not be started.
    #[error("Failed to spawn terminal: {0}")]
    Spawn(String),
}

/// Terminal multiplexer failure.
#[derive(Debug, Error)]
pub enum MuxError {
    /// Global terminal limit reached.
    #[error("Capacity exceeded: max {0} terminals")]
    CapacityExceeded(usize),

    /// PTY open or command spawn failed.
    #[error("Spawn failed: {0}")]
    Spawn(String),

    /// No running terminal with this name.
    #[error("Terminal not running: {0}")]
    NotRunning(String),
}

impl From<MuxError> for DirectoryError {
    fn from(err: MuxError) -> Self {
        match err {
            MuxError::CapacityExceeded(max) => DirectoryError::CapacityExceeded(max),
            MuxError::Spawn(msg) => DirectoryError::Spawn(msg),
            MuxError::NotRunning(name) => DirectoryError::Spawn(format!("{name} is not running")),
        }
    }
}
