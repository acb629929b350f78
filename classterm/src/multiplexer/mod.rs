//! Terminal Multiplexer contract.
//!
//! A multiplexer owns named terminal processes. The session directory only
//! asks it to create a terminal for a name; the websocket transport attaches
//! to a terminal by name to stream its I/O.

mod pty;

pub use pty::{PtyMultiplexer, PtyMultiplexerConfig};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};

use crate::error::MuxError;

/// Pending input frames per terminal. Senders wait once it is full.
pub const INPUT_QUEUE_CAPACITY: usize = 64;

/// Input sent to a terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalInput {
    /// Bytes written to the terminal's stdin
    Data(Bytes),
    /// New window size
    Resize { rows: u16, cols: u16 },
}

/// A live connection to a terminal.
///
/// `output` closes when the terminal process exits.
pub struct TerminalAttachment {
    /// Recent output, replayed to the client before live output
    pub backlog: Vec<Bytes>,
    /// Bounded by [`INPUT_QUEUE_CAPACITY`]
    pub input: mpsc::Sender<TerminalInput>,
    pub output: broadcast::Receiver<Bytes>,
}

/// Creates and attaches named terminals under a global capacity limit.
#[async_trait]
pub trait TerminalMultiplexer: Send + Sync {
    /// Ensure a terminal with this name is running.
    ///
    /// A no-op if one already is. Fails with `CapacityExceeded` when a new
    /// terminal would exceed the limit; running terminals are never evicted.
    async fn create(&self, name: &str) -> Result<(), MuxError>;

    /// Attach to a terminal, restarting it first if its process has exited.
    async fn attach(&self, name: &str) -> Result<TerminalAttachment, MuxError>;

    /// Attach to a terminal only if it is running. Never starts a process.
    async fn attach_existing(&self, name: &str) -> Result<TerminalAttachment, MuxError>;

    /// Number of terminals currently running.
    fn running(&self) -> usize;

    /// Maximum number of concurrently running terminals.
    fn capacity(&self) -> usize;
}
