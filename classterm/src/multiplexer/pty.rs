//! PTY-backed multiplexer using portable-pty.
//!
//! Each terminal runs the configured command (by default
//! `tmux new-session -A -s {name}`) on its own pseudo-terminal. Three plain
//! threads serve each terminal: an output reader, an input writer that also
//! applies resizes, and a waiter that drops the terminal from the table once
//! its process exits.

use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use async_trait::async_trait;
use bytes::Bytes;
use portable_pty::{CommandBuilder, MasterPty, PtySize, native_pty_system};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use super::{INPUT_QUEUE_CAPACITY, TerminalAttachment, TerminalInput, TerminalMultiplexer};
use crate::error::MuxError;

/// Placeholder in the command template replaced by the terminal name.
pub const NAME_PLACEHOLDER: &str = "{name}";

/// Output chunks kept for replay to newly attached clients
const BACKLOG_CHUNKS: usize = 1000;

/// Broadcast buffer per terminal; slow clients skip ahead when it overflows
const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// Settings for [`PtyMultiplexer`].
#[derive(Debug, Clone)]
pub struct PtyMultiplexerConfig {
    /// Command template; `{name}` is replaced in every argument
    pub command: Vec<String>,
    pub max_terminals: usize,
    pub rows: u16,
    pub cols: u16,
}

impl Default for PtyMultiplexerConfig {
    fn default() -> Self {
        Self {
            command: ["tmux", "new-session", "-A", "-s", NAME_PLACEHOLDER]
                .into_iter()
                .map(String::from)
                .collect(),
            max_terminals: 100,
            rows: 24,
            cols: 80,
        }
    }
}

impl PtyMultiplexerConfig {
    /// Command line for a terminal name.
    pub fn command_for(&self, name: &str) -> Vec<String> {
        self.command
            .iter()
            .map(|arg| arg.replace(NAME_PLACEHOLDER, name))
            .collect()
    }
}

/// Environment for interactive terminals (TUI apps, colors).
fn interactive_env() -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert("TERM".to_string(), "xterm-256color".to_string());
    env.insert("COLORTERM".to_string(), "truecolor".to_string());
    env
}

type Backlog = Arc<Mutex<VecDeque<Bytes>>>;

/// A running terminal as tracked by the table.
struct PtyTerminal {
    /// Distinguishes a restarted terminal from the one it replaced
    id: u64,
    input: mpsc::Sender<TerminalInput>,
    output: broadcast::Sender<Bytes>,
    backlog: Backlog,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Named PTY terminals with a global capacity limit.
pub struct PtyMultiplexer {
    shared: Arc<Shared>,
}

/// State reachable from the blocking spawn task and the waiter threads.
struct Shared {
    config: PtyMultiplexerConfig,
    terminals: Mutex<HashMap<String, PtyTerminal>>,
    next_id: AtomicU64,
}

impl PtyMultiplexer {
    pub fn new(config: PtyMultiplexerConfig) -> Self {
        info!(
            max_terminals = config.max_terminals,
            command = ?config.command,
            "Terminal multiplexer ready"
        );
        Self {
            shared: Arc::new(Shared {
                config,
                terminals: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }
}

impl Shared {
    /// Start the terminal unless it is running. Forks, so callers run this
    /// off the async workers.
    fn create_blocking(self: &Arc<Self>, name: &str) -> Result<(), MuxError> {
        let mut terminals = lock(&self.terminals);
        if terminals.contains_key(name) {
            return Ok(());
        }

        let max = self.config.max_terminals;
        if terminals.len() >= max {
            warn!(terminal = %name, max, "Terminal capacity reached");
            return Err(MuxError::CapacityExceeded(max));
        }

        let terminal = self.spawn_terminal(name)?;
        terminals.insert(name.to_string(), terminal);

        info!(terminal = %name, running = terminals.len(), "Terminal started");
        Ok(())
    }

    fn spawn_terminal(self: &Arc<Self>, name: &str) -> Result<PtyTerminal, MuxError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: self.config.rows,
                cols: self.config.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| MuxError::Spawn(format!("Failed to open PTY: {e}")))?;

        let argv = self.config.command_for(name);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| MuxError::Spawn("Terminal command is empty".to_string()))?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(args);
        for (key, value) in interactive_env() {
            cmd.env(key, value);
        }
        if let Some(home) = dirs::home_dir() {
            cmd.cwd(home);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| MuxError::Spawn(format!("Failed to spawn {program}: {e}")))?;
        // Reader sees EOF only once no slave handle remains open
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| MuxError::Spawn(format!("Failed to clone PTY reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| MuxError::Spawn(format!("Failed to take PTY writer: {e}")))?;

        let (input_tx, input_rx) = mpsc::channel::<TerminalInput>(INPUT_QUEUE_CAPACITY);
        let (output_tx, _) = broadcast::channel::<Bytes>(OUTPUT_CHANNEL_CAPACITY);
        let backlog: Backlog = Arc::new(Mutex::new(VecDeque::new()));

        let reader_tx = output_tx.clone();
        let reader_backlog = backlog.clone();
        thread::spawn(move || read_output(reader, reader_tx, reader_backlog));

        let master = pair.master;
        thread::spawn(move || write_input(master, writer, input_rx));

        let shared = Arc::clone(self);
        let terminal_name = name.to_string();
        thread::spawn(move || {
            match child.wait() {
                Ok(status) => {
                    info!(terminal = %terminal_name, code = status.exit_code(), "Terminal exited")
                }
                Err(e) => error!(terminal = %terminal_name, "Failed to wait for terminal: {e}"),
            }
            let mut terminals = lock(&shared.terminals);
            if terminals.get(&terminal_name).is_some_and(|t| t.id == id) {
                terminals.remove(&terminal_name);
            }
        });

        Ok(PtyTerminal {
            id,
            input: input_tx,
            output: output_tx,
            backlog,
        })
    }

    /// Attach to a running terminal.
    fn subscribe(&self, name: &str) -> Result<TerminalAttachment, MuxError> {
        let terminals = lock(&self.terminals);
        let terminal = terminals
            .get(name)
            .ok_or_else(|| MuxError::NotRunning(name.to_string()))?;

        // Snapshot and subscribe under the backlog lock so no chunk is lost
        // or duplicated between the two
        let backlog = lock(&terminal.backlog);
        let attachment = TerminalAttachment {
            backlog: backlog.iter().cloned().collect(),
            input: terminal.input.clone(),
            output: terminal.output.subscribe(),
        };
        drop(backlog);

        debug!(terminal = %name, "Attached to terminal");
        Ok(attachment)
    }
}

#[async_trait]
impl TerminalMultiplexer for PtyMultiplexer {
    async fn create(&self, name: &str) -> Result<(), MuxError> {
        let shared = self.shared.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || shared.create_blocking(&name))
            .await
            .map_err(|e| MuxError::Spawn(format!("Terminal spawn task failed: {e}")))?
    }

    async fn attach(&self, name: &str) -> Result<TerminalAttachment, MuxError> {
        self.create(name).await?;
        self.shared.subscribe(name)
    }

    async fn attach_existing(&self, name: &str) -> Result<TerminalAttachment, MuxError> {
        self.shared.subscribe(name)
    }

    fn running(&self) -> usize {
        lock(&self.shared.terminals).len()
    }

    fn capacity(&self) -> usize {
        self.shared.config.max_terminals
    }
}

/// Read PTY output until EOF, fanning it out to attached clients.
fn read_output(mut reader: Box<dyn Read + Send>, tx: broadcast::Sender<Bytes>, backlog: Backlog) {
    let mut buf = [0u8; 4096];

    loop {
        match reader.read(&mut buf) {
            Ok(0) => {
                debug!("PTY reader got EOF");
                break;
            }
            Ok(n) => {
                let chunk = Bytes::copy_from_slice(&buf[..n]);
                let mut backlog = lock(&backlog);
                if backlog.len() == BACKLOG_CHUNKS {
                    backlog.pop_front();
                }
                backlog.push_back(chunk.clone());
                // No receivers is fine; output still lands in the backlog
                let _ = tx.send(chunk);
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // EIO is how Linux reports a closed PTY
                debug!("PTY read ended: {e}");
                break;
            }
        }
    }
}

/// Apply client input to the PTY until every sender is gone.
fn write_input(
    master: Box<dyn MasterPty + Send>,
    mut writer: Box<dyn Write + Send>,
    mut rx: mpsc::Receiver<TerminalInput>,
) {
    while let Some(input) = rx.blocking_recv() {
        match input {
            TerminalInput::Data(data) => {
                if let Err(e) = writer.write_all(&data) {
                    error!("PTY write error: {e}");
                    break;
                }
                if let Err(e) = writer.flush() {
                    warn!("PTY flush error: {e}");
                }
            }
            TerminalInput::Resize { rows, cols } => {
                let size = PtySize {
                    rows,
                    cols,
                    pixel_width: 0,
                    pixel_height: 0,
                };
                if let Err(e) = master.resize(size) {
                    warn!("Failed to resize PTY: {e}");
                }
            }
        }
    }
}
