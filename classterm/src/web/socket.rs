//! Websocket transport for terminal I/O.
//!
//! Frames are JSON arrays. Server to client: `["setup", {}]` once on open,
//! `["stdout", text]` for output, `["disconnect", 1]` when the terminal
//! exits. Client to server: `["stdin", text]` and `["set_size", rows, cols]`.

use std::sync::Arc;

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::AppState;
use crate::directory::SessionDirectory;
use crate::error::{DirectoryError, MuxError};
use crate::identity::Identity;
use crate::multiplexer::{TerminalAttachment, TerminalInput};
use crate::policy::{Access, authorize};

/// Whether the connected client may write to the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Owner: input and resizes are forwarded
    Interactive,
    /// Admin observer: client frames are ignored
    Observe,
}

pub(super) async fn terminal_socket(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(name): Path<String>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(identity) = state.identify(&jar) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    if authorize(&identity, &name) == Access::Denied {
        warn!(
            username = %identity.username(),
            terminal = %name,
            "Terminal socket denied"
        );
        return StatusCode::FORBIDDEN.into_response();
    }

    // Nothing is created or attached for a request that cannot upgrade
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let (mode, attachment) =
        match open_terminal(state.dispatcher.directory(), &identity, &name).await {
            Ok(opened) => opened,
            Err(status) => return status.into_response(),
        };

    upgrade.on_upgrade(move |socket| {
        let (ws_tx, ws_rx) = socket.split();
        stream_terminal(ws_tx, ws_rx, identity, name, mode, attachment)
    })
}

/// Resolve the terminal a socket should stream.
///
/// The owner gets their terminal, started if needed. The admin may only
/// observe a terminal that is recorded in the directory and still running.
async fn open_terminal(
    directory: &SessionDirectory,
    identity: &Identity,
    name: &str,
) -> Result<(Mode, TerminalAttachment), StatusCode> {
    match authorize(identity, name) {
        Access::SelfAccess => {
            let session = directory.get_or_create(identity).await.map_err(|e| match e {
                DirectoryError::CapacityExceeded(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            })?;
            let attachment = directory
                .multiplexer()
                .attach(&session.name)
                .await
                .map_err(|e| attach_status(&session.name, e))?;
            Ok((Mode::Interactive, attachment))
        }
        Access::AdminOverview => {
            let session = directory.lookup(name).await.ok_or(StatusCode::NOT_FOUND)?;
            let attachment = directory
                .multiplexer()
                .attach_existing(&session.name)
                .await
                .map_err(|e| attach_status(&session.name, e))?;
            Ok((Mode::Observe, attachment))
        }
        Access::Denied => Err(StatusCode::FORBIDDEN),
    }
}

fn attach_status(name: &str, err: MuxError) -> StatusCode {
    match err {
        MuxError::CapacityExceeded(_) => StatusCode::SERVICE_UNAVAILABLE,
        MuxError::NotRunning(_) => StatusCode::NOT_FOUND,
        MuxError::Spawn(e) => {
            warn!(terminal = %name, "Failed to attach terminal: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn stream_terminal<S, R, E>(
    mut ws_tx: S,
    mut ws_rx: R,
    identity: Identity,
    name: String,
    mode: Mode,
    attachment: TerminalAttachment,
) where
    S: Sink<Message> + Unpin,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    info!(
        username = %identity.username(),
        terminal = %name,
        ?mode,
        "Terminal socket attached"
    );

    let TerminalAttachment {
        backlog,
        input,
        mut output,
    } = attachment;
    let mut pending = Vec::new();

    if ws_tx.send(text_frame(json!(["setup", {}]))).await.is_err() {
        return;
    }
    for chunk in backlog {
        let text = decode_output(&mut pending, &chunk);
        if !text.is_empty() && ws_tx.send(text_frame(json!(["stdout", text]))).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            // Terminal output -> WebSocket
            result = output.recv() => {
                match result {
                    Ok(chunk) => {
                        let text = decode_output(&mut pending, &chunk);
                        if text.is_empty() {
                            continue;
                        }
                        if ws_tx.send(text_frame(json!(["stdout", text]))).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(terminal = %name, skipped, "Terminal socket lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        let _ = ws_tx.send(text_frame(json!(["disconnect", 1]))).await;
                        let _ = ws_tx.close().await;
                        break;
                    }
                }
            }

            // WebSocket input -> terminal; waits while the input queue is full
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if mode == Mode::Observe {
                            continue;
                        }
                        if let Some(frame) = parse_client_frame(text.as_str())
                            && input.send(frame).await.is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!(terminal = %name, "WebSocket receive error: {e}");
                        break;
                    }
                }
            }
        }
    }

    info!(
        username = %identity.username(),
        terminal = %name,
        "Terminal socket detached"
    );
}

fn text_frame(value: Value) -> Message {
    Message::Text(value.to_string().into())
}

/// Parse a client frame into terminal input. Unknown frames yield `None`.
fn parse_client_frame(text: &str) -> Option<TerminalInput> {
    let value: Value = serde_json::from_str(text).ok()?;
    let frame = value.as_array()?;

    match frame.first()?.as_str()? {
        "stdin" => {
            let data = frame.get(1)?.as_str()?;
            Some(TerminalInput::Data(Bytes::copy_from_slice(data.as_bytes())))
        }
        "set_size" => {
            let rows = u16::try_from(frame.get(1)?.as_u64()?).ok()?;
            let cols = u16::try_from(frame.get(2)?.as_u64()?).ok()?;
            if rows == 0 || cols == 0 {
                return None;
            }
            Some(TerminalInput::Resize { rows, cols })
        }
        _ => None,
    }
}

/// Decode terminal output as UTF-8, holding back a multi-byte sequence that
/// was split across chunks until its remaining bytes arrive.
fn decode_output(pending: &mut Vec<u8>, chunk: &[u8]) -> String {
    pending.extend_from_slice(chunk);

    match std::str::from_utf8(pending) {
        Ok(text) => {
            let text = text.to_string();
            pending.clear();
            text
        }
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            let text = String::from_utf8_lossy(&pending[..valid]).into_owned();
            pending.drain(..valid);
            text
        }
        Err(_) => {
            let text = String::from_utf8_lossy(pending).into_owned();
            pending.clear();
            text
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multiplexer::{INPUT_QUEUE_CAPACITY, TerminalMultiplexer};
    use async_trait::async_trait;
    use futures::channel::mpsc as frames;
    use std::convert::Infallible;
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;

    /// A socket session wired to in-memory channels.
    struct Harness {
        client: frames::UnboundedSender<Result<Message, Infallible>>,
        server: frames::UnboundedReceiver<Message>,
        output: broadcast::Sender<Bytes>,
        input: mpsc::Receiver<TerminalInput>,
        task: JoinHandle<()>,
    }

    fn start(mode: Mode, backlog: Vec<Bytes>) -> Harness {
        let (client, client_rx) = frames::unbounded();
        let (server_tx, server) = frames::unbounded();
        let (output, output_rx) = broadcast::channel(16);
        let (input_tx, input) = mpsc::channel(INPUT_QUEUE_CAPACITY);

        let attachment = TerminalAttachment {
            backlog,
            input: input_tx,
            output: output_rx,
        };
        let task = tokio::spawn(stream_terminal(
            server_tx,
            client_rx,
            Identity::new("dave"),
            "dave".to_string(),
            mode,
            attachment,
        ));

        Harness {
            client,
            server,
            output,
            input,
            task,
        }
    }

    fn client_text(text: &str) -> Result<Message, Infallible> {
        Ok(Message::Text(text.to_string().into()))
    }

    /// Every text frame the server sent, parsed.
    async fn sent_frames(server: frames::UnboundedReceiver<Message>) -> Vec<Value> {
        server
            .filter_map(|msg| async move {
                match msg {
                    Message::Text(text) => serde_json::from_str(text.as_str()).ok(),
                    _ => None,
                }
            })
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_stream_sends_setup_backlog_output_then_disconnect() {
        let Harness {
            client: _client,
            server,
            output,
            input: _input,
            task,
        } = start(Mode::Interactive, vec![Bytes::from_static(b"hello ")]);

        output.send(Bytes::from_static(b"world")).unwrap();
        // Terminal exit closes the output channel
        drop(output);
        task.await.unwrap();

        assert_eq!(
            sent_frames(server).await,
            vec![
                json!(["setup", {}]),
                json!(["stdout", "hello "]),
                json!(["stdout", "world"]),
                json!(["disconnect", 1]),
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_forwards_owner_input() {
        let Harness {
            client,
            server,
            output: _output,
            mut input,
            task,
        } = start(Mode::Interactive, Vec::new());

        client.unbounded_send(client_text(r#"["stdin", "ls\r"]"#)).unwrap();
        client.unbounded_send(client_text(r#"["set_size", 40, 120]"#)).unwrap();

        assert_eq!(
            input.recv().await,
            Some(TerminalInput::Data(Bytes::from_static(b"ls\r")))
        );
        assert_eq!(
            input.recv().await,
            Some(TerminalInput::Resize { rows: 40, cols: 120 })
        );

        // Client going away ends the session without a disconnect frame
        drop(client);
        task.await.unwrap();
        assert_eq!(sent_frames(server).await, vec![json!(["setup", {}])]);
    }

    #[tokio::test]
    async fn test_stream_observer_input_is_dropped() {
        let Harness {
            client,
            server: _server,
            output: _output,
            mut input,
            task,
        } = start(Mode::Observe, Vec::new());

        client.unbounded_send(client_text(r#"["stdin", "rm -rf ~\r"]"#)).unwrap();
        client.unbounded_send(client_text(r#"["set_size", 10, 10]"#)).unwrap();
        drop(client);
        task.await.unwrap();

        // The session's sender is gone and nothing was queued
        assert_eq!(input.recv().await, None);
    }

    #[tokio::test]
    async fn test_stream_waits_for_full_input_queue() {
        let Harness {
            client,
            server: _server,
            output: _output,
            mut input,
            task,
        } = start(Mode::Interactive, Vec::new());

        let total = INPUT_QUEUE_CAPACITY * 3;
        for i in 0..total {
            let frame = json!(["stdin", i.to_string()]).to_string();
            client.unbounded_send(client_text(&frame)).unwrap();
        }
        drop(client);

        // Nothing is dropped while the queue is full; frames arrive in order
        for i in 0..total {
            assert_eq!(
                input.recv().await,
                Some(TerminalInput::Data(Bytes::from(i.to_string())))
            );
        }
        task.await.unwrap();
        assert_eq!(input.recv().await, None);
    }

    /// Multiplexer whose terminals can be marked as exited.
    #[derive(Default)]
    struct RecordingMux {
        spawned: Mutex<Vec<String>>,
        running: Mutex<Vec<String>>,
    }

    impl RecordingMux {
        fn attachment() -> TerminalAttachment {
            let (input, _) = mpsc::channel(1);
            let (_, output) = broadcast::channel(1);
            TerminalAttachment {
                backlog: Vec::new(),
                input,
                output,
            }
        }
    }

    #[async_trait]
    impl TerminalMultiplexer for RecordingMux {
        async fn create(&self, name: &str) -> Result<(), MuxError> {
            let mut running = self.running.lock().unwrap();
            if !running.iter().any(|n| n == name) {
                running.push(name.to_string());
                self.spawned.lock().unwrap().push(name.to_string());
            }
            Ok(())
        }

        async fn attach(&self, name: &str) -> Result<TerminalAttachment, MuxError> {
            self.create(name).await?;
            Ok(Self::attachment())
        }

        async fn attach_existing(&self, name: &str) -> Result<TerminalAttachment, MuxError> {
            if self.running.lock().unwrap().iter().any(|n| n == name) {
                Ok(Self::attachment())
            } else {
                Err(MuxError::NotRunning(name.to_string()))
            }
        }

        fn running(&self) -> usize {
            self.running.lock().unwrap().len()
        }

        fn capacity(&self) -> usize {
            10
        }
    }

    #[tokio::test]
    async fn test_admin_observes_but_never_restarts() {
        let mux = Arc::new(RecordingMux::default());
        let directory = SessionDirectory::new(mux.clone());
        let admin = Identity::new("admin");
        let dave = Identity::new("dave");

        // No session recorded yet
        let result = open_terminal(&directory, &admin, "dave").await;
        assert_eq!(result.err(), Some(StatusCode::NOT_FOUND));
        assert!(mux.spawned.lock().unwrap().is_empty());

        let (mode, _) = open_terminal(&directory, &dave, "dave").await.unwrap();
        assert_eq!(mode, Mode::Interactive);
        let (mode, _) = open_terminal(&directory, &admin, "dave").await.unwrap();
        assert_eq!(mode, Mode::Observe);

        // dave's terminal exits; the admin cannot bring it back
        mux.running.lock().unwrap().clear();
        let result = open_terminal(&directory, &admin, "dave").await;
        assert_eq!(result.err(), Some(StatusCode::NOT_FOUND));
        assert_eq!(mux.running(), 0);
        assert_eq!(*mux.spawned.lock().unwrap(), vec!["dave".to_string()]);

        // The owner restarts it
        open_terminal(&directory, &dave, "dave").await.unwrap();
        assert_eq!(mux.running(), 1);
        assert_eq!(mux.spawned.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_student_cannot_open_other_terminal() {
        let mux = Arc::new(RecordingMux::default());
        let directory = SessionDirectory::new(mux.clone());

        let result = open_terminal(&directory, &Identity::new("erin"), "dave").await;
        assert_eq!(result.err(), Some(StatusCode::FORBIDDEN));
        assert!(mux.spawned.lock().unwrap().is_empty());
    }

    #[test]
    fn test_parse_stdin_frame() {
        assert_eq!(
            parse_client_frame(r#"["stdin", "ls -la\r"]"#),
            Some(TerminalInput::Data(Bytes::from_static(b"ls -la\r")))
        );
    }

    #[test]
    fn test_parse_set_size_frame() {
        assert_eq!(
            parse_client_frame(r#"["set_size", 40, 120]"#),
            Some(TerminalInput::Resize { rows: 40, cols: 120 })
        );
        assert_eq!(parse_client_frame(r#"["set_size", 0, 120]"#), None);
        assert_eq!(parse_client_frame(r#"["set_size", 70000, 120]"#), None);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_client_frame("not json"), None);
        assert_eq!(parse_client_frame(r#"{"stdin": "x"}"#), None);
        assert_eq!(parse_client_frame(r#"["unknown", 1]"#), None);
        assert_eq!(parse_client_frame(r#"["stdin"]"#), None);
    }

    #[test]
    fn test_decode_output_joins_split_characters() {
        let bytes = "héllo ✓".as_bytes();
        let mut pending = Vec::new();

        // Split inside the multi-byte check mark
        let split = bytes.len() - 1;
        let first = decode_output(&mut pending, &bytes[..split]);
        assert_eq!(first, "héllo ");
        assert!(!pending.is_empty());

        let second = decode_output(&mut pending, &bytes[split..]);
        assert_eq!(second, "✓");
        assert!(pending.is_empty());
    }

    #[test]
    fn test_decode_output_replaces_invalid_bytes() {
        let mut pending = Vec::new();
        let text = decode_output(&mut pending, &[b'a', 0xff, b'b']);
        assert_eq!(text, "a\u{fffd}b");
        assert!(pending.is_empty());
    }
}
