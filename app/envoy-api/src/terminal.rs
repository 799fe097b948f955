//! Framed WebSocket terminal gateway.
//!
//! Bridges a WebSocket to an interactive exec session inside a running
//! container. The first client message is a JSON init (`{"cols","rows"}`,
//! defaulting to 80x24) used to size the exec TTY at creation; afterwards
//! every frame is binary with a one-byte tag: `0x30` carries raw
//! terminal bytes in either direction, `0x31` carries a resize request
//! (`{"columns","rows"}`). Three flows run until any one ends — exec to
//! client, client to exec, and a keep-alive ping — and the first
//! termination cancels the rest.

use crate::api::AppState;
use crate::error::Result;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use envoy_core::config::TerminalConfig;
use envoy_core::runtime::{ExecRuntime, ExecSpec};
use envoy_core::CoreError;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const MSG_DATA: u8 = 0x30;
const MSG_RESIZE: u8 = 0x31;

const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

const DEFAULT_COLS: u16 = 80;
const DEFAULT_ROWS: u16 = 24;

#[derive(Debug, Deserialize)]
pub struct TerminalQuery {
    #[serde(default)]
    pub mode: String,
}

#[derive(Debug, Default, Deserialize)]
struct InitFrame {
    #[serde(default)]
    cols: u16,
    #[serde(default)]
    rows: u16,
}

#[derive(Debug, Deserialize)]
struct ResizeFrame {
    columns: u16,
    rows: u16,
}

/// `GET /sleeves/{name}/terminal`
pub async fn sleeve_terminal(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<TerminalQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    let sleeve = state.sleeves.get(&name)?;

    // Confirm the container is actually live before upgrading.
    let record = state.containers.inspect(&sleeve.container_id).await?;
    if record.state != "running" {
        return Err(CoreError::conflict(format!(
            "sleeve {name:?} is not running"
        ))
        .into());
    }

    let gateway = TerminalGateway::new(
        state.exec.clone(),
        sleeve.container_name,
        terminal_config(&state),
        query.mode == "observe",
    );
    Ok(ws.on_upgrade(move |socket| gateway.run(socket)))
}

/// `GET /envoy/terminal`
///
/// Attaches to the envoy's own container, preferring the development
/// instance when both exist.
pub async fn envoy_terminal(
    State(state): State<AppState>,
    Query(query): Query<TerminalQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    let mut container = state.containers.get_by_name("envoy-dev").await?;
    if container.is_none() {
        container = state.containers.get_by_name("envoy").await?;
    }
    let Some(container) = container else {
        return Err(CoreError::not_found("envoy container").into());
    };

    let gateway = TerminalGateway::new(
        state.exec.clone(),
        container.name,
        terminal_config(&state),
        query.mode == "observe",
    );
    Ok(ws.on_upgrade(move |socket| gateway.run(socket)))
}

fn terminal_config(state: &AppState) -> TerminalConfig {
    state
        .config
        .read()
        .map(|c| c.terminal.clone())
        .unwrap_or_default()
}

/// Bridge between one WebSocket and one exec session.
pub struct TerminalGateway {
    exec: Arc<dyn ExecRuntime>,
    container: String,
    terminal: TerminalConfig,
    read_only: bool,
}

impl TerminalGateway {
    /// Creates a gateway for the given container. `read_only` drops all
    /// inbound data frames (observer mode).
    #[must_use]
    pub fn new(
        exec: Arc<dyn ExecRuntime>,
        container: String,
        terminal: TerminalConfig,
        read_only: bool,
    ) -> Self {
        Self {
            exec,
            container,
            terminal,
            read_only,
        }
    }

    /// Runs the session to completion.
    pub async fn run(self, socket: WebSocket) {
        let (mut sink, mut stream) = socket.split();

        // First message: JSON init with the client's terminal size.
        let (cols, rows) = match tokio::time::timeout(PONG_TIMEOUT, stream.next()).await {
            Ok(Some(Ok(message))) => parse_init(&message),
            _ => return,
        };

        let session = match self
            .exec
            .exec_attach(
                &self.container,
                ExecSpec {
                    cmd: self.terminal.command.clone(),
                    user: self.terminal.user.clone(),
                    cols,
                    rows,
                },
            )
            .await
        {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!(container = %self.container, "terminal exec failed: {err}");
                let _ = sink.close().await;
                return;
            }
        };

        let exec_id = session.id.clone();
        let mut exec_input = session.input;
        let mut exec_output = session.output;

        let cancel = CancellationToken::new();
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(64);

        // Writer: the only task touching the sink, with a per-message
        // write deadline.
        let writer = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                while let Some(message) = out_rx.recv().await {
                    match tokio::time::timeout(WRITE_TIMEOUT, sink.send(message)).await {
                        Ok(Ok(())) => {}
                        _ => break,
                    }
                }
                cancel.cancel();
                let _ = sink.close().await;
            }
        });

        // Exec to client relay.
        let exec_to_ws = tokio::spawn({
            let out_tx = out_tx.clone();
            let cancel = cancel.clone();
            async move {
                while let Some(chunk) = exec_output.next().await {
                    let Ok(bytes) = chunk else { break };
                    if bytes.is_empty() {
                        continue;
                    }
                    let mut frame = Vec::with_capacity(bytes.len() + 1);
                    frame.push(MSG_DATA);
                    frame.extend_from_slice(&bytes);
                    if out_tx.send(Message::Binary(frame)).await.is_err() {
                        break;
                    }
                }
                cancel.cancel();
            }
        });

        // Keep-alive ping.
        let ping = tokio::spawn({
            let out_tx = out_tx.clone();
            let cancel = cancel.clone();
            async move {
                let start = tokio::time::Instant::now() + PING_INTERVAL;
                let mut tick = tokio::time::interval_at(start, PING_INTERVAL);
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        _ = tick.tick() => {
                            if out_tx.send(Message::Ping(Vec::new())).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        });

        // Client to exec relay, with a read deadline refreshed by pongs.
        let mut deadline = tokio::time::Instant::now() + PONG_TIMEOUT;
        loop {
            let message = tokio::select! {
                () = cancel.cancelled() => break,
                next = tokio::time::timeout_at(deadline, stream.next()) => match next {
                    Err(_) | Ok(None) | Ok(Some(Err(_))) => break,
                    Ok(Some(Ok(message))) => message,
                },
            };

            match message {
                Message::Pong(_) => {
                    deadline = tokio::time::Instant::now() + PONG_TIMEOUT;
                }
                Message::Binary(frame) => {
                    if !self.handle_frame(&frame, &mut exec_input, &exec_id).await {
                        break;
                    }
                }
                Message::Text(text) => {
                    if !self
                        .handle_frame(text.as_bytes(), &mut exec_input, &exec_id)
                        .await
                    {
                        break;
                    }
                }
                Message::Close(_) => break,
                Message::Ping(_) => {}
            }
        }

        cancel.cancel();
        drop(out_tx);
        let _ = exec_input.shutdown().await;
        writer.abort();
        exec_to_ws.abort();
        ping.abort();
        tracing::debug!(container = %self.container, "terminal session ended");
    }

    /// Dispatches one tagged client frame. Returns false when the relay
    /// should stop.
    async fn handle_frame(
        &self,
        frame: &[u8],
        exec_input: &mut std::pin::Pin<Box<dyn tokio::io::AsyncWrite + Send>>,
        exec_id: &str,
    ) -> bool {
        let Some((&tag, payload)) = frame.split_first() else {
            return true;
        };

        match tag {
            MSG_DATA => {
                if self.read_only || payload.is_empty() {
                    return true;
                }
                if exec_input.write_all(payload).await.is_err() {
                    return false;
                }
                exec_input.flush().await.is_ok()
            }
            MSG_RESIZE => {
                if let Ok(resize) = serde_json::from_slice::<ResizeFrame>(payload) {
                    if resize.columns > 0 && resize.rows > 0 {
                        // Best-effort; the session survives a failed resize.
                        let _ = self
                            .exec
                            .exec_resize(exec_id, resize.columns, resize.rows)
                            .await;
                    }
                }
                true
            }
            _ => true,
        }
    }
}

fn parse_init(message: &Message) -> (u16, u16) {
    let bytes: &[u8] = match message {
        Message::Text(text) => text.as_bytes(),
        Message::Binary(bytes) => bytes,
        _ => return (DEFAULT_COLS, DEFAULT_ROWS),
    };

    let init: InitFrame = serde_json::from_slice(bytes).unwrap_or_default();
    let cols = if init.cols == 0 { DEFAULT_COLS } else { init.cols };
    let rows = if init.rows == 0 { DEFAULT_ROWS } else { init.rows };
    (cols, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use envoy_core::runtime::ExecSession;
    use std::pin::Pin;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWrite};

    #[derive(Default)]
    struct RecordingExec {
        resizes: Mutex<Vec<(String, u16, u16)>>,
    }

    #[async_trait]
    impl ExecRuntime for RecordingExec {
        async fn exec_attach(
            &self,
            _container: &str,
            _spec: ExecSpec,
        ) -> envoy_core::Result<ExecSession> {
            Err(envoy_core::CoreError::Runtime("not used".to_string()))
        }

        async fn exec_resize(
            &self,
            exec_id: &str,
            cols: u16,
            rows: u16,
        ) -> envoy_core::Result<()> {
            self.resizes
                .lock()
                .unwrap()
                .push((exec_id.to_string(), cols, rows));
            Ok(())
        }
    }

    fn frame(tag: u8, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![tag];
        frame.extend_from_slice(payload);
        frame
    }

    fn gateway(exec: Arc<RecordingExec>, read_only: bool) -> TerminalGateway {
        TerminalGateway::new(
            exec,
            "sleeve-athena".to_string(),
            TerminalConfig::default(),
            read_only,
        )
    }

    #[tokio::test]
    async fn data_frames_reach_the_exec_stdin() {
        let exec = Arc::new(RecordingExec::default());
        let gateway = gateway(exec, false);

        let (mut reader, writer) = tokio::io::duplex(256);
        let mut input: Pin<Box<dyn AsyncWrite + Send>> = Box::pin(writer);

        assert!(gateway.handle_frame(&frame(MSG_DATA, b"ls\n"), &mut input, "e1").await);

        let mut received = [0u8; 3];
        reader.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"ls\n");
    }

    #[tokio::test]
    async fn observer_mode_drops_data_but_still_resizes() {
        let exec = Arc::new(RecordingExec::default());
        let gateway = gateway(exec.clone(), true);

        let (mut reader, writer) = tokio::io::duplex(256);
        let mut input: Pin<Box<dyn AsyncWrite + Send>> = Box::pin(writer);

        assert!(gateway.handle_frame(&frame(MSG_DATA, b"rm -rf /\n"), &mut input, "e1").await);
        assert!(
            gateway
                .handle_frame(
                    &frame(MSG_RESIZE, br#"{"columns":80,"rows":24}"#),
                    &mut input,
                    "e1"
                )
                .await
        );

        drop(gateway);
        drop(input);
        // Nothing was written to stdin.
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer).await.unwrap();
        assert!(buffer.is_empty());

        assert_eq!(
            exec.resizes.lock().unwrap().as_slice(),
            &[("e1".to_string(), 80, 24)]
        );
    }

    #[tokio::test]
    async fn malformed_resize_frames_are_ignored() {
        let exec = Arc::new(RecordingExec::default());
        let gateway = gateway(exec.clone(), false);

        let (_reader, writer) = tokio::io::duplex(256);
        let mut input: Pin<Box<dyn AsyncWrite + Send>> = Box::pin(writer);

        assert!(gateway.handle_frame(&frame(MSG_RESIZE, b"not json"), &mut input, "e1").await);
        assert!(
            gateway
                .handle_frame(&frame(MSG_RESIZE, br#"{"columns":0,"rows":0}"#), &mut input, "e1")
                .await
        );
        assert!(gateway.handle_frame(&[], &mut input, "e1").await);
        assert!(gateway.handle_frame(&[0x7f, 1, 2], &mut input, "e1").await);

        assert!(exec.resizes.lock().unwrap().is_empty());
    }

    #[test]
    fn init_defaults_on_absent_or_bad_fields() {
        let msg = Message::Text("{\"cols\":120,\"rows\":40}".to_string());
        assert_eq!(parse_init(&msg), (120, 40));

        let msg = Message::Text("not json".to_string());
        assert_eq!(parse_init(&msg), (80, 24));

        let msg = Message::Text("{\"cols\":0,\"rows\":0}".to_string());
        assert_eq!(parse_init(&msg), (80, 24));

        let msg = Message::Binary(b"{\"rows\":50}".to_vec());
        assert_eq!(parse_init(&msg), (80, 50));
    }
}
