//! Receiver-side state machine: `initializing -> connecting ->
//! handshaking -> negotiating -> transferring -> completed`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::config::ReceiveOptions;
use crate::error::P2pError;
use crate::peer::{Connection, PeerMessage, SignalingPeer};
use crate::protocol::{Message, PROTOCOL_VERSION};
use crate::source::DataSink;
use crate::state::{CancelledBy, ReceiverState};

/// What the reader task hands to the transfer loop: either a decoded
/// control frame or the binary payload following a `chunk` header.
enum Frame {
    Control(Message),
    Binary(bytes::Bytes),
}

pub trait ReceiverEvents: Send + Sync {
    fn on_progress(&self, _received_bytes: u64, _total_bytes: u64, _percent: f64) {}
    fn on_complete(&self) {}
    fn on_cancel(&self, _by: CancelledBy, _reason: Option<String>) {}
}

pub struct NoopEvents;
impl ReceiverEvents for NoopEvents {}

/// The sender's busy-rejecter (`sender.rs::spawn_busy_rejecter`) closes a
/// collision connection with this exact message; recognize it so a caller
/// can distinguish "someone else is already transferring" from any other
/// remote failure by matching on [`P2pError::Busy`].
const BUSY_MESSAGE: &str = "Transfer already in progress.";

fn classify_remote_error(message: String) -> P2pError {
    if message == BUSY_MESSAGE {
        P2pError::Busy
    } else {
        P2pError::RemoteError(message)
    }
}

pub struct ReceiveOutcome {
    pub session_id: String,
    pub name: String,
    pub mime: String,
    pub total_bytes: u64,
}

pub struct ReceiverHandle {
    state: Mutex<ReceiverState>,
    ready_gate: AtomicBool,
    cancel: AtomicBool,
}

impl ReceiverHandle {
    /// Create a fresh, idle handle. Hold onto it before calling [`receive`]
    /// so it can be cancelled or polled for status while the transfer is
    /// in flight. `auto_ready` mirrors [`ReceiveOptions::auto_ready`].
    pub fn new(auto_ready: bool) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ReceiverState::Initializing),
            ready_gate: AtomicBool::new(auto_ready),
            cancel: AtomicBool::new(false),
        })
    }

    pub async fn status(&self) -> ReceiverState {
        *self.state.lock().await
    }

    /// Call when the application is ready to receive data, for sessions
    /// created with `auto_ready: false`.
    pub fn confirm_ready(&self) {
        self.ready_gate.store(true, Ordering::SeqCst);
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    async fn transition(&self, next: ReceiverState) -> Result<(), P2pError> {
        let mut guard = self.state.lock().await;
        if !guard.allows(next) {
            warn!(from = guard.name(), to = next.name(), "dropped illegal receiver transition");
            return Err(P2pError::IllegalTransition {
                from: guard.name(),
                to: next.name(),
            });
        }
        *guard = next;
        Ok(())
    }
}

/// Dial a sharing code and run the receiver side of a P2P transfer to
/// completion, delivering bytes to `sink` in order as they arrive.
///
/// `handle` should be constructed with [`ReceiverHandle::new`] and kept by
/// the caller before this call.
pub async fn receive(
    peer: Arc<dyn SignalingPeer>,
    code: &str,
    sink: Arc<dyn DataSink>,
    opts: ReceiveOptions,
    events: Arc<dyn ReceiverEvents>,
    handle: Arc<ReceiverHandle>,
) -> Result<ReceiveOutcome, P2pError> {
    handle.transition(ReceiverState::Connecting).await?;
    let conn = peer.dial(code).await?;
    run_session(conn, sink, opts, events, handle).await
}

async fn run_session(
    conn: Box<dyn Connection>,
    sink: Arc<dyn DataSink>,
    opts: ReceiveOptions,
    events: Arc<dyn ReceiverEvents>,
    handle: Arc<ReceiverHandle>,
) -> Result<ReceiveOutcome, P2pError> {
    let conn: Arc<dyn Connection> = Arc::from(conn);
    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
    spawn_reader(conn.clone(), tx);

    handle.transition(ReceiverState::Handshaking).await?;
    let remote_version = wait_for_hello(&mut rx).await?;
    if remote_version != PROTOCOL_VERSION {
        return Err(P2pError::VersionMismatch {
            local: PROTOCOL_VERSION,
            remote: remote_version,
        });
    }
    conn.send(PeerMessage::Json(
        Message::Hello {
            protocol_version: PROTOCOL_VERSION,
            session_id: String::new(),
        }
        .to_json(),
    ))
    .await
    .map_err(|e| P2pError::Network(e.to_string()))?;

    handle.transition(ReceiverState::Negotiating).await?;
    let (session_id, name, size, mime) = wait_for_meta(&mut rx).await?;

    while !handle.ready_gate.load(Ordering::SeqCst) {
        if handle.is_cancelled() {
            return Err(P2pError::Cancelled);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    conn.send(PeerMessage::Json(Message::Ready.to_json()))
        .await
        .map_err(|e| P2pError::Network(e.to_string()))?;

    handle.transition(ReceiverState::Transferring).await?;
    let received = transfer_loop(
        &conn,
        &mut rx,
        &sink,
        &handle,
        &events,
        size,
        opts.watchdog_timeout,
    )
    .await?;

    handle.transition(ReceiverState::Completed).await?;
    events.on_progress(size, size, 100.0);
    events.on_complete();

    Ok(ReceiveOutcome {
        session_id,
        name,
        mime,
        total_bytes: received,
    })
}

async fn transfer_loop(
    conn: &Arc<dyn Connection>,
    rx: &mut mpsc::UnboundedReceiver<Frame>,
    sink: &Arc<dyn DataSink>,
    handle: &Arc<ReceiverHandle>,
    events: &Arc<dyn ReceiverEvents>,
    total_size: u64,
    watchdog_timeout: Duration,
) -> Result<u64, P2pError> {
    let mut pending_header: Option<(u64, u64, u64, u64)> = None;
    let mut received_bytes: u64 = 0;
    let mut received_chunks: u64 = 0;
    let mut expected_total_chunks: Option<u64> = None;

    loop {
        if handle.is_cancelled() {
            let _ = conn
                .send(PeerMessage::Json(Message::Cancelled { reason: None }.to_json()))
                .await;
            handle.transition(ReceiverState::Cancelled).await.ok();
            events.on_cancel(CancelledBy::SelfSide, None);
            return Err(P2pError::Cancelled);
        }

        let msg = match tokio::time::timeout(watchdog_timeout, rx.recv()).await {
            Ok(Some(m)) => m,
            Ok(None) => return Err(P2pError::Network("connection closed during transfer".into())),
            Err(_) => return Err(P2pError::Watchdog),
        };

        match msg {
            Frame::Control(Message::Chunk { seq, offset, size, total }) => {
                expected_total_chunks = Some(total);
                pending_header = Some((seq, offset, size, total));
            }
            Frame::Binary(data) => {
                let (seq, _offset, size, _total) = pending_header.take().ok_or_else(|| {
                    P2pError::Network("binary frame with no preceding chunk header".into())
                })?;
                if data.len() as u64 != size {
                    return Err(P2pError::Network("chunk size mismatch".into()));
                }
                sink.write(&data)
                    .await
                    .map_err(|e| P2pError::Network(e.to_string()))?;
                received_bytes += data.len() as u64;
                received_chunks += 1;
                conn.send(PeerMessage::Json(
                    Message::ChunkAck {
                        seq,
                        received: received_chunks,
                    }
                    .to_json(),
                ))
                .await
                .map_err(|e| P2pError::Network(e.to_string()))?;
                events.on_progress(
                    received_bytes,
                    total_size,
                    (received_bytes as f64 / total_size.max(1) as f64) * 100.0,
                );
            }
            Frame::Control(Message::Ping { timestamp }) => {
                let _ = conn
                    .send(PeerMessage::Json(Message::Pong { timestamp }.to_json()))
                    .await;
            }
            Frame::Control(Message::End { attempt }) => {
                debug!(attempt, received_chunks, "received end");
                let expected = expected_total_chunks.unwrap_or(received_chunks);
                if received_chunks < expected {
                    conn.send(PeerMessage::Json(
                        Message::Error {
                            message: format!(
                                "expected {expected} chunks, received {received_chunks}"
                            ),
                        }
                        .to_json(),
                    ))
                    .await
                    .ok();
                    return Err(P2pError::CountMismatch {
                        received: received_chunks,
                        expected,
                    });
                }
                send_end_ack_with_resends(conn, received_chunks, expected).await;
                return Ok(received_bytes);
            }
            Frame::Control(Message::Cancelled { reason }) => {
                handle.transition(ReceiverState::Cancelled).await.ok();
                events.on_cancel(CancelledBy::RemoteSide, reason.clone());
                return Err(P2pError::RemoteError(
                    reason.unwrap_or_else(|| "cancelled".into()),
                ));
            }
            Frame::Control(Message::Error { message }) => {
                return Err(classify_remote_error(message))
            }
            Frame::Control(_) => {}
        }
    }
}

async fn send_end_ack_with_resends(conn: &Arc<dyn Connection>, received: u64, total: u64) {
    let ack = Message::EndAck { received, total }.to_json();
    let _ = conn.send(PeerMessage::Json(ack.clone())).await;
    for _ in 0..2 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = conn.send(PeerMessage::Json(ack.clone())).await;
    }
}

async fn wait_for_hello(rx: &mut mpsc::UnboundedReceiver<Frame>) -> Result<u32, P2pError> {
    while let Some(msg) = rx.recv().await {
        match msg {
            Frame::Control(Message::Hello { protocol_version, .. }) => return Ok(protocol_version),
            Frame::Control(Message::Error { message }) => return Err(classify_remote_error(message)),
            _ => continue,
        }
    }
    Err(P2pError::Network("connection closed during handshake".into()))
}

async fn wait_for_meta(
    rx: &mut mpsc::UnboundedReceiver<Frame>,
) -> Result<(String, String, u64, String), P2pError> {
    while let Some(msg) = rx.recv().await {
        match msg {
            Frame::Control(Message::Meta { session_id, name, size, mime }) => {
                return Ok((session_id, name, size, mime))
            }
            Frame::Control(Message::Error { message }) => return Err(classify_remote_error(message)),
            _ => continue,
        }
    }
    Err(P2pError::Network("connection closed waiting for meta".into()))
}

fn spawn_reader(conn: Arc<dyn Connection>, tx: mpsc::UnboundedSender<Frame>) {
    tokio::spawn(async move {
        let mut last_binary_pending = false;
        while let Some(msg) = conn.recv().await {
            match msg {
                PeerMessage::Json(v) => {
                    if let Some(parsed) = Message::from_json(&v) {
                        last_binary_pending = matches!(parsed, Message::Chunk { .. });
                        if tx.send(Frame::Control(parsed)).is_err() {
                            break;
                        }
                    }
                }
                PeerMessage::Binary(data) => {
                    if last_binary_pending && tx.send(Frame::Binary(data)).is_err() {
                        break;
                    }
                    last_binary_pending = false;
                }
            }
        }
    });
}
