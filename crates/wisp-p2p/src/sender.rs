//! Sender-side state machine: `listening -> handshaking -> negotiating ->
//! transferring -> finishing -> awaiting_ack -> completed`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SendOptions;
use crate::error::P2pError;
use crate::peer::{Connection, PeerMessage, SignalingPeer};
use crate::protocol::{Message, PROTOCOL_VERSION};
use crate::source::FileSource;
use crate::state::{CancelledBy, SenderState};

/// In-flight chunk window entry.
#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    #[allow(dead_code)]
    offset: u64,
    size: u64,
    #[allow(dead_code)]
    sent_at: Instant,
}

/// Progress/status callbacks, invoked in event order; never invoked after
/// a terminal state is reached.
pub trait SenderEvents: Send + Sync {
    fn on_progress(&self, _sent_bytes: u64, _total_bytes: u64, _percent: f64) {}
    fn on_complete(&self) {}
    fn on_cancel(&self, _by: CancelledBy, _reason: Option<String>) {}
}

/// No-op implementation for callers that don't need events.
pub struct NoopEvents;
impl SenderEvents for NoopEvents {}

pub struct SendOutcome {
    pub session_id: String,
    pub total_bytes: u64,
}

/// Shared, externally observable status + cooperative cancel flag.
pub struct SenderHandle {
    state: Mutex<SenderState>,
    cancel: AtomicBool,
    window_len: AtomicUsize,
    in_flight_bytes: AtomicU64,
}

impl SenderHandle {
    /// Create a fresh, idle handle. Hold onto it before calling [`send`] so
    /// that [`SenderHandle::cancel`] can reach a transfer already in
    /// flight.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SenderState::Listening),
            cancel: AtomicBool::new(false),
            window_len: AtomicUsize::new(0),
            in_flight_bytes: AtomicU64::new(0),
        })
    }

    pub async fn status(&self) -> SenderState {
        *self.state.lock().await
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Number of chunks currently sent but not yet `chunk_ack`'d. Always
    /// `0` when `chunk_acknowledgments` is disabled.
    pub fn window_len(&self) -> usize {
        self.window_len.load(Ordering::Relaxed)
    }

    /// Bytes currently in flight (sent, unacknowledged).
    pub fn in_flight_bytes(&self) -> u64 {
        self.in_flight_bytes.load(Ordering::Relaxed)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    async fn transition(&self, next: SenderState) -> Result<(), P2pError> {
        let mut guard = self.state.lock().await;
        if !guard.allows(next) {
            warn!(from = guard.name(), to = next.name(), "dropped illegal sender transition");
            return Err(P2pError::IllegalTransition {
                from: guard.name(),
                to: next.name(),
            });
        }
        *guard = next;
        Ok(())
    }
}

/// Run the sender side of a P2P transfer to completion.
///
/// `peer` is dialed under sharing codes generated internally. `handle`
/// should be constructed with [`SenderHandle::new`] and kept by the caller
/// before this call so it can be cancelled or polled for status while the
/// transfer is in flight.
pub async fn send(
    peer: Arc<dyn SignalingPeer>,
    file: Arc<dyn FileSource>,
    file_name: String,
    opts: SendOptions,
    events: Arc<dyn SenderEvents>,
    handle: Arc<SenderHandle>,
) -> Result<SendOutcome, P2pError> {
    let conn = reserve_code_and_accept(&peer, &opts, &handle).await?;
    let reject_task = spawn_busy_rejecter(peer.clone());
    let result = run_session(conn, file, file_name, opts, events, handle).await;
    reject_task.abort();
    peer.destroy();
    result
}

/// While a transfer is in progress, any further incoming connection on the
/// same sharing code is rejected with a fatal `error` and closed — the
/// sender serves exactly one receiver per session.
fn spawn_busy_rejecter(peer: Arc<dyn SignalingPeer>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(extra) = peer.accept().await {
            warn!("rejecting additional P2P connection: transfer already in progress");
            let _ = extra
                .send(PeerMessage::Json(
                    Message::Error {
                        message: "Transfer already in progress.".to_string(),
                    }
                    .to_json(),
                ))
                .await;
            extra.close();
        }
    })
}

/// Attempt up to `opts.max_attempts` sharing codes until one is accepted
/// by the signalling server and a receiver connects.
async fn reserve_code_and_accept(
    peer: &Arc<dyn SignalingPeer>,
    opts: &SendOptions,
    handle: &Arc<SenderHandle>,
) -> Result<Box<dyn Connection>, P2pError> {
    let mut last_err = None;
    for attempt in 0..opts.max_attempts {
        let code = crate::code::generate_code();
        debug!(attempt, code = %code, "attempting to reserve sharing code");
        match peer.listen(&code).await {
            Ok(()) => {
                info!(code = %code, "listening for a P2P receiver");
                match peer.accept().await {
                    Some(conn) => return Ok(conn),
                    None => {
                        last_err = Some(P2pError::Network("peer closed while listening".into()));
                        peer.destroy();
                    }
                }
            }
            Err(e) => {
                warn!(attempt, error = %e, "code collision or listen failure, regenerating");
                last_err = Some(e);
            }
        }
        if handle.is_cancelled() {
            return Err(P2pError::Cancelled);
        }
    }
    Err(last_err.unwrap_or(P2pError::Network("could not reserve a sharing code".into())))
}

async fn run_session(
    conn: Box<dyn Connection>,
    file: Arc<dyn FileSource>,
    file_name: String,
    opts: SendOptions,
    events: Arc<dyn SenderEvents>,
    handle: Arc<SenderHandle>,
) -> Result<SendOutcome, P2pError> {
    let conn: Arc<dyn Connection> = Arc::from(conn);
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    spawn_reader(conn.clone(), tx);

    handle.transition(SenderState::Handshaking).await?;
    conn.send(PeerMessage::Json(
        Message::Hello {
            protocol_version: PROTOCOL_VERSION,
            session_id: String::new(),
        }
        .to_json(),
    ))
    .await
    .map_err(|e| P2pError::Network(e.to_string()))?;

    match tokio::time::timeout(opts.hello_timeout, wait_for_hello(&mut rx)).await {
        Ok(Ok(remote_version)) if remote_version == PROTOCOL_VERSION => {}
        Ok(Ok(remote_version)) => {
            return Err(P2pError::VersionMismatch {
                local: PROTOCOL_VERSION,
                remote: remote_version,
            })
        }
        Ok(Err(e)) => return Err(e),
        Err(_) => return Err(P2pError::HandshakeTimeout),
    }

    handle.transition(SenderState::Negotiating).await?;
    let session_id = Uuid::new_v4().to_string();
    let total_size = file.size();
    conn.send(PeerMessage::Json(
        Message::Meta {
            session_id: session_id.clone(),
            name: file_name,
            size: total_size,
            mime: opts.mime.clone(),
        }
        .to_json(),
    ))
    .await
    .map_err(|e| P2pError::Network(e.to_string()))?;

    wait_for_ready(&mut rx, &handle).await?;

    conn.set_buffered_amount_low_threshold(opts.buffer_low_water_mark);
    let heartbeat_conn = conn.clone();
    let heartbeat_interval = opts.heartbeat_interval;
    let heartbeat_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat_interval);
        loop {
            ticker.tick().await;
            let ts = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            if heartbeat_conn
                .send(PeerMessage::Json(Message::Ping { timestamp: ts }.to_json()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    handle.transition(SenderState::Transferring).await?;
    let total_chunks = total_size.div_ceil(opts.chunk_size as u64).max(1);
    let transfer_result = transfer_chunks(
        &conn,
        &mut rx,
        &file,
        &opts,
        &handle,
        &events,
        total_size,
        total_chunks,
    )
    .await;

    heartbeat_task.abort();

    match transfer_result {
        Ok(()) => {}
        Err(TransferOutcome::Cancelled(by, reason)) => {
            handle.transition(SenderState::Cancelled).await.ok();
            events.on_cancel(by, reason);
            return Err(P2pError::Cancelled);
        }
        Err(TransferOutcome::Error(e)) => return Err(e),
    }

    handle.transition(SenderState::Finishing).await?;
    let received = send_end_with_retry(&conn, &mut rx, &opts, total_chunks).await?;
    if received < total_chunks {
        return Err(P2pError::CountMismatch {
            received,
            expected: total_chunks,
        });
    }

    handle.transition(SenderState::AwaitingAck).await?;
    handle.transition(SenderState::Completed).await?;
    events.on_progress(total_size, total_size, 100.0);
    events.on_complete();

    Ok(SendOutcome {
        session_id,
        total_bytes: total_size,
    })
}

enum TransferOutcome {
    Cancelled(CancelledBy, Option<String>),
    Error(P2pError),
}

#[allow(clippy::too_many_arguments)]
async fn transfer_chunks(
    conn: &Arc<dyn Connection>,
    rx: &mut mpsc::UnboundedReceiver<Message>,
    file: &Arc<dyn FileSource>,
    opts: &SendOptions,
    handle: &Arc<SenderHandle>,
    events: &Arc<dyn SenderEvents>,
    total_size: u64,
    total_chunks: u64,
) -> Result<(), TransferOutcome> {
    let mut window: HashMap<u64, WindowEntry> = HashMap::new();
    let mut seq: u64 = 0;
    let mut offset: u64 = 0;

    while offset < total_size || (total_size == 0 && seq == 0) {
        if handle.is_cancelled() {
            notify_remote_cancel(conn, None).await;
            return Err(TransferOutcome::Cancelled(CancelledBy::SelfSide, None));
        }

        match drain_incoming(rx, &mut window) {
            Ok(None) => {}
            Ok(Some(reason)) => {
                return Err(TransferOutcome::Cancelled(CancelledBy::RemoteSide, reason))
            }
            Err(e) => return Err(TransferOutcome::Error(e)),
        }
        publish_window_metrics(handle, &window);

        if opts.chunk_acknowledgments && window.len() >= opts.max_unacked_chunks {
            wait_for_window_slot(rx, &mut window, opts.max_unacked_chunks)
                .await
                .map_err(TransferOutcome::Error)?;
            publish_window_metrics(handle, &window);
        }

        let len = (opts.chunk_size as u64).min(total_size - offset) as usize;
        let payload = file
            .read_range(offset, len)
            .await
            .map_err(|e| TransferOutcome::Error(P2pError::Network(e.to_string())))?;

        conn.send(PeerMessage::Json(
            Message::Chunk {
                seq,
                offset,
                size: payload.len() as u64,
                total: total_chunks,
            }
            .to_json(),
        ))
        .await
        .map_err(|e| TransferOutcome::Error(P2pError::Network(e.to_string())))?;
        conn.send(PeerMessage::Binary(bytes::Bytes::from(payload.clone())))
            .await
            .map_err(|e| TransferOutcome::Error(P2pError::Network(e.to_string())))?;

        window.insert(
            seq,
            WindowEntry {
                offset,
                size: payload.len() as u64,
                sent_at: Instant::now(),
            },
        );
        publish_window_metrics(handle, &window);

        if conn.buffered_amount() > opts.buffer_high_water_mark {
            conn.buffered_amount_low(Duration::from_millis(60)).await;
        }

        offset += payload.len() as u64;
        seq += 1;
        events.on_progress(offset, total_size, (offset as f64 / total_size.max(1) as f64) * 100.0);

        if total_size == 0 {
            break;
        }
    }

    publish_window_metrics(handle, &window);
    Ok(())
}

/// Mirror the in-flight chunk window onto the externally observable
/// handle, so a caller polling [`SenderHandle::window_len`] /
/// [`SenderHandle::in_flight_bytes`] sees backpressure as it happens.
fn publish_window_metrics(handle: &Arc<SenderHandle>, window: &HashMap<u64, WindowEntry>) {
    handle.window_len.store(window.len(), Ordering::Relaxed);
    let bytes: u64 = window.values().map(|e| e.size).sum();
    handle.in_flight_bytes.store(bytes, Ordering::Relaxed);
}

/// Drains every message currently queued from the reader task. Returns
/// `Some(reason)` if the remote cancelled, an error on a remote `error`
/// frame, otherwise `None`.
fn drain_incoming(
    rx: &mut mpsc::UnboundedReceiver<Message>,
    window: &mut HashMap<u64, WindowEntry>,
) -> Result<Option<Option<String>>, P2pError> {
    while let Ok(msg) = rx.try_recv() {
        match msg {
            Message::ChunkAck { seq, .. } => {
                window.remove(&seq);
            }
            Message::Error { message } => return Err(P2pError::RemoteError(message)),
            Message::Cancelled { reason } => return Ok(Some(reason)),
            Message::Pong { .. } => {}
            _ => {}
        }
    }
    Ok(None)
}

async fn wait_for_window_slot(
    rx: &mut mpsc::UnboundedReceiver<Message>,
    window: &mut HashMap<u64, WindowEntry>,
    max: usize,
) -> Result<(), P2pError> {
    let safety = Duration::from_secs(1);
    let deadline = Instant::now() + safety;
    while window.len() >= max && Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(50), rx.recv()).await {
            Ok(Some(Message::ChunkAck { seq, .. })) => {
                window.remove(&seq);
            }
            Ok(Some(Message::Error { message })) => return Err(P2pError::RemoteError(message)),
            Ok(Some(Message::Cancelled { reason })) => {
                return Err(P2pError::RemoteError(reason.unwrap_or_else(|| "cancelled".into())))
            }
            Ok(Some(_)) | Ok(None) => {}
            Err(_) => {}
        }
    }
    Ok(())
}

async fn notify_remote_cancel(conn: &Arc<dyn Connection>, reason: Option<String>) {
    let _ = conn
        .send(PeerMessage::Json(Message::Cancelled { reason }.to_json()))
        .await;
}

async fn send_end_with_retry(
    conn: &Arc<dyn Connection>,
    rx: &mut mpsc::UnboundedReceiver<Message>,
    opts: &SendOptions,
    total_chunks: u64,
) -> Result<u64, P2pError> {
    for attempt in 0..3u32 {
        conn.send(PeerMessage::Json(Message::End { attempt }.to_json()))
            .await
            .map_err(|e| P2pError::Network(e.to_string()))?;

        let scale = 1.5f64.powi(attempt as i32);
        let timeout = Duration::from_secs_f64(opts.end_ack_timeout.as_secs_f64() * scale);

        match tokio::time::timeout(timeout, wait_for_end_ack(rx)).await {
            Ok(Ok(received)) => return Ok(received),
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                warn!(attempt, "end_ack timed out, retrying");
                continue;
            }
        }
    }
    Err(P2pError::EndAckTimeout)
}

async fn wait_for_hello(rx: &mut mpsc::UnboundedReceiver<Message>) -> Result<u32, P2pError> {
    while let Some(msg) = rx.recv().await {
        match msg {
            Message::Hello { protocol_version, .. } => return Ok(protocol_version),
            Message::Error { message } => return Err(P2pError::RemoteError(message)),
            _ => continue,
        }
    }
    Err(P2pError::Network("connection closed during handshake".into()))
}

async fn wait_for_ready(
    rx: &mut mpsc::UnboundedReceiver<Message>,
    handle: &Arc<SenderHandle>,
) -> Result<(), P2pError> {
    while let Some(msg) = rx.recv().await {
        if handle.is_cancelled() {
            return Err(P2pError::Cancelled);
        }
        match msg {
            Message::Ready => return Ok(()),
            Message::Error { message } => return Err(P2pError::RemoteError(message)),
            _ => continue,
        }
    }
    Err(P2pError::Network("connection closed waiting for ready".into()))
}

async fn wait_for_end_ack(rx: &mut mpsc::UnboundedReceiver<Message>) -> Result<u64, P2pError> {
    while let Some(msg) = rx.recv().await {
        match msg {
            Message::EndAck { received, .. } => return Ok(received),
            Message::Error { message } => return Err(P2pError::RemoteError(message)),
            Message::Cancelled { reason } => return Err(P2pError::RemoteError(
                reason.unwrap_or_else(|| "cancelled".into()),
            )),
            _ => continue,
        }
    }
    Err(P2pError::Network("connection closed waiting for end_ack".into()))
}

fn spawn_reader(conn: Arc<dyn Connection>, tx: mpsc::UnboundedSender<Message>) {
    tokio::spawn(async move {
        while let Some(msg) = conn.recv().await {
            if let PeerMessage::Json(v) = msg {
                if let Some(parsed) = Message::from_json(&v) {
                    if tx.send(parsed).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn window_metrics_track_inserts_and_acks() {
        let handle = SenderHandle::new();
        let mut window: HashMap<u64, WindowEntry> = HashMap::new();
        window.insert(
            0,
            WindowEntry {
                offset: 0,
                size: 100,
                sent_at: Instant::now(),
            },
        );
        window.insert(
            1,
            WindowEntry {
                offset: 100,
                size: 50,
                sent_at: Instant::now(),
            },
        );
        publish_window_metrics(&handle, &window);
        assert_eq!(handle.window_len(), 2);
        assert_eq!(handle.in_flight_bytes(), 150);

        window.remove(&0);
        publish_window_metrics(&handle, &window);
        assert_eq!(handle.window_len(), 1);
        assert_eq!(handle.in_flight_bytes(), 50);
    }
}
