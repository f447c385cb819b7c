//! The signalling peer is a third-party object (in the original product, a
//! PeerJS wrapper) that sets up a WebRTC data channel out of band. This
//! crate never speaks WebRTC/ICE/STUN itself — it consumes this trait, and
//! tests satisfy it with an in-memory double (see `tests/support.rs`).

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::P2pError;

/// A single message exchanged over the data channel: either a control
/// message (JSON) or the raw binary payload of a previously announced
/// chunk header. Framing order (header then binary) is enforced by the
/// sender/receiver state machines, not by this trait.
#[derive(Debug, Clone)]
pub enum PeerMessage {
    Json(serde_json::Value),
    Binary(Bytes),
}

/// One established data-channel connection, from either side.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Send a message. Resolves once handed to the underlying channel (not
    /// necessarily once it reaches the remote side).
    async fn send(&self, msg: PeerMessage) -> Result<(), P2pError>;

    /// Wait for the next inbound message, or `None` once the channel
    /// closes (mirrors a `close` event).
    async fn recv(&self) -> Option<PeerMessage>;

    /// Current `bufferedAmount` of the underlying data channel.
    fn buffered_amount(&self) -> usize;

    /// Install `bufferedamountlow`'s threshold.
    fn set_buffered_amount_low_threshold(&self, threshold: usize);

    /// Wait for a `bufferedamountlow` event, or time out (the sender loop
    /// treats a timeout as a fallback poll tick, not an error).
    async fn buffered_amount_low(&self, timeout: std::time::Duration) -> bool;

    /// Best-effort close; mirrors the `close` event firing locally too.
    fn close(&self);
}

/// The injected signalling object. A sender calls [`listen`] to reserve a
/// sharing code and wait for exactly one active connection; a receiver
/// calls [`dial`] to connect to a sender by code.
///
/// [`listen`]: SignalingPeer::listen
/// [`dial`]: SignalingPeer::dial
#[async_trait]
pub trait SignalingPeer: Send + Sync {
    /// Register under `code`. Resolves once the peer object reports
    /// `open`; errors (e.g. code collision) are the caller's cue to
    /// regenerate the code and retry.
    async fn listen(&self, code: &str) -> Result<(), P2pError>;

    /// Wait for the next incoming connection while listening.
    async fn accept(&self) -> Option<Box<dyn Connection>>;

    /// Dial a listening peer by sharing code.
    async fn dial(&self, code: &str) -> Result<Box<dyn Connection>, P2pError>;

    /// Tear down the underlying peer object.
    fn destroy(&self);
}
