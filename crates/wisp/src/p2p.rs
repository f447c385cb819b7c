//! Thin `Client`-level wrappers around `wisp_p2p::{send, receive}`: drive
//! capability negotiation first (mirrors the upload/download engines),
//! then hand off to the P2P session engine. The signalling peer itself
//! remains caller-injected, per spec — this crate never opens a socket.

use std::sync::Arc;

use wisp_p2p::{
    DataSink, FileSource, P2pError, ReceiveOptions, ReceiverEvents, ReceiverHandle,
    ReceiveOutcome, SendOptions, SenderEvents, SenderHandle, SendOutcome, SignalingPeer,
};

use crate::client::Client;
use crate::error::Error;

impl Client {
    /// `p2p_send`: validate the server advertises P2P support, then run
    /// the sender state machine to completion. `handle` should be
    /// constructed by the caller (via [`SenderHandle::new`]) so it can be
    /// polled for status or cancelled mid-transfer.
    pub async fn p2p_send(
        self: &Arc<Self>,
        peer: Arc<dyn SignalingPeer>,
        file: Arc<dyn FileSource>,
        file_name: String,
        opts: SendOptions,
        events: Arc<dyn SenderEvents>,
        handle: Arc<SenderHandle>,
    ) -> Result<SendOutcome, Error> {
        self.check_p2p_enabled().await?;
        wisp_p2p::sender::send(peer, file, file_name, opts, events, handle)
            .await
            .map_err(Error::from)
    }

    /// `p2p_receive`: validate P2P support, then dial `code` and run the
    /// receiver state machine to completion, delivering bytes to `sink`.
    pub async fn p2p_receive(
        self: &Arc<Self>,
        peer: Arc<dyn SignalingPeer>,
        code: &str,
        sink: Arc<dyn DataSink>,
        opts: ReceiveOptions,
        events: Arc<dyn ReceiverEvents>,
        handle: Arc<ReceiverHandle>,
    ) -> Result<ReceiveOutcome, Error> {
        self.check_p2p_enabled().await?;
        let code = wisp_p2p::normalize_and_validate(code)
            .ok_or_else(|| Error::validation("invalid_sharing_code", "sharing code is malformed"))?;
        wisp_p2p::receiver::receive(peer, &code, sink, opts, events, handle)
            .await
            .map_err(Error::from)
    }

    async fn check_p2p_enabled(self: &Arc<Self>) -> Result<(), Error> {
        let compat = self.connect().await?;
        if !compat.server_info.capabilities.p2p.enabled {
            return Err(Error::validation(
                "p2p_disabled",
                "Server does not support peer-to-peer transfers.",
            ));
        }
        Ok(())
    }
}

/// Surfaced so a host can report a rejected collision attempt distinctly
/// from other network failures, without matching on `Error::message`.
pub fn is_busy(err: &P2pError) -> bool {
    matches!(err, P2pError::Busy)
}
