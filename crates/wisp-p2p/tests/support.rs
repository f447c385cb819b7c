//! In-memory [`SignalingPeer`]/[`Connection`] test doubles: a pair of
//! crossed `tokio::mpsc` channels stand in for a WebRTC data channel, and
//! a shared registry stands in for the signalling server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use wisp_p2p::{Connection, PeerMessage, P2pError, SignalingPeer};

struct ChannelConnection {
    tx: mpsc::UnboundedSender<PeerMessage>,
    rx: Mutex<mpsc::UnboundedReceiver<PeerMessage>>,
    buffered: AtomicUsize,
}

#[async_trait]
impl Connection for ChannelConnection {
    async fn send(&self, msg: PeerMessage) -> Result<(), P2pError> {
        self.tx
            .send(msg)
            .map_err(|_| P2pError::Network("peer channel closed".into()))
    }

    async fn recv(&self) -> Option<PeerMessage> {
        self.rx.lock().await.recv().await
    }

    fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }

    fn set_buffered_amount_low_threshold(&self, _threshold: usize) {}

    async fn buffered_amount_low(&self, _timeout: Duration) -> bool {
        true
    }

    fn close(&self) {}
}

fn make_pair() -> (Box<dyn Connection>, Box<dyn Connection>) {
    let (tx_a, rx_b) = mpsc::unbounded_channel();
    let (tx_b, rx_a) = mpsc::unbounded_channel();
    let a = ChannelConnection {
        tx: tx_a,
        rx: Mutex::new(rx_a),
        buffered: AtomicUsize::new(0),
    };
    let b = ChannelConnection {
        tx: tx_b,
        rx: Mutex::new(rx_b),
        buffered: AtomicUsize::new(0),
    };
    (Box::new(a), Box::new(b))
}

/// Shared in-memory signalling registry, standing in for the hosted
/// signalling server both sides would otherwise dial through.
#[derive(Default)]
pub struct InMemoryHub {
    listening: Mutex<HashMap<String, mpsc::UnboundedSender<Box<dyn Connection>>>>,
}

pub struct HubPeer {
    hub: Arc<InMemoryHub>,
    accept_rx: Mutex<Option<mpsc::UnboundedReceiver<Box<dyn Connection>>>>,
}

impl HubPeer {
    pub fn new(hub: Arc<InMemoryHub>) -> Arc<Self> {
        Arc::new(Self {
            hub,
            accept_rx: Mutex::new(None),
        })
    }
}

#[async_trait]
impl SignalingPeer for HubPeer {
    async fn listen(&self, code: &str) -> Result<(), P2pError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.hub.listening.lock().await.insert(code.to_string(), tx);
        *self.accept_rx.lock().await = Some(rx);
        Ok(())
    }

    async fn accept(&self) -> Option<Box<dyn Connection>> {
        let mut guard = self.accept_rx.lock().await;
        guard.as_mut()?.recv().await
    }

    async fn dial(&self, code: &str) -> Result<Box<dyn Connection>, P2pError> {
        let tx = self
            .hub
            .listening
            .lock()
            .await
            .get(code)
            .cloned()
            .ok_or_else(|| P2pError::Network(format!("no listener for code {code}")))?;
        let (local, remote) = make_pair();
        tx.send(remote)
            .map_err(|_| P2pError::Network("listener gone".into()))?;
        Ok(local)
    }

    fn destroy(&self) {}
}
