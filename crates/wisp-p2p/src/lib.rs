//! Peer-to-peer transfer session engine riding an injected data-channel
//! connection (see [`peer::Connection`] / [`peer::SignalingPeer`]). This
//! crate never touches a WebRTC stack directly: the host application
//! supplies the signalling and data channel, and this crate owns only the
//! framed protocol, state machine, and backpressure/ack bookkeeping on
//! top of it.

pub mod code;
pub mod config;
pub mod error;
pub mod peer;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod source;
pub mod state;

pub use code::{generate_code, normalize_and_validate};
pub use config::{ReceiveOptions, SendOptions};
pub use error::P2pError;
pub use peer::{Connection, PeerMessage, SignalingPeer};
pub use protocol::{Message, PROTOCOL_VERSION};
pub use receiver::{receive, NoopEvents as NoopReceiverEvents, ReceiveOutcome, ReceiverEvents, ReceiverHandle};
pub use sender::{send, NoopEvents as NoopSenderEvents, SendOutcome, SenderEvents, SenderHandle};
pub use source::{DataSink, DiskFileSource, FileSource, MemorySink, MemorySource};
pub use state::{CancelledBy, ReceiverState, SenderState};
