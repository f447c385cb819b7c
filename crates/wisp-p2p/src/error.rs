use thiserror::Error;

/// P2P-session failures. Folds into the crate-level `wisp::Error::Network`
/// (or `Abort`, for cancellation) at the point the session surfaces to a
/// caller.
#[derive(Error, Debug, Clone)]
pub enum P2pError {
    #[error("protocol version mismatch: local={local} remote={remote}")]
    VersionMismatch { local: u32, remote: u32 },

    #[error("handshake did not complete in time")]
    HandshakeTimeout,

    #[error("{0}")]
    Network(String),

    #[error("transfer already in progress")]
    Busy,

    #[error("peer reported an error: {0}")]
    RemoteError(String),

    #[error("end-of-transfer acknowledgement was never received")]
    EndAckTimeout,

    #[error("connection timed out")]
    Watchdog,

    #[error("operation was cancelled")]
    Cancelled,

    #[error("received total {received} does not match expected {expected}")]
    CountMismatch { received: u64, expected: u64 },

    #[error("illegal state transition from {from} to {to}")]
    IllegalTransition { from: &'static str, to: &'static str },
}
