//! A privacy-focused ephemeral file transfer client. Exposes a [`Client`]
//! bound to one companion server, offering a chunked, optionally
//! end-to-end-encrypted hosted upload/download pair and a WebRTC-based
//! peer-to-peer transfer (see [`wisp_p2p`] for the P2P session engine,
//! re-exported here for convenience).

pub mod cancel;
pub mod client;
pub mod config;
pub mod download;
pub mod error;
pub mod p2p;
pub mod settings;
pub mod transport;
pub mod types;
pub mod upload;
pub mod url;

pub use cancel::CancelToken;
pub use client::Client;
pub use config::{ClientConfig, DownloadOptions, RetryConfig, UploadOptions, UploadTimeouts};
pub use download::DownloadOutcome;
pub use error::{Error, ErrorKind, Result};
pub use settings::{LifetimeUnit, PersistedSettings};
pub use transport::{Method, Transport};
pub use types::{
    Capabilities, ChunkRequest, CompatibilityResult, DownloadProgress, FileMetadata, ServerInfo,
    UploadProgress, UploadState,
};
pub use upload::{UploadOutcome, UploadSession};
pub use url::{build_base_url, check_version, parse_server_url, validate_plain_filename, ServerTarget};

/// WebRTC P2P transfer, re-exported at the crate root so callers don't
/// need a direct dependency on `wisp-p2p`.
pub use wisp_p2p;

/// The crypto primitives crate, re-exported for callers constructing
/// [`wisp_crypto::Key`] values directly (e.g. to pre-share a key).
pub use wisp_crypto;
