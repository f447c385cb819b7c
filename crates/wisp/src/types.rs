//! Wire-facing and session data types.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct UploadCapabilities {
    pub enabled: bool,
    #[serde(rename = "maxSizeMB")]
    pub max_size_mb: u64,
    #[serde(rename = "maxLifetimeHours")]
    pub max_lifetime_hours: u64,
    #[serde(rename = "maxFileDownloads")]
    pub max_file_downloads: u32,
    pub e2ee: bool,
    #[serde(rename = "chunkSize")]
    pub chunk_size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct P2pCapabilities {
    pub enabled: bool,
    #[serde(rename = "peerjsPath")]
    pub peerjs_path: Option<String>,
    #[serde(rename = "iceServers", default)]
    pub ice_servers: Vec<serde_json::Value>,
    #[serde(rename = "peerjsDebugLogging", default)]
    pub peerjs_debug_logging: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebUiCapabilities {
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Capabilities {
    pub upload: UploadCapabilities,
    pub p2p: P2pCapabilities,
    #[serde(rename = "webUI")]
    pub web_ui: WebUiCapabilities,
}

/// Snapshot of `GET /api/info`. Immutable once received; cached on the
/// [`crate::Client`] for its lifetime.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub version: String,
    pub capabilities: Capabilities,
}

/// Cached, derived compatibility result. Invalidated only by [`crate::Client`]
/// destruction.
#[derive(Debug, Clone)]
pub struct CompatibilityResult {
    pub compatible: bool,
    pub client_version: String,
    pub server_version: String,
    pub message: Option<String>,
    pub server_info: ServerInfo,
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadInitRequest {
    pub filename: String,
    pub lifetime: u64,
    #[serde(rename = "isEncrypted")]
    pub is_encrypted: bool,
    #[serde(rename = "totalSize")]
    pub total_size: u64,
    #[serde(rename = "totalChunks")]
    pub total_chunks: u64,
    #[serde(rename = "maxDownloads", skip_serializing_if = "Option::is_none")]
    pub max_downloads: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadInitResponse {
    #[serde(rename = "uploadId")]
    pub upload_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadCompleteRequest {
    #[serde(rename = "uploadId")]
    pub upload_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadCompleteResponse {
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadCancelRequest {
    #[serde(rename = "uploadId")]
    pub upload_id: String,
}

/// One chunk transmitted during an upload. `payload_hash_hex` is computed
/// over the bytes actually sent (post-encryption if E2EE). `index` values
/// appear in strictly ascending, contiguous order.
#[derive(Debug, Clone)]
pub struct ChunkRequest {
    pub upload_id: String,
    pub index: u64,
    pub payload_hash_hex: String,
    pub body: Vec<u8>,
}

/// `GET /api/file/<id>/meta`. Exactly one of `filename`/`encrypted_filename`
/// is populated, matching `is_encrypted`.
#[derive(Debug, Clone, Deserialize)]
pub struct FileMetadata {
    #[serde(rename = "isEncrypted")]
    pub is_encrypted: bool,
    #[serde(rename = "sizeBytes")]
    pub size_bytes: u64,
    pub filename: Option<String>,
    #[serde(rename = "encryptedFilename")]
    pub encrypted_filename: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveRequest {
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolveResponse {
    pub valid: bool,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub target: Option<String>,
    pub reason: Option<String>,
}

/// Upload session lifecycle. Any non-terminal state may move to
/// `Cancelled` or `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Initializing,
    Uploading,
    Completing,
    Completed,
    Cancelled,
    Error,
}

impl UploadState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadState::Completed | UploadState::Cancelled | UploadState::Error
        )
    }
}

/// A progress event delivered during upload. `percent` is index-based
/// (`chunk_index / total_chunks * 100`), per the documented design
/// decision — see `DESIGN.md`.
#[derive(Debug, Clone)]
pub enum UploadProgress {
    Chunk {
        chunk_index: u64,
        processed_bytes: u64,
        percent: f64,
    },
    RetryWait {
        chunk_index: u64,
        attempt: u32,
        remaining_ms: u64,
    },
    Retry {
        chunk_index: u64,
        attempt: u32,
    },
    Done,
}

/// A progress event delivered during download. Bytes are counted from the
/// network, not post-decryption, for a stable progress axis.
#[derive(Debug, Clone, Copy)]
pub struct DownloadProgress {
    pub received_bytes: u64,
    pub total_bytes: u64,
}
