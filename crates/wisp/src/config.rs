//! Client and per-operation configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::transport::Transport;

/// Per-phase upload timeouts, all overridable.
#[derive(Debug, Clone, Copy)]
pub struct UploadTimeouts {
    pub server_info_ms: u64,
    pub init_ms: u64,
    pub chunk_ms: u64,
    pub complete_ms: u64,
}

impl Default for UploadTimeouts {
    fn default() -> Self {
        Self {
            server_info_ms: 5_000,
            init_ms: 15_000,
            chunk_ms: 60_000,
            complete_ms: 30_000,
        }
    }
}

/// Chunk retry policy: exponential backoff starting at `backoff_ms`,
/// capped by `max_backoff_ms`, up to `retries` attempts total.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub retries: u32,
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 5,
            backoff_ms: 1_000,
            max_backoff_ms: 30_000,
        }
    }
}

/// Default client-side chunk size (5 MiB), used only when the server does
/// not advertise a `chunkSize`.
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// A file at exactly this size with no `on_data` sink is the largest
/// allowed in-memory download.
pub const MAX_IN_MEMORY_DOWNLOAD_BYTES: u64 = 100 * 1024 * 1024;

/// Client-wide configuration. `client_version` and `server` are required;
/// everything else has spec-documented defaults.
#[derive(Clone)]
pub struct ClientConfig {
    pub client_version: String,
    pub server: String,
    pub chunk_size_override: Option<u64>,
    pub fallback_to_http: bool,
    pub transport: Arc<dyn Transport>,
    pub connect_timeout_ms: u64,
}

impl ClientConfig {
    pub fn new(client_version: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            client_version: client_version.into(),
            server: server.into(),
            chunk_size_override: None,
            fallback_to_http: false,
            transport: Arc::new(crate::transport::ReqwestTransport::new()),
            connect_timeout_ms: 3_000,
        }
    }

    /// A config aimed at a plaintext `localhost` companion server, with
    /// HTTPS→HTTP fallback enabled — handy for local development.
    pub fn local(client_version: impl Into<String>, port: u16) -> Self {
        let mut cfg = Self::new(client_version, format!("http://localhost:{port}"));
        cfg.fallback_to_http = true;
        cfg
    }

    /// A config for tests: a fixed small chunk size and a caller-supplied
    /// transport double.
    pub fn insecure_for_tests(
        client_version: impl Into<String>,
        server: impl Into<String>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let mut cfg = Self::new(client_version, server);
        cfg.transport = transport;
        cfg.chunk_size_override = Some(64 * 1024);
        cfg
    }
}

#[derive(Clone, Default)]
pub struct UploadOptions {
    pub lifetime_ms: u64,
    pub encrypt: Option<bool>,
    pub max_downloads: Option<u32>,
    pub filename_override: Option<String>,
    pub timeouts: UploadTimeouts,
    pub retry: RetryConfig,
    pub signal: Option<CancelToken>,
    pub on_progress: Option<Arc<dyn Fn(crate::types::UploadProgress) + Send + Sync>>,
}

impl std::fmt::Debug for UploadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadOptions")
            .field("lifetime_ms", &self.lifetime_ms)
            .field("encrypt", &self.encrypt)
            .field("max_downloads", &self.max_downloads)
            .field("filename_override", &self.filename_override)
            .field("timeouts", &self.timeouts)
            .field("retry", &self.retry)
            .field("has_progress_callback", &self.on_progress.is_some())
            .finish()
    }
}

#[derive(Clone, Default)]
pub struct DownloadOptions {
    pub file_id: String,
    pub key_b64: Option<String>,
    pub timeout_ms: Option<u64>,
    pub signal: Option<CancelToken>,
}

impl std::fmt::Debug for DownloadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadOptions")
            .field("file_id", &self.file_id)
            .field("has_key", &self.key_b64.is_some())
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}
