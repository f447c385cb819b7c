//! The chunked, optionally E2EE, hosted upload engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use wisp_p2p::FileSource;

use crate::cancel::CancelToken;
use crate::client::Client;
use crate::config::{UploadOptions, DEFAULT_CHUNK_SIZE};
use crate::error::Error;
use crate::transport::{JsonOrBytes, Method};
use crate::types::{
    UploadCancelRequest, UploadCompleteRequest, UploadCompleteResponse, UploadInitRequest,
    UploadInitResponse, UploadProgress, UploadState,
};

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub file_id: String,
    pub share_url: String,
}

const STATE_INITIALIZING: u8 = 0;
const STATE_UPLOADING: u8 = 1;
const STATE_COMPLETING: u8 = 2;
const STATE_COMPLETED: u8 = 3;
const STATE_CANCELLED: u8 = 4;
const STATE_ERROR: u8 = 5;

fn decode_state(v: u8) -> UploadState {
    match v {
        STATE_INITIALIZING => UploadState::Initializing,
        STATE_UPLOADING => UploadState::Uploading,
        STATE_COMPLETING => UploadState::Completing,
        STATE_COMPLETED => UploadState::Completed,
        STATE_CANCELLED => UploadState::Cancelled,
        _ => UploadState::Error,
    }
}

/// Handle returned immediately by [`upload_file`]; the transfer runs in a
/// background task. Dropping this handle does not cancel the upload — call
/// [`UploadSession::cancel`] explicitly.
pub struct UploadSession {
    state: Arc<AtomicU8>,
    cancel: CancelToken,
    task: JoinHandle<Result<UploadOutcome, Error>>,
}

impl UploadSession {
    pub fn status(&self) -> UploadState {
        decode_state(self.state.load(Ordering::SeqCst))
    }

    /// Transition to `cancelled`, abort in-flight I/O, and best-effort
    /// notify the server. A no-op once the session has already completed.
    pub fn cancel(&self) {
        if decode_state(self.state.load(Ordering::SeqCst)).is_terminal() {
            return;
        }
        self.cancel.cancel();
    }

    pub async fn result(self) -> Result<UploadOutcome, Error> {
        self.task
            .await
            .unwrap_or_else(|e| Err(Error::network("task_join_failed", e.to_string())))
    }
}

pub async fn upload_file(
    client: Arc<Client>,
    source: Arc<dyn FileSource>,
    opts: UploadOptions,
) -> Result<UploadSession, Error> {
    let state = Arc::new(AtomicU8::new(STATE_INITIALIZING));
    let cancel = crate::cancel::child_of(opts.signal.as_ref());

    let task_state = state.clone();
    let task_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        let result = run_upload(&client, source, opts, &task_state, &task_cancel).await;
        task_state.store(
            match &result {
                Ok(_) => STATE_COMPLETED,
                Err(e) if e.kind == crate::error::ErrorKind::Abort => STATE_CANCELLED,
                Err(_) => STATE_ERROR,
            },
            Ordering::SeqCst,
        );
        result
    });

    Ok(UploadSession {
        state,
        cancel,
        task,
    })
}

async fn run_upload(
    client: &Arc<Client>,
    source: Arc<dyn FileSource>,
    opts: UploadOptions,
    state: &Arc<AtomicU8>,
    cancel: &CancelToken,
) -> Result<UploadOutcome, Error> {
    let compat = client.connect().await?;
    if !compat.compatible {
        return Err(Error::validation(
            "incompatible_server",
            compat
                .message
                .unwrap_or_else(|| "client and server versions are incompatible".into()),
        ));
    }
    let caps = &compat.server_info.capabilities.upload;
    if !caps.enabled {
        return Err(Error::validation(
            "uploads_disabled",
            "Server does not support file uploads.",
        ));
    }

    let size = source.size();
    if size == 0 {
        return Err(Error::validation("empty_file", "file is empty"));
    }

    let encrypt = opts.encrypt.unwrap_or(caps.e2ee);
    if encrypt && !caps.e2ee {
        return Err(Error::validation(
            "e2ee_unsupported",
            "server does not support end-to-end encryption",
        ));
    }

    let chunk_size = client
        .config()
        .chunk_size_override
        .or(caps.chunk_size)
        .filter(|&c| c > 0)
        .unwrap_or(DEFAULT_CHUNK_SIZE);
    let total_chunks = size.div_ceil(chunk_size);

    if caps.max_size_mb > 0 {
        let overhead = if encrypt {
            total_chunks * wisp_crypto::CHUNK_OVERHEAD as u64
        } else {
            0
        };
        let estimated_total = size + overhead;
        let cap = caps.max_size_mb * 1_000_000;
        if estimated_total > cap {
            return Err(Error::validation(
                "file_too_large",
                format!("file of {estimated_total} bytes exceeds the server's {cap}-byte cap"),
            ));
        }
    }

    if caps.max_lifetime_hours == 0 {
        // unlimited is allowed regardless of requested lifetime
    } else {
        let cap_ms = caps.max_lifetime_hours * 3_600_000;
        if opts.lifetime_ms != 0 && opts.lifetime_ms > cap_ms {
            return Err(Error::validation(
                "lifetime_too_long",
                format!("lifetime of {}ms exceeds the server's {cap_ms}ms cap", opts.lifetime_ms),
            ));
        }
        if opts.lifetime_ms == 0 {
            return Err(Error::validation(
                "lifetime_required",
                "server does not support unlimited lifetime",
            ));
        }
    }

    let key = if encrypt {
        Some(wisp_crypto::generate_key())
    } else {
        None
    };

    let requested_name = opts
        .filename_override
        .clone()
        .unwrap_or_else(|| "file".to_string());
    let outbound_name = match &key {
        Some(key) => wisp_crypto::encrypt_filename_b64(&requested_name, key)?,
        None => {
            crate::url::validate_plain_filename(&requested_name)?;
            requested_name.clone()
        }
    };

    state.store(STATE_UPLOADING, Ordering::SeqCst);

    let upload_id = init_upload(
        client,
        &opts,
        &compat.base_url,
        &outbound_name,
        encrypt,
        size,
        total_chunks,
        cancel,
    )
    .await?;

    let chunk_result = run_chunk_loop(
        client,
        &opts,
        &compat.base_url,
        &upload_id,
        source.as_ref(),
        key.as_ref(),
        chunk_size,
        total_chunks,
        size,
        cancel,
    )
    .await;

    if let Err(e) = chunk_result {
        if e.kind == crate::error::ErrorKind::Abort {
            best_effort_cancel(client, &opts, &compat.base_url, &upload_id).await;
        }
        return Err(e);
    }

    state.store(STATE_COMPLETING, Ordering::SeqCst);
    let file_id = complete_upload(client, &opts, &compat.base_url, &upload_id, cancel).await?;

    let mut share_url = format!("{}/{}", compat.base_url, file_id);
    if let Some(key) = &key {
        share_url.push('#');
        share_url.push_str(&wisp_crypto::export_key_base64(key));
    }

    if let Some(cb) = &opts.on_progress {
        cb(UploadProgress::Done);
    }

    Ok(UploadOutcome { file_id, share_url })
}

#[allow(clippy::too_many_arguments)]
async fn init_upload(
    client: &Arc<Client>,
    opts: &UploadOptions,
    base_url: &str,
    filename: &str,
    is_encrypted: bool,
    total_size: u64,
    total_chunks: u64,
    cancel: &CancelToken,
) -> Result<String, Error> {
    let body = serde_json::to_value(UploadInitRequest {
        filename: filename.to_string(),
        lifetime: opts.lifetime_ms,
        is_encrypted,
        total_size,
        total_chunks,
        max_downloads: opts.max_downloads,
    })
    .expect("UploadInitRequest always serializes");

    let resp = client
        .transport()
        .fetch_json(
            Method::Post,
            &format!("{base_url}/upload/init"),
            Some(JsonOrBytes::Json(body)),
            &HashMap::new(),
            Duration::from_millis(opts.timeouts.init_ms),
            Some(cancel),
        )
        .await?;

    if !(200..300).contains(&resp.status) {
        return Err(Error::protocol(
            "init_failed",
            format!("upload/init returned {}", resp.status),
        )
        .with_details(resp.raw_text));
    }
    let json = resp
        .json
        .ok_or_else(|| Error::protocol("init_missing_body", "upload/init had no body"))?;
    let parsed: UploadInitResponse = serde_json::from_value(json)
        .map_err(|e| Error::protocol("init_malformed", format!("missing uploadId: {e}")))?;
    Ok(parsed.upload_id)
}

#[allow(clippy::too_many_arguments)]
async fn run_chunk_loop(
    client: &Arc<Client>,
    opts: &UploadOptions,
    base_url: &str,
    upload_id: &str,
    source: &dyn FileSource,
    key: Option<&wisp_crypto::Key>,
    chunk_size: u64,
    total_chunks: u64,
    total_size: u64,
    cancel: &CancelToken,
) -> Result<(), Error> {
    for index in 0..total_chunks {
        if cancel.is_cancelled() {
            return Err(Error::abort("upload_cancelled", "upload was cancelled"));
        }

        let start = index * chunk_size;
        let end = (start + chunk_size).min(total_size);
        let len = (end - start) as usize;

        if let Some(cb) = &opts.on_progress {
            cb(UploadProgress::Chunk {
                chunk_index: index,
                processed_bytes: start,
                percent: (index as f64 / total_chunks as f64) * 100.0,
            });
        }

        let plain = source
            .read_range(start, len)
            .await
            .map_err(|e| Error::network("read_failed", e.to_string()))?;

        let payload = match key {
            Some(key) => wisp_crypto::encrypt_chunk(&plain, key)?,
            None => plain,
        };

        if payload.len() as u64 > chunk_size + 1024 {
            return Err(Error::validation(
                "chunk_too_large",
                format!("encoded chunk {index} of {} bytes exceeds the {}-byte cap", payload.len(), chunk_size + 1024),
            ));
        }

        let hash = wisp_crypto::sha256_hex(&payload);
        send_chunk_with_retry(
            client, opts, base_url, upload_id, index, &payload, &hash, cancel,
        )
        .await?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn send_chunk_with_retry(
    client: &Arc<Client>,
    opts: &UploadOptions,
    base_url: &str,
    upload_id: &str,
    index: u64,
    payload: &[u8],
    hash: &str,
    cancel: &CancelToken,
) -> Result<(), Error> {
    let mut attempt = 0u32;
    let max_attempts = opts.retry.retries.max(1);
    let mut last_err: Option<Error> = None;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::abort("upload_cancelled", "upload was cancelled"));
        }
        attempt += 1;

        let mut headers = HashMap::new();
        headers.insert("X-Upload-ID".to_string(), upload_id.to_string());
        headers.insert("X-Chunk-Index".to_string(), index.to_string());
        headers.insert("X-Chunk-Hash".to_string(), hash.to_string());

        let result = client
            .transport()
            .fetch_json(
                Method::Post,
                &format!("{base_url}/upload/chunk"),
                Some(JsonOrBytes::Bytes(payload.to_vec())),
                &headers,
                Duration::from_millis(opts.timeouts.chunk_ms),
                Some(cancel),
            )
            .await;

        match result {
            Ok(resp) if (200..300).contains(&resp.status) => return Ok(()),
            Ok(resp) => {
                last_err = Some(
                    Error::protocol("chunk_rejected", format!("upload/chunk returned {}", resp.status))
                        .with_details(resp.raw_text),
                );
            }
            Err(e) if e.kind == crate::error::ErrorKind::Abort => return Err(e),
            Err(e) => last_err = Some(e),
        }

        if attempt >= max_attempts {
            break;
        }

        if let Some(cb) = &opts.on_progress {
            cb(UploadProgress::Retry {
                chunk_index: index,
                attempt,
            });
        }
        warn!(chunk = index, attempt, "chunk upload failed, backing off");
        wait_with_progress(opts, cancel, index, attempt).await?;
    }

    Err(last_err.unwrap_or_else(|| Error::network("chunk_failed", "chunk upload failed")))
}

async fn wait_with_progress(
    opts: &UploadOptions,
    cancel: &CancelToken,
    chunk_index: u64,
    attempt: u32,
) -> Result<(), Error> {
    let backoff_ms = (opts.retry.backoff_ms.saturating_mul(1u64 << (attempt - 1).min(20)))
        .min(opts.retry.max_backoff_ms);
    let mut remaining = backoff_ms;
    const TICK_MS: u64 = 100;

    while remaining > 0 {
        if cancel.is_cancelled() {
            return Err(Error::abort("upload_cancelled", "upload was cancelled"));
        }
        let step = remaining.min(TICK_MS);
        if let Some(cb) = &opts.on_progress {
            cb(UploadProgress::RetryWait {
                chunk_index,
                attempt,
                remaining_ms: remaining,
            });
        }
        tokio::time::sleep(Duration::from_millis(step)).await;
        remaining -= step;
    }
    Ok(())
}

async fn complete_upload(
    client: &Arc<Client>,
    opts: &UploadOptions,
    base_url: &str,
    upload_id: &str,
    cancel: &CancelToken,
) -> Result<String, Error> {
    let body = serde_json::to_value(UploadCompleteRequest {
        upload_id: upload_id.to_string(),
    })
    .expect("UploadCompleteRequest always serializes");

    let resp = client
        .transport()
        .fetch_json(
            Method::Post,
            &format!("{base_url}/upload/complete"),
            Some(JsonOrBytes::Json(body)),
            &HashMap::new(),
            Duration::from_millis(opts.timeouts.complete_ms),
            Some(cancel),
        )
        .await?;

    if !(200..300).contains(&resp.status) {
        return Err(Error::protocol(
            "complete_failed",
            format!("upload/complete returned {}", resp.status),
        )
        .with_details(resp.raw_text));
    }
    let json = resp
        .json
        .ok_or_else(|| Error::protocol("complete_missing_body", "upload/complete had no body"))?;
    let parsed: UploadCompleteResponse = serde_json::from_value(json)
        .map_err(|e| Error::protocol("complete_malformed", format!("missing id: {e}")))?;
    Ok(parsed.id)
}

async fn best_effort_cancel(client: &Arc<Client>, opts: &UploadOptions, base_url: &str, upload_id: &str) {
    let _ = opts;
    let body = serde_json::to_value(UploadCancelRequest {
        upload_id: upload_id.to_string(),
    })
    .expect("UploadCancelRequest always serializes");
    let result = client
        .transport()
        .fetch_json(
            Method::Post,
            &format!("{base_url}/upload/cancel"),
            Some(JsonOrBytes::Json(body)),
            &HashMap::new(),
            Duration::from_secs(5),
            None,
        )
        .await;
    if let Err(e) = result {
        debug!(error = %e, upload_id, "best-effort upload/cancel failed, ignoring");
    }
}
