//! Streaming, decrypting download pipeline with an in-memory size guard.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use wisp_p2p::DataSink;

use crate::cancel::CancelToken;
use crate::client::Client;
use crate::config::{DownloadOptions, MAX_IN_MEMORY_DOWNLOAD_BYTES};
use crate::error::Error;
use crate::transport::Method;
use crate::types::{DownloadProgress, FileMetadata};

#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub filename: String,
    pub received_bytes: u64,
    pub was_encrypted: bool,
    pub data: Option<Vec<u8>>,
}

/// An in-memory sink used when the caller doesn't supply one; its
/// contents become [`DownloadOutcome::data`].
struct BufferingSink(tokio::sync::Mutex<Vec<u8>>);

#[async_trait::async_trait]
impl DataSink for BufferingSink {
    async fn write(&self, data: &[u8]) -> std::io::Result<()> {
        self.0.lock().await.extend_from_slice(data);
        Ok(())
    }
}

pub async fn download_file(
    client: Arc<Client>,
    opts: DownloadOptions,
    sink: Option<Arc<dyn DataSink>>,
    on_progress: Option<Arc<dyn Fn(DownloadProgress) + Send + Sync>>,
) -> Result<DownloadOutcome, Error> {
    let compat = client.connect().await?;
    let cancel = crate::cancel::child_of(opts.signal.as_ref());
    let timeout_ms = opts.timeout_ms.unwrap_or(60_000);

    let meta = fetch_metadata(&client, &compat.base_url, &opts.file_id, timeout_ms, &cancel).await?;

    let buffering = sink.is_none();
    if buffering && meta.size_bytes > MAX_IN_MEMORY_DOWNLOAD_BYTES {
        return Err(Error::validation(
            "download_too_large",
            format!(
                "file is {} bytes, exceeding the {}-byte in-memory cap with no sink supplied",
                meta.size_bytes, MAX_IN_MEMORY_DOWNLOAD_BYTES
            ),
        ));
    }
    let mut local_buffer: Option<Arc<BufferingSink>> = None;
    let sink: Arc<dyn DataSink> = match sink {
        Some(s) => s,
        None => {
            let b = Arc::new(BufferingSink(tokio::sync::Mutex::new(Vec::new())));
            local_buffer = Some(b.clone());
            b
        }
    };

    let (filename, key) = if meta.is_encrypted {
        let key_b64 = opts.key_b64.as_ref().ok_or_else(|| {
            Error::validation("missing_key", "file is encrypted but no key was supplied")
        })?;
        let key = wisp_crypto::import_key_base64(key_b64)?;
        let encrypted_name = meta.encrypted_filename.as_deref().ok_or_else(|| {
            Error::protocol("missing_encrypted_filename", "metadata omitted encryptedFilename")
        })?;
        let name = wisp_crypto::decrypt_filename_b64(encrypted_name, &key).map_err(|_| {
            Error::crypto("filename_decrypt_failed", "Failed to decrypt filename, check the key")
        })?;
        (name, Some(key))
    } else {
        let name = meta
            .filename
            .clone()
            .ok_or_else(|| Error::protocol("missing_filename", "metadata omitted filename"))?;
        (name, None)
    };

    let chunk_unit = compat
        .server_info
        .capabilities
        .upload
        .chunk_size
        .filter(|&c| c > 0)
        .unwrap_or(crate::config::DEFAULT_CHUNK_SIZE)
        + wisp_crypto::CHUNK_OVERHEAD as u64;

    let received = stream_body(
        &client,
        &compat.base_url,
        &opts.file_id,
        timeout_ms,
        &cancel,
        sink.as_ref(),
        key.as_ref(),
        chunk_unit,
        meta.size_bytes,
        on_progress.as_deref(),
    )
    .await?;

    let data = match local_buffer {
        Some(b) => Some(b.0.lock().await.clone()),
        None => None,
    };

    Ok(DownloadOutcome {
        filename,
        received_bytes: received,
        was_encrypted: meta.is_encrypted,
        data,
    })
}

async fn fetch_metadata(
    client: &Arc<Client>,
    base_url: &str,
    file_id: &str,
    timeout_ms: u64,
    cancel: &CancelToken,
) -> Result<FileMetadata, Error> {
    let url = format!("{base_url}/api/file/{file_id}/meta");
    let resp = client
        .transport()
        .fetch_json(
            Method::Get,
            &url,
            None,
            &HashMap::new(),
            Duration::from_millis(timeout_ms),
            Some(cancel),
        )
        .await?;

    if resp.status == 404 {
        return Err(Error::protocol(
            "file_not_found",
            "File not found or has expired.",
        ));
    }
    if !(200..300).contains(&resp.status) {
        return Err(Error::protocol(
            "meta_bad_status",
            format!("metadata fetch returned {}", resp.status),
        ));
    }
    let json = resp
        .json
        .ok_or_else(|| Error::protocol("meta_missing_body", "metadata response had no body"))?;
    serde_json::from_value(json)
        .map_err(|e| Error::protocol("meta_malformed", format!("malformed metadata: {e}")))
}

#[allow(clippy::too_many_arguments)]
async fn stream_body(
    client: &Arc<Client>,
    base_url: &str,
    file_id: &str,
    timeout_ms: u64,
    cancel: &CancelToken,
    sink: &dyn DataSink,
    key: Option<&wisp_crypto::Key>,
    chunk_unit: u64,
    total_size: u64,
    on_progress: Option<&(dyn Fn(DownloadProgress) + Send + Sync)>,
) -> Result<u64, Error> {
    let url = format!("{base_url}/api/file/{file_id}");
    let mut stream = client
        .transport()
        .fetch_stream(&url, &HashMap::new(), Duration::from_millis(timeout_ms), Some(cancel))
        .await?;

    let mut received: u64 = 0;
    let mut pending: VecDeque<Bytes> = VecDeque::new();
    let mut pending_len: u64 = 0;

    while let Some(frame) = stream.next().await {
        if cancel.is_cancelled() {
            return Err(Error::abort("download_cancelled", "download was cancelled"));
        }
        let frame = frame?;
        received += frame.len() as u64;

        match key {
            None => {
                sink.write(&frame)
                    .await
                    .map_err(|e| Error::network("sink_write_failed", e.to_string()))?;
            }
            Some(key) => {
                pending.push_back(frame);
                pending_len += pending.back().unwrap().len() as u64;
                while pending_len >= chunk_unit {
                    let unit = take_unit(&mut pending, &mut pending_len, chunk_unit);
                    let plain = wisp_crypto::decrypt_chunk(&unit, key)?;
                    sink.write(&plain)
                        .await
                        .map_err(|e| Error::network("sink_write_failed", e.to_string()))?;
                }
            }
        }

        if let Some(cb) = on_progress {
            cb(DownloadProgress {
                received_bytes: received,
                total_bytes: total_size,
            });
        }
    }

    if let Some(key) = key {
        if pending_len > 0 {
            let residual = drain_all(&mut pending, pending_len);
            let plain = wisp_crypto::decrypt_chunk(&residual, key)?;
            sink.write(&plain)
                .await
                .map_err(|e| Error::network("sink_write_failed", e.to_string()))?;
        }
    }

    Ok(received)
}

/// Pull exactly `unit` bytes off the front of `pending`, splitting the
/// final contributing frame rather than copying whole frames that
/// straddle the boundary.
fn take_unit(pending: &mut VecDeque<Bytes>, pending_len: &mut u64, unit: u64) -> Bytes {
    if let Some(front) = pending.front() {
        let front_len = front.len() as u64;
        if front_len == unit {
            *pending_len -= unit;
            return pending.pop_front().unwrap();
        }
        if front_len > unit {
            let front = pending.pop_front().unwrap();
            let head = front.slice(0..unit as usize);
            let tail = front.slice(unit as usize..);
            pending.push_front(tail);
            *pending_len -= unit;
            return head;
        }
    }

    let mut buf = BytesMut::with_capacity(unit as usize);
    while (buf.len() as u64) < unit {
        let front = pending.pop_front().expect("pending_len tracked the queue accurately");
        let need = unit - buf.len() as u64;
        if (front.len() as u64) <= need {
            buf.extend_from_slice(&front);
        } else {
            buf.extend_from_slice(&front[..need as usize]);
            pending.push_front(front.slice(need as usize..));
        }
    }
    *pending_len -= unit;
    buf.freeze()
}

fn drain_all(pending: &mut VecDeque<Bytes>, total_len: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(total_len as usize);
    while let Some(frame) = pending.pop_front() {
        buf.extend_from_slice(&frame);
    }
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_unit_splits_a_frame_that_straddles_the_boundary() {
        let mut pending = VecDeque::from([Bytes::from_static(b"0123456789")]);
        let mut len = 10u64;
        let unit = take_unit(&mut pending, &mut len, 4);
        assert_eq!(&unit[..], b"0123");
        assert_eq!(len, 6);
        assert_eq!(pending.len(), 1);
        assert_eq!(&pending[0][..], b"456789");
    }

    #[test]
    fn take_unit_coalesces_multiple_small_frames() {
        let mut pending = VecDeque::from([
            Bytes::from_static(b"ab"),
            Bytes::from_static(b"cd"),
            Bytes::from_static(b"ef"),
        ]);
        let mut len = 6u64;
        let unit = take_unit(&mut pending, &mut len, 5);
        assert_eq!(&unit[..], b"abcde");
        assert_eq!(len, 1);
        assert_eq!(&pending[0][..], b"f");
    }

    #[test]
    fn take_unit_does_not_copy_an_exact_sized_frame() {
        let mut pending = VecDeque::from([Bytes::from_static(b"wxyz")]);
        let mut len = 4u64;
        let unit = take_unit(&mut pending, &mut len, 4);
        assert_eq!(&unit[..], b"wxyz");
        assert_eq!(len, 0);
        assert!(pending.is_empty());
    }

    #[test]
    fn drain_all_concatenates_remaining_frames() {
        let mut pending = VecDeque::from([Bytes::from_static(b"foo"), Bytes::from_static(b"bar")]);
        let residual = drain_all(&mut pending, 6);
        assert_eq!(&residual[..], b"foobar");
    }
}
