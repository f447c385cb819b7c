//! HTTP transport: two primitives over a pluggable client, so tests can
//! substitute a fake without touching the network. Timeout and parent
//! cancellation are composed at every call site per the suspension-point
//! contract: a timer always clears on exit, and an abort surfaces as
//! [`crate::error::ErrorKind::Abort`] while timer expiry surfaces as
//! [`crate::error::ErrorKind::Timeout`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;

use crate::cancel::CancelToken;
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct JsonResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub json: Option<serde_json::Value>,
    pub raw_text: String,
}

pub type ByteStream = BoxStream<'static, Result<Bytes, Error>>;

/// The pluggable transport seam (mirrors the spec's `fetchFn` adapter).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch_json(
        &self,
        method: Method,
        url: &str,
        body: Option<JsonOrBytes>,
        headers: &HashMap<String, String>,
        timeout: Duration,
        parent_cancel: Option<&CancelToken>,
    ) -> Result<JsonResponse, Error>;

    async fn fetch_stream(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        timeout: Duration,
        parent_cancel: Option<&CancelToken>,
    ) -> Result<ByteStream, Error>;
}

pub enum JsonOrBytes {
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

/// Default [`Transport`] backed by `reqwest`.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

async fn race<T>(
    fut: impl std::future::Future<Output = Result<T, Error>>,
    timeout: Duration,
    parent_cancel: Option<&CancelToken>,
) -> Result<T, Error> {
    let cancel_wait = async {
        match parent_cancel {
            Some(token) => token.cancelled().await,
            None => futures::future::pending::<()>().await,
        }
    };
    tokio::select! {
        res = fut => res,
        _ = tokio::time::sleep(timeout) => Err(Error::timeout("request_timeout", "request timed out")),
        _ = cancel_wait => Err(Error::abort("request_aborted", "request was cancelled")),
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn fetch_json(
        &self,
        method: Method,
        url: &str,
        body: Option<JsonOrBytes>,
        headers: &HashMap<String, String>,
        timeout: Duration,
        parent_cancel: Option<&CancelToken>,
    ) -> Result<JsonResponse, Error> {
        let client = self.client.clone();
        let url = url.to_string();
        let headers = headers.clone();
        let fut = async move {
            let mut builder = match method {
                Method::Get => client.get(&url),
                Method::Post => client.post(&url),
            };
            for (k, v) in &headers {
                builder = builder.header(k, v);
            }
            builder = match body {
                Some(JsonOrBytes::Json(v)) => builder.json(&v),
                Some(JsonOrBytes::Bytes(b)) => builder
                    .header("Content-Type", "application/octet-stream")
                    .body(b),
                None => builder,
            };
            let resp = builder
                .send()
                .await
                .map_err(|e| Error::network("request_failed", e.to_string()))?;

            let status = resp.status().as_u16();
            let headers = resp
                .headers()
                .iter()
                .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
                .collect();
            let raw_text = resp
                .text()
                .await
                .map_err(|e| Error::network("body_read_failed", e.to_string()))?;
            let json = if raw_text.trim().is_empty() {
                None
            } else {
                serde_json::from_str(&raw_text).unwrap_or(None)
            };

            Ok(JsonResponse {
                status,
                headers,
                json,
                raw_text,
            })
        };
        race(fut, timeout, parent_cancel).await
    }

    async fn fetch_stream(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        timeout: Duration,
        parent_cancel: Option<&CancelToken>,
    ) -> Result<ByteStream, Error> {
        let client = self.client.clone();
        let url = url.to_string();
        let headers = headers.clone();
        let fut = async move {
            let mut builder = client.get(&url);
            for (k, v) in &headers {
                builder = builder.header(k, v);
            }
            let resp = builder
                .send()
                .await
                .map_err(|e| Error::network("request_failed", e.to_string()))?;
            if !resp.status().is_success() {
                return Err(Error::protocol(
                    "bad_status",
                    format!("unexpected status {}", resp.status()),
                ));
            }
            let stream = resp
                .bytes_stream()
                .map(|r| r.map_err(|e| Error::network("stream_read_failed", e.to_string())));
            Ok(Box::pin(stream) as ByteStream)
        };
        race(fut, timeout, parent_cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parent_cancel_surfaces_abort() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let fut = futures::future::pending::<Result<(), Error>>();
        let result = race(fut, Duration::from_secs(5), Some(&cancel)).await;
        assert!(matches!(
            result.unwrap_err().kind,
            crate::error::ErrorKind::Abort
        ));
    }

    #[tokio::test]
    async fn timeout_fires_before_a_never_resolving_future() {
        let fut = futures::future::pending::<Result<(), Error>>();
        let result = race(fut, Duration::from_millis(5), None).await;
        assert!(matches!(
            result.unwrap_err().kind,
            crate::error::ErrorKind::Timeout
        ));
    }
}
