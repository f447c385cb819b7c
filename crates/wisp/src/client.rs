//! The `Client`: capability negotiation, and the entry points for upload,
//! download, and resolve. Upload/download engines live in their own
//! modules and borrow the client for transport + base URL only.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OnceCell};
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::config::{ClientConfig, DownloadOptions, UploadOptions};
use crate::download::{self, DownloadOutcome};
use crate::error::Error;
use crate::transport::{JsonOrBytes, Method};
use crate::types::{CompatibilityResult, ResolveRequest, ResolveResponse, ServerInfo};
use crate::upload::{self, UploadSession};
use crate::url::{build_base_url, parse_server_url, ServerTarget};

/// A client bound to one server target. Configuration, transport, and the
/// capability cache are owned here; upload/download sessions reference
/// the client but never mutate it (the capability cache excepted, which
/// is set once under a single-flight guard).
pub struct Client {
    config: ClientConfig,
    target: Mutex<ServerTarget>,
    compat: OnceCell<CompatibilityResult>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Arc<Self>, Error> {
        let target = parse_server_url(&config.server)?;
        Ok(Arc::new(Self {
            config,
            target: Mutex::new(target),
            compat: OnceCell::new(),
        }))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Single entry point for server info: single-flight and memoised —
    /// concurrent callers share one in-flight probe, and once resolved no
    /// further network I/O occurs for the lifetime of this client.
    pub async fn connect(&self) -> Result<CompatibilityResult, Error> {
        self.compat
            .get_or_try_init(|| self.probe())
            .await
            .map(|r| r.clone())
    }

    async fn probe(&self) -> Result<CompatibilityResult, Error> {
        let target = self.target.lock().await.clone();
        match self.fetch_info(&target).await {
            Ok(info) => Ok(self.build_compat(target, info)),
            Err(first_err) if self.config.fallback_to_http && target.secure => {
                warn!(error = %first_err, "https probe failed, retrying over http");
                let mut http_target = target;
                http_target.secure = false;
                match self.fetch_info(&http_target).await {
                    Ok(info) => {
                        *self.target.lock().await = http_target.clone();
                        info!(host = %http_target.host, "fell back to http");
                        Ok(self.build_compat(http_target, info))
                    }
                    Err(_) => Err(first_err),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_info(&self, target: &ServerTarget) -> Result<ServerInfo, Error> {
        let base = build_base_url(target);
        let url = format!("{base}/api/info");
        let resp = self
            .config
            .transport
            .fetch_json(
                Method::Get,
                &url,
                None,
                &HashMap::new(),
                Duration::from_millis(self.config.connect_timeout_ms),
                None,
            )
            .await
            .map_err(|e| Error::network("connect_failed", e.message))?;

        if !(200..300).contains(&resp.status) {
            return Err(Error::protocol(
                "info_bad_status",
                format!("GET /api/info returned {}", resp.status),
            )
            .with_details(resp.raw_text));
        }
        let json = resp
            .json
            .ok_or_else(|| Error::protocol("info_missing_body", "server info response had no body"))?;
        serde_json::from_value(json)
            .map_err(|e| Error::protocol("info_malformed", format!("malformed server info: {e}")))
    }

    fn build_compat(&self, target: ServerTarget, info: ServerInfo) -> CompatibilityResult {
        let outcome = crate::url::check_version(&self.config.client_version, &info.version);
        CompatibilityResult {
            compatible: outcome.compatible,
            client_version: self.config.client_version.clone(),
            server_version: info.version.clone(),
            message: outcome.message.map(str::to_string),
            base_url: build_base_url(&target),
            server_info: info,
        }
    }

    /// `POST /api/resolve`: resolve a pasted value (URL, sharing code, …)
    /// to what the server thinks it is.
    pub async fn resolve(&self, value: &str) -> Result<ResolveResponse, Error> {
        let compat = self.connect().await?;
        let url = format!("{}/api/resolve", compat.base_url);
        let body = serde_json::to_value(ResolveRequest {
            value: value.to_string(),
        })
        .expect("ResolveRequest always serializes");

        let resp = self
            .config
            .transport
            .fetch_json(
                Method::Post,
                &url,
                Some(JsonOrBytes::Json(body)),
                &HashMap::new(),
                Duration::from_millis(self.config.connect_timeout_ms),
                None,
            )
            .await?;

        if !(200..300).contains(&resp.status) {
            return Err(Error::protocol(
                "resolve_bad_status",
                format!("POST /api/resolve returned {}", resp.status),
            ));
        }
        let json = resp
            .json
            .ok_or_else(|| Error::protocol("resolve_missing_body", "resolve response had no body"))?;
        serde_json::from_value(json)
            .map_err(|e| Error::protocol("resolve_malformed", format!("malformed resolve response: {e}")))
    }

    pub async fn upload_file(
        self: &Arc<Self>,
        source: Arc<dyn wisp_p2p::FileSource>,
        opts: UploadOptions,
    ) -> Result<UploadSession, Error> {
        upload::upload_file(self.clone(), source, opts).await
    }

    pub async fn download_file(
        self: &Arc<Self>,
        opts: DownloadOptions,
        sink: Option<Arc<dyn wisp_p2p::DataSink>>,
        on_progress: Option<Arc<dyn Fn(crate::types::DownloadProgress) + Send + Sync>>,
    ) -> Result<DownloadOutcome, Error> {
        download::download_file(self.clone(), opts, sink, on_progress).await
    }

    pub(crate) fn transport(&self) -> &dyn crate::transport::Transport {
        self.config.transport.as_ref()
    }
}
