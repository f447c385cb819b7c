//! Integration tests exercising the upload/download engines against a
//! mocked companion server, seeded from the round-trip scenarios this
//! crate is expected to satisfy: capability denial, chunk retry,
//! cancellation mid-chunk, and a full upload-then-download round trip.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use wisp::wisp_p2p::MemorySource;
use wisp::{Client, ClientConfig, DownloadOptions, ErrorKind, UploadOptions, UploadProgress};

fn server_info(upload_enabled: bool, e2ee: bool) -> serde_json::Value {
    json!({
        "name": "test-server",
        "version": "1.0.0",
        "capabilities": {
            "upload": {
                "enabled": upload_enabled,
                "maxSizeMB": 0,
                "maxLifetimeHours": 0,
                "maxFileDownloads": 0,
                "e2ee": e2ee,
                "chunkSize": null,
            },
            "p2p": {
                "enabled": false,
                "peerjsPath": null,
                "iceServers": [],
                "peerjsDebugLogging": false,
            },
            "webUI": { "enabled": false },
        }
    })
}

fn test_client(server: &MockServer) -> Arc<Client> {
    let config = ClientConfig::insecure_for_tests(
        "1.0.0",
        server.uri(),
        Arc::new(wisp::transport::ReqwestTransport::new()),
    );
    Client::new(config).expect("valid client config")
}

#[tokio::test]
async fn capability_denial_rejects_before_init() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(server_info(false, false)))
        .mount(&server)
        .await;
    // If the engine ever calls /upload/init despite the capability being
    // disabled, this mock's absence will surface as a connection/match
    // failure rather than silently succeeding.

    let client = test_client(&server);
    let source = Arc::new(MemorySource::new(b"hello world".to_vec()));
    let session = client
        .upload_file(source, UploadOptions::default())
        .await
        .expect("upload_file constructs a session even though the run fails");
    let result = session.result().await;

    let err = result.expect_err("uploads must be rejected when the server disables them");
    assert_eq!(err.kind, ErrorKind::Validation);
    assert!(err.message.contains("does not support file uploads"));
}

struct FlakyChunkResponder {
    calls: AtomicUsize,
    fail_first_n: usize,
}

impl Respond for FlakyChunkResponder {
    fn respond(&self, _req: &Request) -> ResponseTemplate {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first_n {
            ResponseTemplate::new(502)
        } else {
            ResponseTemplate::new(200).set_body_json(json!({}))
        }
    }
}

#[tokio::test]
async fn chunk_retry_recovers_after_transient_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(server_info(true, false)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload/init"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"uploadId": "u1"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload/chunk"))
        .respond_with(FlakyChunkResponder {
            calls: AtomicUsize::new(0),
            fail_first_n: 2,
        })
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload/complete"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "file1"})))
        .mount(&server)
        .await;

    let client = test_client(&server);
    let source = Arc::new(MemorySource::new(b"tiny payload".to_vec()));

    let retry_waits = Arc::new(std::sync::Mutex::new(0usize));
    let retries = Arc::new(std::sync::Mutex::new(0usize));
    let rw = retry_waits.clone();
    let rt = retries.clone();
    let mut opts = UploadOptions {
        filename_override: Some("tiny.bin".to_string()),
        ..Default::default()
    };
    opts.retry.backoff_ms = 5;
    opts.retry.max_backoff_ms = 20;
    opts.on_progress = Some(Arc::new(move |event| match event {
        UploadProgress::RetryWait { .. } => *rw.lock().unwrap() += 1,
        UploadProgress::Retry { .. } => *rt.lock().unwrap() += 1,
        _ => {}
    }));

    let session = client.upload_file(source, opts).await.unwrap();
    let outcome = session.result().await.expect("upload should recover via retry");
    assert_eq!(outcome.file_id, "file1");
    assert!(*retries.lock().unwrap() >= 2);
    assert!(*retry_waits.lock().unwrap() >= 2);
}

#[tokio::test]
async fn cancellation_during_chunk_aborts_and_notifies_server() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(server_info(true, false)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload/init"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"uploadId": "u1"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload/chunk"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload/cancel"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    // Two chunks' worth (chunk size override is 64 KiB), so the engine is
    // still mid-upload when we cancel.
    let source = Arc::new(MemorySource::new(vec![0u8; 70 * 1024]));
    let session = client
        .upload_file(source, UploadOptions::default())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    session.cancel();
    let result = session.result().await;
    assert!(matches!(result, Err(e) if e.kind == ErrorKind::Abort));

    server.verify().await;
}

struct CapturingBody(Arc<std::sync::Mutex<Vec<u8>>>);

impl Respond for CapturingBody {
    fn respond(&self, req: &Request) -> ResponseTemplate {
        self.0.lock().unwrap().extend_from_slice(&req.body);
        ResponseTemplate::new(200).set_body_json(json!({}))
    }
}

struct ServeBody(Arc<std::sync::Mutex<Vec<u8>>>);

impl Respond for ServeBody {
    fn respond(&self, _req: &Request) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_bytes(self.0.lock().unwrap().clone())
    }
}

#[tokio::test]
async fn plain_upload_then_download_round_trips_exact_bytes() {
    let server = MockServer::start().await;
    let uploaded = Arc::new(std::sync::Mutex::new(Vec::new()));

    Mock::given(method("GET"))
        .and(path("/api/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(server_info(true, false)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload/init"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"uploadId": "u1"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload/chunk"))
        .respond_with(CapturingBody(uploaded.clone()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload/complete"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "file1"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/file/file1/meta"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "isEncrypted": false,
            "sizeBytes": 150_000,
            "filename": "hello.txt",
            "encryptedFilename": null,
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/file/file1"))
        .respond_with(ServeBody(uploaded.clone()))
        .mount(&server)
        .await;

    let client = test_client(&server);
    let original: Vec<u8> = (0..150_000u32).map(|i| (i % 256) as u8).collect();
    let source = Arc::new(MemorySource::new(original.clone()));
    let opts = UploadOptions {
        filename_override: Some("hello.txt".to_string()),
        ..Default::default()
    };
    let session = client.upload_file(source, opts).await.unwrap();
    let upload_outcome = session.result().await.unwrap();
    assert_eq!(upload_outcome.file_id, "file1");
    assert!(!upload_outcome.share_url.contains('#'));
    assert_eq!(uploaded.lock().unwrap().len(), original.len());

    let download_opts = DownloadOptions {
        file_id: "file1".to_string(),
        ..Default::default()
    };
    let download_outcome = client
        .download_file(download_opts, None, None)
        .await
        .unwrap();
    assert_eq!(download_outcome.filename, "hello.txt");
    assert!(!download_outcome.was_encrypted);
    assert_eq!(download_outcome.data.unwrap(), original);
}
