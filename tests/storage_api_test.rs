use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use file_key_gateway::config::GatewayConfig;
use file_key_gateway::services::blob_store::{BlobReader, BlobStore, LocalBlobStore};
use file_key_gateway::services::executor::TaskExecutor;
use file_key_gateway::services::lookup_table::{FileRecord, LookupTable, SeaOrmLookupTable};
use file_key_gateway::services::pipeline::Pipelines;
use file_key_gateway::services::worker::spawn_workers;
use file_key_gateway::{AppState, create_app};
use http_body_util::BodyExt;
use sea_orm::Database;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;
use tower::ServiceExt;

const BOUNDARY: &str = "---------------------------123456789012345678901234567";
const HELLOWORLD_KEY: &str = "fc5e038d38a57032085441e7fe7010b0";

struct TestGateway {
    app: Router,
    state: AppState,
    table: Arc<SeaOrmLookupTable>,
    _dir: TempDir,
    _shutdown: watch::Sender<bool>,
}

async fn setup_table() -> Arc<SeaOrmLookupTable> {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    let table = SeaOrmLookupTable::new(db, "FileKeys");
    table.ensure_table().await.unwrap();
    Arc::new(table)
}

async fn setup_gateway_with(
    dir: TempDir,
    config: GatewayConfig,
    blob_store: Arc<dyn BlobStore>,
) -> TestGateway {
    let table = setup_table().await;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (executor, queue) = TaskExecutor::new(config.queue_capacity, Some(config.job_timeout));
    let pipelines = Arc::new(Pipelines::from_config(
        blob_store.clone(),
        table.clone(),
        &config,
    ));
    spawn_workers(config.worker_count, queue, pipelines, shutdown_rx);

    let state = AppState {
        executor,
        lookup_table: table.clone(),
        blob_store,
        config: Arc::new(config),
    };

    TestGateway {
        app: create_app(state.clone()),
        state,
        table,
        _dir: dir,
        _shutdown: shutdown_tx,
    }
}

async fn setup_gateway() -> TestGateway {
    let dir = tempfile::tempdir().unwrap();
    let config = GatewayConfig::development(dir.path());
    let blob_store = Arc::new(LocalBlobStore::new(
        config.local_blob_root.clone(),
        config.bucket_name.clone(),
    ));
    setup_gateway_with(dir, config, blob_store).await
}

fn multipart_body(field: &str, filename: &str, content: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{BOUNDARY}\r\n\
        Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
        Content-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri("/storage")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap()
}

fn download_request(json: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri("/storage")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json.to_string()))
        .unwrap()
}

async fn upload(app: &Router, filename: &str, content: &[u8]) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(upload_request(multipart_body("file", filename, content)))
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

fn staged_file_count(gateway: &TestGateway) -> usize {
    std::fs::read_dir(&gateway.state.config.upload_path)
        .map(|entries| entries.count())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_upload_then_download_round_trip() {
    let gateway = setup_gateway().await;

    // 1. Upload
    let (status, json) = upload(&gateway.app, "hello.txt", b"helloworld").await;
    assert_eq!(status, StatusCode::CREATED, "upload failed: {}", json);
    assert_eq!(json["file_key"], HELLOWORLD_KEY);

    // 2. Download
    let response = gateway
        .app
        .clone()
        .oneshot(download_request(&format!(
            r#"{{"file_key": "{}"}}"#,
            HELLOWORLD_KEY
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers[header::CONTENT_TYPE], "application/octet-stream");
    assert_eq!(headers[header::CONTENT_LOCATION], "hello.txt");
    assert_eq!(headers[header::CONTENT_LENGTH], "10");

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"helloworld");

    // Downloaded copy lands in the download directory
    let downloaded = gateway.state.config.download_path.join("hello.txt");
    assert_eq!(std::fs::read(downloaded).unwrap(), b"helloworld");
}

#[tokio::test]
async fn test_upload_same_content_twice_yields_same_key() {
    let gateway = setup_gateway().await;

    let (status, first) = upload(&gateway.app, "hello.txt", b"helloworld").await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, second) = upload(&gateway.app, "hello.txt", b"helloworld").await;
    assert_eq!(status, StatusCode::CREATED);

    assert_eq!(first["file_key"], second["file_key"]);
    assert_eq!(gateway.table.query(HELLOWORLD_KEY).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_same_content_under_two_names_serves_first_name() {
    let gateway = setup_gateway().await;

    let (_, first) = upload(&gateway.app, "b.txt", b"helloworld").await;
    let (_, second) = upload(&gateway.app, "a.txt", b"helloworld").await;
    assert_eq!(first["file_key"], second["file_key"]);
    assert_eq!(gateway.table.query(HELLOWORLD_KEY).await.unwrap().len(), 2);

    let response = gateway
        .app
        .clone()
        .oneshot(download_request(&format!(
            r#"{{"file_key": "{}"}}"#,
            HELLOWORLD_KEY
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_LOCATION], "a.txt");
}

#[tokio::test]
async fn test_upload_at_ceiling_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = GatewayConfig::development(dir.path());
    config.max_file_size_mb = 1;
    let blob_store = Arc::new(LocalBlobStore::new(
        config.local_blob_root.clone(),
        config.bucket_name.clone(),
    ));
    let gateway = setup_gateway_with(dir, config, blob_store).await;

    // Whole request, multipart framing included, exactly at the ceiling
    let overhead = multipart_body("file", "big.bin", b"").len();
    let content = vec![7u8; 1024 * 1024 - overhead];
    let body = multipart_body("file", "big.bin", &content);
    assert_eq!(body.len(), 1024 * 1024);

    let response = gateway.app.clone().oneshot(upload_request(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_upload_over_ceiling_is_rejected_before_staging() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = GatewayConfig::development(dir.path());
    config.max_file_size_mb = 1;
    let blob_store = Arc::new(LocalBlobStore::new(
        config.local_blob_root.clone(),
        config.bucket_name.clone(),
    ));
    let gateway = setup_gateway_with(dir, config, blob_store.clone()).await;

    let content = vec![7u8; 1024 * 1024 + 1];
    let response = gateway
        .app
        .clone()
        .oneshot(upload_request(multipart_body("file", "big.bin", &content)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert!(json["error"].as_str().unwrap().contains("too large"));

    assert_eq!(staged_file_count(&gateway), 0);
    let key = file_key_gateway::utils::hash::calculate_hash(&content);
    assert!(!blob_store.exists(&key).await.unwrap());
}

#[tokio::test]
async fn test_streamed_upload_over_ceiling_without_content_length() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = GatewayConfig::development(dir.path());
    config.max_file_size_mb = 1;
    let blob_store = Arc::new(LocalBlobStore::new(
        config.local_blob_root.clone(),
        config.bucket_name.clone(),
    ));
    let gateway = setup_gateway_with(dir, config, blob_store).await;

    // 2 MiB of file data in 64 KiB chunks, no Content-Length header
    let head = format!(
        "--{BOUNDARY}\r\n\
        Content-Disposition: form-data; name=\"file\"; filename=\"big.bin\"\r\n\
        Content-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    let tail = format!("\r\n--{BOUNDARY}--\r\n").into_bytes();
    let mut chunks = vec![head];
    chunks.extend(std::iter::repeat_n(vec![7u8; 64 * 1024], 32));
    chunks.push(tail);
    let stream = futures::stream::iter(chunks.into_iter().map(Ok::<_, std::io::Error>));

    let response = gateway
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/storage")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={}", BOUNDARY),
                )
                .body(Body::from_stream(stream))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(staged_file_count(&gateway), 0);
    assert_eq!(gateway.state.executor.pending_jobs(), 0);
}

#[tokio::test]
async fn test_upload_without_file_field() {
    let gateway = setup_gateway().await;

    let response = gateway
        .app
        .clone()
        .oneshot(upload_request(multipart_body("document", "hello.txt", b"helloworld")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(staged_file_count(&gateway), 0);
    assert!(gateway.table.query(HELLOWORLD_KEY).await.unwrap().is_empty());
    assert_eq!(gateway.state.executor.pending_jobs(), 0);
}

#[tokio::test]
async fn test_upload_not_multipart() {
    let gateway = setup_gateway().await;

    let response = gateway
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/storage")
                .header(header::CONTENT_TYPE, "text/plain")
                .body(Body::from("helloworld"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_strips_path_from_filename() {
    let gateway = setup_gateway().await;

    let (status, json) = upload(&gateway.app, "../../evil.txt", b"helloworld").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["file_key"], HELLOWORLD_KEY);

    assert!(gateway.state.config.upload_path.join("evil.txt").exists());
    let records = gateway.table.query(HELLOWORLD_KEY).await.unwrap();
    assert_eq!(records[0].file_name, "evil.txt");
}

#[tokio::test]
async fn test_download_unknown_key() {
    let gateway = setup_gateway().await;

    let response = gateway
        .app
        .clone()
        .oneshot(download_request(r#"{"file_key": "00000000000000000000000000000000"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(response.headers().get(header::CONTENT_LOCATION).is_none());
}

#[tokio::test]
async fn test_download_bad_requests() {
    let gateway = setup_gateway().await;

    for body in [r#"{}"#, r#"{"key": "abc"}"#, "not json", r#"{"file_key": "  "}"#] {
        let response = gateway
            .app
            .clone()
            .oneshot(download_request(body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {}", body);
    }

    // Missing JSON content type
    let response = gateway
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/storage")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(gateway.state.executor.pending_jobs(), 0);
}

struct FailingBlobStore;

#[async_trait]
impl BlobStore for FailingBlobStore {
    async fn put(&self, _key: &str, _reader: BlobReader) -> anyhow::Result<u64> {
        Err(anyhow::anyhow!("connection refused"))
    }

    async fn get(&self, _key: &str) -> anyhow::Result<BlobReader> {
        Err(anyhow::anyhow!("connection refused"))
    }

    async fn exists(&self, _key: &str) -> anyhow::Result<bool> {
        Err(anyhow::anyhow!("connection refused"))
    }

    fn bucket(&self) -> &str {
        "unreachable"
    }
}

#[tokio::test]
async fn test_blob_store_failure_yields_503() {
    let dir = tempfile::tempdir().unwrap();
    let config = GatewayConfig::development(dir.path());
    let gateway = setup_gateway_with(dir, config, Arc::new(FailingBlobStore)).await;

    let (status, json) = upload(&gateway.app, "hello.txt", b"helloworld").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(json.get("file_key").is_none());

    // The record was written before the blob push failed
    assert_eq!(gateway.table.query(HELLOWORLD_KEY).await.unwrap().len(), 1);

    // And the orphaned record cannot be served
    let response = gateway
        .app
        .clone()
        .oneshot(download_request(&format!(
            r#"{{"file_key": "{}"}}"#,
            HELLOWORLD_KEY
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_blob_store_failure_with_compensation() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = GatewayConfig::development(dir.path());
    config.compensate_failed_uploads = true;
    let gateway = setup_gateway_with(dir, config, Arc::new(FailingBlobStore)).await;

    let (status, _) = upload(&gateway.app, "hello.txt", b"helloworld").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(gateway.table.query(HELLOWORLD_KEY).await.unwrap().is_empty());
}

struct FailingLookupTable;

#[async_trait]
impl LookupTable for FailingLookupTable {
    async fn put_item(&self, _record: &FileRecord) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("table unreachable"))
    }

    async fn query(&self, _file_key: &str) -> anyhow::Result<Vec<FileRecord>> {
        Err(anyhow::anyhow!("table unreachable"))
    }

    async fn delete_item(&self, _record: &FileRecord) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("table unreachable"))
    }

    async fn ping(&self) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("table unreachable"))
    }
}

#[tokio::test]
async fn test_lookup_table_failure_yields_503_without_blob_push() {
    let dir = tempfile::tempdir().unwrap();
    let config = GatewayConfig::development(dir.path());
    let blob_store = Arc::new(LocalBlobStore::new(
        config.local_blob_root.clone(),
        config.bucket_name.clone(),
    ));
    let table: Arc<dyn LookupTable> = Arc::new(FailingLookupTable);

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let (executor, queue) = TaskExecutor::new(config.queue_capacity, Some(config.job_timeout));
    let pipelines = Arc::new(Pipelines::from_config(
        blob_store.clone(),
        table.clone(),
        &config,
    ));
    spawn_workers(config.worker_count, queue, pipelines, shutdown_rx);

    let app = create_app(AppState {
        executor,
        lookup_table: table,
        blob_store: blob_store.clone(),
        config: Arc::new(config),
    });

    let (status, json) = upload(&app, "hello.txt", b"helloworld").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(json.get("file_key").is_none());
    assert!(!blob_store.exists(HELLOWORLD_KEY).await.unwrap());

    let response = app
        .clone()
        .oneshot(download_request(&format!(
            r#"{{"file_key": "{}"}}"#,
            HELLOWORLD_KEY
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    // Health reports the table as unreachable
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["lookup_table"], "disconnected");
}

struct SlowBlobStore {
    inner: LocalBlobStore,
    delay: Duration,
}

#[async_trait]
impl BlobStore for SlowBlobStore {
    async fn put(&self, key: &str, reader: BlobReader) -> anyhow::Result<u64> {
        tokio::time::sleep(self.delay).await;
        self.inner.put(key, reader).await
    }

    async fn get(&self, key: &str) -> anyhow::Result<BlobReader> {
        self.inner.get(key).await
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        self.inner.exists(key).await
    }

    fn bucket(&self) -> &str {
        self.inner.bucket()
    }
}

#[tokio::test]
async fn test_slow_job_times_out_with_504() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = GatewayConfig::development(dir.path());
    config.job_timeout = Duration::from_millis(100);
    let blob_store = Arc::new(SlowBlobStore {
        inner: LocalBlobStore::new(config.local_blob_root.clone(), config.bucket_name.clone()),
        delay: Duration::from_secs(2),
    });
    let gateway = setup_gateway_with(dir, config, blob_store).await;

    let (status, json) = upload(&gateway.app, "hello.txt", b"helloworld").await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert!(json.get("file_key").is_none());
}

#[tokio::test]
async fn test_concurrent_uploads() {
    let gateway = setup_gateway().await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let app = gateway.app.clone();
        handles.push(tokio::spawn(async move {
            let content = format!("file number {}", i);
            let (status, json) = upload(&app, &format!("file{}.txt", i), content.as_bytes()).await;
            (status, json, content)
        }));
    }

    for handle in handles {
        let (status, json, content) = handle.await.unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(
            json["file_key"],
            file_key_gateway::utils::hash::calculate_hash(content.as_bytes())
        );
    }
}

#[tokio::test]
async fn test_health_and_request_id() {
    let gateway = setup_gateway().await;

    let response = gateway
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-request-id", "req-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-request-id"], "req-123");
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["lookup_table"], "connected");
    assert_eq!(json["workers"], "running");

    // Generated when absent
    let response = gateway
        .app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(!response.headers()["x-request-id"].is_empty());
}
