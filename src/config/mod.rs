use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Which blob store backend the gateway talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobBackend {
    S3,
    Local,
}

impl BlobBackend {
    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "s3" | "minio" => Some(Self::S3),
            "local" | "fs" => Some(Self::Local),
            _ => None,
        }
    }
}

/// Gateway configuration, read once at process start.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Blob store bucket name (default: "file-keys")
    pub bucket_name: String,

    /// Lookup table name (default: "FileKeys")
    pub table_name: String,

    /// Directory where incoming uploads are staged
    pub upload_path: PathBuf,

    /// Directory where downloaded blobs are written before streaming
    pub download_path: PathBuf,

    /// Upload ceiling in megabytes (default: 10)
    pub max_file_size_mb: usize,

    /// How long a request waits for its job (default: 60s)
    pub job_timeout: Duration,

    /// Number of pipeline workers (default: 4)
    pub worker_count: usize,

    /// Job queue buffer size (default: 1024)
    pub queue_capacity: usize,

    pub blob_backend: BlobBackend,

    /// Root directory for the local blob backend
    pub local_blob_root: PathBuf,

    /// Delete the lookup record when the blob push fails (default: false)
    pub compensate_failed_uploads: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let storage_path = PathBuf::from("./static");
        Self {
            bucket_name: "file-keys".to_string(),
            table_name: "FileKeys".to_string(),
            upload_path: storage_path.join("upload"),
            download_path: storage_path.join("download"),
            max_file_size_mb: 10,
            job_timeout: Duration::from_secs(60),
            worker_count: 4,
            queue_capacity: 1024,
            blob_backend: BlobBackend::S3,
            local_blob_root: storage_path.join("blobs"),
            compensate_failed_uploads: false,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        let storage_path = env::var("STORAGE_PATH").ok().map(PathBuf::from);
        let under_storage = |name: &str, fallback: PathBuf| {
            storage_path
                .as_ref()
                .map(|root| root.join(name))
                .unwrap_or(fallback)
        };

        Self {
            bucket_name: env::var("BUCKET_NAME").unwrap_or(default.bucket_name),

            table_name: env::var("TABLE_NAME").unwrap_or(default.table_name),

            upload_path: env::var("UPLOAD_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| under_storage("upload", default.upload_path)),

            download_path: env::var("DOWNLOAD_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| under_storage("download", default.download_path)),

            max_file_size_mb: env::var("MAX_FILE_SIZE_MB")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_size_mb),

            job_timeout: env::var("JOB_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.job_timeout),

            worker_count: env::var("WORKER_COUNT")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(default.worker_count),

            queue_capacity: env::var("QUEUE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(default.queue_capacity),

            blob_backend: env::var("BLOB_BACKEND")
                .ok()
                .and_then(|v| BlobBackend::parse(&v))
                .unwrap_or(default.blob_backend),

            local_blob_root: env::var("LOCAL_BLOB_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| under_storage("blobs", default.local_blob_root)),

            compensate_failed_uploads: env::var("COMPENSATE_FAILED_UPLOADS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(default.compensate_failed_uploads),
        }
    }

    /// Local-only setup rooted at `root` (no S3, short job timeout)
    pub fn development(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            upload_path: root.join("upload"),
            download_path: root.join("download"),
            job_timeout: Duration::from_secs(10),
            worker_count: 2,
            queue_capacity: 64,
            blob_backend: BlobBackend::Local,
            local_blob_root: root.join("blobs"),
            ..Self::default()
        }
    }

    /// Upload ceiling in bytes
    pub fn max_file_size(&self) -> usize {
        self.max_file_size_mb * 1024 * 1024
    }
}
