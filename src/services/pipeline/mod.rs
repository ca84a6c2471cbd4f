use crate::config::GatewayConfig;
use crate::services::blob_store::BlobStore;
use crate::services::executor::{JobOutcome, JobRequest};
use crate::services::lookup_table::LookupTable;
use std::path::PathBuf;
use std::sync::Arc;

pub mod download;
pub mod upload;

/// The upload and download pipelines plus the collaborators they share.
///
/// Both pipelines swallow every error and report failure as `None`; details
/// only reach the logs.
pub struct Pipelines {
    blobs: Arc<dyn BlobStore>,
    table: Arc<dyn LookupTable>,
    download_dir: PathBuf,
    compensate_failed_uploads: bool,
}

impl Pipelines {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        table: Arc<dyn LookupTable>,
        download_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            blobs,
            table,
            download_dir: download_dir.into(),
            compensate_failed_uploads: false,
        }
    }

    pub fn from_config(
        blobs: Arc<dyn BlobStore>,
        table: Arc<dyn LookupTable>,
        config: &GatewayConfig,
    ) -> Self {
        Self::new(blobs, table, config.download_path.clone())
            .with_compensation(config.compensate_failed_uploads)
    }

    /// Remove the lookup record again when the blob push fails.
    pub fn with_compensation(mut self, enabled: bool) -> Self {
        self.compensate_failed_uploads = enabled;
        self
    }

    pub fn download_dir(&self) -> &PathBuf {
        &self.download_dir
    }

    pub async fn dispatch(&self, request: JobRequest) -> JobOutcome {
        match request {
            JobRequest::PutData { file_path } => self.put_data(&file_path).await,
            JobRequest::GetData { file_key } => self.get_data(&file_key).await,
        }
    }
}
