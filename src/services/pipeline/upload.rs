use anyhow::{Context, Result};
use std::path::Path;

use super::Pipelines;
use crate::services::lookup_table::FileRecord;
use crate::utils::hash::calculate_hash_from_reader;

impl Pipelines {
    /// Hashes the staged file, records `key -> name`, then pushes the bytes.
    ///
    /// Returns the key, or `None` if any step failed. A blob push failure
    /// after the record write leaves the record behind unless compensation
    /// is enabled.
    pub async fn put_data(&self, file_path: &Path) -> Option<String> {
        match self.try_put_data(file_path).await {
            Ok(file_key) => Some(file_key),
            Err(e) => {
                tracing::error!("Upload of {} failed: {:#}", file_path.display(), e);
                None
            }
        }
    }

    async fn try_put_data(&self, file_path: &Path) -> Result<String> {
        let file_name = file_path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("No file name in {}", file_path.display()))?
            .to_string();

        // 1. Hash
        let file = tokio::fs::File::open(file_path)
            .await
            .with_context(|| format!("Failed to open staged file {}", file_path.display()))?;
        let file_key = calculate_hash_from_reader(file).await?;
        tracing::info!("🔑 {} hashed to {}", file_name, file_key);

        // 2. Record key -> name
        let record = FileRecord::new(file_key.clone(), file_name);
        self.table.put_item(&record).await?;

        // 3. Push bytes
        let pushed = async {
            let file = tokio::fs::File::open(file_path)
                .await
                .with_context(|| format!("Failed to reopen staged file {}", file_path.display()))?;
            self.blobs.put(&file_key, Box::pin(file)).await
        }
        .await;

        match pushed {
            Ok(size) => {
                tracing::info!(
                    "☁️  Stored {} ({} bytes) in bucket {}",
                    file_key,
                    size,
                    self.blobs.bucket()
                );
                Ok(file_key)
            }
            Err(e) => {
                if self.compensate_failed_uploads {
                    match self.table.delete_item(&record).await {
                        Ok(()) => tracing::info!("Rolled back record for {}", file_key),
                        Err(del_err) => tracing::error!(
                            "Failed to roll back record for {}: {}",
                            file_key,
                            del_err
                        ),
                    }
                } else {
                    tracing::warn!(
                        "Record for {} written but blob missing; left as is",
                        file_key
                    );
                }
                Err(e)
            }
        }
    }
}
