use anyhow::{Result, bail};
use tokio::io::AsyncWriteExt;

use super::Pipelines;
use crate::utils::validation::is_plain_filename;

impl Pipelines {
    /// Looks up `file_key` and writes its blob to `download_dir/<name>`.
    ///
    /// Returns the name, or `None` for an unknown key or any backend failure.
    /// When several names share the key the first one in table order wins.
    pub async fn get_data(&self, file_key: &str) -> Option<String> {
        match self.try_get_data(file_key).await {
            Ok(Some(file_name)) => Some(file_name),
            Ok(None) => {
                tracing::info!("No record for key {}", file_key);
                None
            }
            Err(e) => {
                tracing::error!("Download of {} failed: {:#}", file_key, e);
                None
            }
        }
    }

    async fn try_get_data(&self, file_key: &str) -> Result<Option<String>> {
        let records = self.table.query(file_key).await?;
        let Some(record) = records.into_iter().next() else {
            return Ok(None);
        };

        if !is_plain_filename(&record.file_name) {
            bail!("Refusing to write record name {:?}", record.file_name);
        }

        let mut reader = self.blobs.get(file_key).await?;

        tokio::fs::create_dir_all(&self.download_dir).await?;
        let destination = self.download_dir.join(&record.file_name);
        let mut file = tokio::fs::File::create(&destination).await?;

        let copied = async {
            let n = tokio::io::copy(&mut reader, &mut file).await?;
            file.flush().await?;
            Ok::<u64, std::io::Error>(n)
        }
        .await;

        match copied {
            Ok(size) => {
                tracing::info!(
                    "📥 Pulled {} ({} bytes) into {}",
                    file_key,
                    size,
                    destination.display()
                );
                Ok(Some(record.file_name))
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&destination).await;
                Err(e.into())
            }
        }
    }
}
