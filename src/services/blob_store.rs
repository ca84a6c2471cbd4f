use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::Bytes;
use std::path::PathBuf;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

/// Byte stream going into or coming out of a blob store.
pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

/// Bodies up to one part go out as a single `PutObject`.
pub const PART_SIZE: usize = 10 * 1024 * 1024;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores everything `reader` yields under `key`, returning the byte count.
    async fn put(&self, key: &str, reader: BlobReader) -> Result<u64>;

    /// Opens the blob stored under `key`.
    async fn get(&self, key: &str) -> Result<BlobReader>;

    async fn exists(&self, key: &str) -> Result<bool>;

    fn bucket(&self) -> &str;
}

/// Reads until `buffer` is full or the stream ends.
async fn fill_buffer(reader: &mut BlobReader, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut n = 0;
    while n < buffer.len() {
        let read = reader.read(&mut buffer[n..]).await?;
        if read == 0 {
            break;
        }
        n += read;
    }
    Ok(n)
}

pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl S3BlobStore {
    pub fn new(client: Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    /// Ships the already-buffered first part plus the rest of `reader` as a multipart upload.
    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        mut reader: BlobReader,
        mut buffer: Vec<u8>,
        mut filled: usize,
    ) -> Result<u64> {
        let mut part_number = 1;
        let mut completed_parts = Vec::new();
        let mut total_size = 0u64;

        while filled > 0 {
            total_size += filled as u64;
            let upload_part_res = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .body(ByteStream::from(Bytes::copy_from_slice(&buffer[..filled])))
                .part_number(part_number)
                .send()
                .await?;

            completed_parts.push(
                CompletedPart::builder()
                    .e_tag(upload_part_res.e_tag().unwrap_or_default())
                    .part_number(part_number)
                    .build(),
            );

            part_number += 1;
            filled = fill_buffer(&mut reader, &mut buffer).await?;
        }

        let completed_multipart_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_multipart_upload)
            .send()
            .await?;

        Ok(total_size)
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, key: &str, mut reader: BlobReader) -> Result<u64> {
        let mut buffer = vec![0u8; PART_SIZE];
        let filled = fill_buffer(&mut reader, &mut buffer).await?;

        if filled < PART_SIZE {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(ByteStream::from(Bytes::copy_from_slice(&buffer[..filled])))
                .send()
                .await
                .with_context(|| format!("S3 put_object failed for {}", key))?;
            return Ok(filled as u64);
        }

        let multipart_upload_res = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await?;
        let upload_id = multipart_upload_res
            .upload_id()
            .ok_or_else(|| anyhow!("No upload ID"))?
            .to_string();

        match self
            .upload_parts(key, &upload_id, reader, buffer, filled)
            .await
        {
            Ok(size) => Ok(size),
            Err(e) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    tracing::warn!("Failed to abort multipart upload {}: {}", upload_id, abort_err);
                }
                Err(e.context(format!("S3 multipart upload failed for {}", key)))
            }
        }
    }

    async fn get(&self, key: &str) -> Result<BlobReader> {
        let res = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("S3 get_object failed for {}", key))?;
        Ok(Box::pin(res.body.into_async_read()))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                    Ok(false)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}

/// Blob store backed by a directory tree: `<root>/<bucket>/<key>`.
pub struct LocalBlobStore {
    root: PathBuf,
    bucket: String,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.into(),
        }
    }

    fn blob_path(&self, key: &str) -> Result<PathBuf> {
        if !crate::utils::validation::is_plain_filename(key) {
            return Err(anyhow!("Invalid blob key: {:?}", key));
        }
        Ok(self.root.join(&self.bucket).join(key))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, key: &str, mut reader: BlobReader) -> Result<u64> {
        let path = self.blob_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        // Write beside the target and rename so readers never see a partial blob
        let tmp_path = path.with_extension(format!("{}.part", uuid::Uuid::new_v4()));
        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .with_context(|| format!("Failed to create file: {}", tmp_path.display()))?;

        let written = async {
            let n = tokio::io::copy(&mut reader, &mut file).await?;
            file.flush().await?;
            Ok::<u64, std::io::Error>(n)
        }
        .await;

        match written {
            Ok(n) => {
                tokio::fs::rename(&tmp_path, &path)
                    .await
                    .with_context(|| format!("Failed to move blob into {}", path.display()))?;
                Ok(n)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                Err(anyhow!(e).context(format!("Failed to write blob {}", key)))
            }
        }
    }

    async fn get(&self, key: &str) -> Result<BlobReader> {
        let path = self.blob_path(key)?;
        let file = tokio::fs::File::open(&path)
            .await
            .with_context(|| format!("Failed to open blob: {}", path.display()))?;
        Ok(Box::pin(file))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.blob_path(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}
