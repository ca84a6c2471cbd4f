use crate::config::{BlobBackend, GatewayConfig};
use crate::services::blob_store::{BlobStore, LocalBlobStore, S3BlobStore};
use anyhow::Context;
use aws_sdk_s3::config::Region;
use std::env;
use std::sync::Arc;
use tracing::info;

pub async fn setup_storage(config: &GatewayConfig) -> anyhow::Result<Arc<dyn BlobStore>> {
    match config.blob_backend {
        BlobBackend::S3 => setup_s3(&config.bucket_name).await,
        BlobBackend::Local => {
            info!(
                "🗄️  Local blob store: {} (Bucket: {})",
                config.local_blob_root.display(),
                config.bucket_name
            );
            Ok(Arc::new(LocalBlobStore::new(
                config.local_blob_root.clone(),
                config.bucket_name.clone(),
            )))
        }
    }
}

async fn setup_s3(bucket: &str) -> anyhow::Result<Arc<dyn BlobStore>> {
    let endpoint_url = env::var("MINIO_ENDPOINT").context("MINIO_ENDPOINT must be set")?;
    let access_key = env::var("MINIO_ACCESS_KEY").context("MINIO_ACCESS_KEY must be set")?;
    let secret_key = env::var("MINIO_SECRET_KEY").context("MINIO_SECRET_KEY must be set")?;
    let region = env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string());

    info!("☁️  S3 Storage: {} (Bucket: {})", endpoint_url, bucket);

    let aws_config = aws_config::from_env()
        .endpoint_url(&endpoint_url)
        .region(Region::new(region))
        .credentials_provider(aws_sdk_s3::config::Credentials::new(
            access_key, secret_key, None, None, "static",
        ))
        .load()
        .await;

    let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
        .force_path_style(true)
        .build();

    let s3_client = aws_sdk_s3::Client::from_conf(s3_config);

    match s3_client.head_bucket().bucket(bucket).send().await {
        Ok(_) => info!("✅ Bucket '{}' is ready", bucket),
        Err(_) => {
            info!("🪣 Bucket '{}' not found, creating...", bucket);
            if let Err(e) = s3_client.create_bucket().bucket(bucket).send().await {
                tracing::error!("❌ Failed to create bucket '{}': {}", bucket, e);
            } else {
                info!("✅ Bucket '{}' created successfully", bucket);
            }
        }
    }

    Ok(Arc::new(S3BlobStore::new(s3_client, bucket.to_string())))
}
