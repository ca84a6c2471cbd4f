use crate::AppState;
use crate::api::error::AppError;
use crate::services::executor::JobRequest;
use crate::utils::validation::{sanitize_filename, validate_content_length};
use axum::{
    Json,
    body::Body,
    extract::{
        FromRequest, Multipart, Request, State,
        multipart::{Field, MultipartError},
        rejection::JsonRejection,
    },
    http::{StatusCode, header},
    response::Response,
};
use futures::TryStreamExt;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::io::{ReaderStream, StreamReader};
use utoipa::ToSchema;

/// Characters left as-is in the `Content-Location` filename.
const FILENAME_SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'.')
    .remove(b'-')
    .remove(b'_')
    .remove(b'~');

#[derive(ToSchema)]
pub struct UploadForm {
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    pub file_key: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct DownloadRequest {
    pub file_key: String,
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge("Request body exceeds the maximum allowed limit".to_string())
    } else {
        AppError::BadRequest(e.body_text())
    }
}

/// Streams one multipart field into `dir/filename`.
async fn stage_field(dir: &Path, filename: &str, field: Field<'_>) -> Result<PathBuf, AppError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to create {}: {}", dir.display(), e)))?;

    let path = dir.join(filename);
    let mut file = tokio::fs::File::create(&path)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to stage {}: {}", path.display(), e)))?;

    let mut reader = StreamReader::new(field.map_err(std::io::Error::other));
    let copied = async {
        tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await
    }
    .await;

    if let Err(e) = copied {
        let _ = tokio::fs::remove_file(&path).await;
        let from_multipart = e
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<MultipartError>())
            .map(|me| me.status());
        return Err(match from_multipart {
            Some(StatusCode::PAYLOAD_TOO_LARGE) => AppError::PayloadTooLarge(
                "Request body exceeds the maximum allowed limit".to_string(),
            ),
            Some(_) => AppError::BadRequest(format!("Malformed file field: {}", e)),
            None => AppError::Internal(format!("Failed to stage {}: {}", path.display(), e)),
        });
    }

    Ok(path)
}

#[utoipa::path(
    put,
    path = "/storage",
    request_body(content = UploadForm, content_type = "multipart/form-data", description = "File upload"),
    responses(
        (status = 201, description = "File stored", body = UploadResponse),
        (status = 400, description = "Missing or malformed file field"),
        (status = 413, description = "Upload exceeds the size ceiling"),
        (status = 503, description = "Storage backend unavailable"),
        (status = 504, description = "Upload job timed out")
    ),
    tag = "storage"
)]
pub async fn upload_file(
    State(state): State<AppState>,
    request: Request,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    // 1. Size ceiling, before a single body byte is read
    validate_content_length(request.headers(), state.config.max_file_size())?;

    // 2. Parse and stage the file field
    let mut multipart = Multipart::from_request(request, &state)
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?;

    let mut staged: Option<PathBuf> = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") || staged.is_some() {
            continue;
        }

        let original_filename = field
            .file_name()
            .ok_or_else(|| AppError::BadRequest("File field has no filename".to_string()))?
            .to_string();
        let filename = sanitize_filename(&original_filename)?;

        staged = Some(stage_field(&state.config.upload_path, &filename, field).await?);
    }

    let file_path = staged.ok_or_else(|| AppError::BadRequest("No file provided".to_string()))?;
    tracing::info!("📦 Staged upload at {}", file_path.display());

    // 3. Dispatch and wait
    let file_key = state
        .executor
        .run(JobRequest::PutData { file_path })
        .await?
        .ok_or_else(|| {
            AppError::ServiceUnavailable("Storage backend unavailable, upload failed".to_string())
        })?;

    Ok((StatusCode::CREATED, Json(UploadResponse { file_key })))
}

#[utoipa::path(
    get,
    path = "/storage",
    request_body = DownloadRequest,
    responses(
        (status = 200, description = "File contents", content_type = "application/octet-stream"),
        (status = 400, description = "Missing file_key"),
        (status = 503, description = "Unknown key or storage backend unavailable"),
        (status = 504, description = "Download job timed out")
    ),
    tag = "storage"
)]
pub async fn download_file(
    State(state): State<AppState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(req) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let file_key = req.file_key.trim().to_string();
    if file_key.is_empty() {
        return Err(AppError::BadRequest("file_key must not be empty".to_string()));
    }

    let file_name = state
        .executor
        .run(JobRequest::GetData {
            file_key: file_key.clone(),
        })
        .await?
        .ok_or_else(|| {
            AppError::ServiceUnavailable(format!("Could not retrieve file for key {}", file_key))
        })?;

    let path = state.config.download_path.join(&file_name);
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to open {}: {}", path.display(), e)))?;
    let size = file
        .metadata()
        .await
        .map_err(|e| AppError::Internal(format!("Failed to stat {}: {}", path.display(), e)))?
        .len();

    tracing::info!("📤 Serving {} as {} ({} bytes)", file_key, file_name, size);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime::APPLICATION_OCTET_STREAM.as_ref())
        .header(
            header::CONTENT_LOCATION,
            utf8_percent_encode(&file_name, FILENAME_SAFE).to_string(),
        )
        .header(header::CONTENT_LENGTH, size)
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}
