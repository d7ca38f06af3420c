//! Audio HTTP routes.
//!
//! - POST   /audio/user/{user_id}/phrase/{phrase_id}           upload (multipart `file`)
//! - GET    /audio/user/{user_id}/phrase/{phrase_id}/{format}  download as wav/m4a/mp3
//! - DELETE /audio/user/{user_id}/phrase/{phrase_id}           soft delete

use axum::{
    extract::{
        multipart::{Field, MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, Path, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error};

use crate::audio::{AudioError, Format};
use crate::conversion::{ScratchDir, ScratchFile};
use crate::server::state::{GuardedPipeline, ServerState};
use crate::server::ServerConfig;

/// Room for multipart boundaries and the small text fields next to the file.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Body of every JSON response: a stable code and a human readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseResponse {
    pub code: String,
    pub message: String,
}

impl BaseResponse {
    pub fn success() -> Self {
        Self {
            code: "SUCCESS".to_string(),
            message: "SUCCESS".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    /// Who performed the deletion, defaults to the owning user.
    pub deleted_by: Option<String>,
}

/// Error rendered as a [`BaseResponse`] with a matching status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn bind_error(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "BIND_ERROR",
            message: message.into(),
        }
    }

    pub fn file_size_exceeded(limit_bytes: usize) -> Self {
        Self {
            status: StatusCode::PAYLOAD_TOO_LARGE,
            code: "FILE_SIZE_EXCEEDED",
            message: format!(
                "File size exceeds the allowed limit of {:#}",
                byte_unit::Byte::from(limit_bytes)
            ),
        }
    }

    fn internal(context: &str, err: impl std::fmt::Display) -> Self {
        error!("{}: {}", context, err);
        AudioError::Internal(anyhow::anyhow!("{}: {}", context, err)).into()
    }

    fn from_multipart(err: MultipartError, limit_bytes: usize) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::file_size_exceeded(limit_bytes)
        } else {
            Self::bind_error(err.body_text())
        }
    }
}

impl From<AudioError> for ApiError {
    fn from(err: AudioError) -> Self {
        let status = if err.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        let message = match &err {
            // Collaborator failures are logged, not echoed to clients.
            AudioError::Internal(_) => "Contact our team".to_string(),
            other => other.to_string(),
        };
        Self {
            status,
            code: err.code(),
            message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(BaseResponse {
                code: self.code.to_string(),
                message: self.message,
            }),
        )
            .into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Stream the `file` field into a scratch file, enforcing the size limit.
async fn save_upload(
    mut field: Field<'_>,
    scratch: &ScratchDir,
    limit_bytes: usize,
) -> Result<ScratchFile, ApiError> {
    let upload = scratch.allocate("upload", Format::M4a);
    let mut file = tokio::fs::File::create(upload.path())
        .await
        .map_err(|e| ApiError::internal("Failed to create upload file", e))?;

    let mut written = 0usize;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| ApiError::from_multipart(e, limit_bytes))?
    {
        written += chunk.len();
        if written > limit_bytes {
            return Err(ApiError::file_size_exceeded(limit_bytes));
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| ApiError::internal("Failed to write upload file", e))?;
    }
    file.flush()
        .await
        .map_err(|e| ApiError::internal("Failed to write upload file", e))?;

    if written == 0 {
        return Err(ApiError::bind_error("Uploaded file is empty"));
    }
    debug!("Received upload of {} bytes", written);
    Ok(upload)
}

async fn upload_audio(
    State(pipeline): State<GuardedPipeline>,
    State(config): State<ServerConfig>,
    Path((user_id, phrase_id)): Path<(String, String)>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<BaseResponse>, ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::bind_error(e.body_text()))?;
    let limit = config.max_upload_size_bytes;

    let mut upload: Option<ScratchFile> = None;
    let mut description: Option<String> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(ApiError::from_multipart(e, limit)),
        };

        match field.name() {
            Some("file") => {
                upload = Some(save_upload(field, pipeline.scratch(), limit).await?);
            }
            Some("description") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::from_multipart(e, limit))?;
                if !text.is_empty() {
                    description = Some(text);
                }
            }
            _ => {}
        }
    }

    let upload = upload.ok_or_else(|| ApiError::bind_error("Missing multipart field 'file'"))?;

    pipeline
        .ingest(&user_id, &phrase_id, upload, description)
        .await?;
    Ok(Json(BaseResponse::success()))
}

async fn get_audio(
    State(pipeline): State<GuardedPipeline>,
    Path((user_id, phrase_id, format)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    let (format, bytes) = pipeline
        .retrieve_named(&user_id, &phrase_id, &format)
        .await?;

    let filename = format!("{}_{}.{}", user_id, phrase_id, format);
    Ok((
        [
            (header::CONTENT_TYPE, format.mime_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        bytes,
    )
        .into_response())
}

async fn delete_audio(
    State(pipeline): State<GuardedPipeline>,
    Path((user_id, phrase_id)): Path<(String, String)>,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<BaseResponse>, ApiError> {
    let deleted_by = query.deleted_by.unwrap_or_else(|| user_id.clone());
    pipeline.remove(&user_id, &phrase_id, &deleted_by).await?;
    Ok(Json(BaseResponse::success()))
}

pub fn make_audio_routes(config: &ServerConfig) -> Router<ServerState> {
    Router::new()
        .route(
            "/user/{user_id}/phrase/{phrase_id}",
            post(upload_audio).delete(delete_audio),
        )
        .route(
            "/user/{user_id}/phrase/{phrase_id}/{format}",
            get(get_audio),
        )
        .layer(DefaultBodyLimit::max(
            config
                .max_upload_size_bytes
                .saturating_add(MULTIPART_OVERHEAD_BYTES),
        ))
}
