use std::path::{Path as FsPath, PathBuf};
use std::time::Duration;

use axum::extract::multipart::Field;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Json, body::Body};
use common::storage::{BlobKey, StorageError};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::dedup::{Ingestor, SavingsAccountant};
use crate::entity::file_record;
use crate::error::{AppError, ErrorBody};
use crate::models::file::{FileListQuery, FileResponse, FileStatusResponse};
use crate::records::{FileFilter, FileRecordStore, NewFileRecord};
use crate::state::AppState;
use crate::utils::filename::validate_flat_filename;

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

pub fn upload_body_limit(max_blob_size: u64) -> DefaultBodyLimit {
    let limit = max_blob_size.saturating_add(MULTIPART_OVERHEAD);
    DefaultBodyLimit::max(usize::try_from(limit).unwrap_or(usize::MAX))
}

#[utoipa::path(
    post,
    path = "/",
    tag = "Files",
    operation_id = "uploadFile",
    summary = "Upload a file",
    description = "Stores the `file` multipart field. If a stored file already holds byte-identical \
        content, the new record aliases that file's blob and the response is `409` with status \
        `DUPLICATE` and `original_file_id` set. Otherwise the content is written and the response \
        is `201` with status `OK`.",
    request_body(content_type = "multipart/form-data", description = "The `file` field to store"),
    responses(
        (status = 201, description = "New content stored", body = FileResponse),
        (status = 409, description = "Content already stored; record created as a duplicate", body = FileResponse),
        (status = 400, description = "Missing or invalid file (VALIDATION_ERROR)", body = ErrorBody),
        (status = 500, description = "Content could not be read or written (STORAGE_ERROR)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, multipart))]
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let storage = &state.config.storage;
    let mut staged: Option<StagedUpload> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Multipart error: {e}")))?
    {
        if field.name() != Some("file") || staged.is_some() {
            continue;
        }
        staged = Some(
            StagedUpload::receive(field, storage.max_blob_size, storage.read_timeout()).await?,
        );
    }

    let staged = staged.ok_or_else(|| AppError::Validation("No file provided".into()))?;
    let result = ingest_staged(&state, &staged).await;
    staged.discard().await;

    let outcome = result?;
    let status = if outcome.verdict.is_duplicate() {
        StatusCode::CONFLICT
    } else {
        StatusCode::CREATED
    };

    Ok((status, Json(FileResponse::from(outcome.record))))
}

#[utoipa::path(
    get,
    path = "/",
    tag = "Files",
    operation_id = "listFiles",
    summary = "List files",
    description = "Returns every record matching all supplied filters, oldest first. Filters \
        that are empty or fail to parse are ignored.",
    params(FileListQuery),
    responses(
        (status = 200, description = "Matching records", body = Vec<FileResponse>),
    ),
)]
#[instrument(skip(state))]
pub async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<FileListQuery>,
) -> Result<Json<Vec<FileResponse>>, AppError> {
    let filter = FileFilter::from_query(&query, state.config.server.timezone());
    let records = FileRecordStore::new(&state.db).filter(&filter).await?;

    Ok(Json(records.into_iter().map(FileResponse::from).collect()))
}

#[utoipa::path(
    get,
    path = "/{id}",
    tag = "Files",
    operation_id = "getFile",
    summary = "Get a file record",
    params(("id" = String, Path, description = "File ID (UUID)")),
    responses(
        (status = 200, description = "The record", body = FileResponse),
        (status = 400, description = "Malformed ID (VALIDATION_ERROR)", body = ErrorBody),
        (status = 404, description = "No such file (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state))]
pub async fn get_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FileResponse>, AppError> {
    let record = find_record(&state, &id).await?;
    Ok(Json(record.into()))
}

#[utoipa::path(
    delete,
    path = "/{id}",
    tag = "Files",
    operation_id = "deleteFile",
    summary = "Delete a file record",
    description = "Removes the record. If it was an original with duplicates, the earliest \
        duplicate becomes the original for the rest. Content is removed once no record \
        references it.",
    params(("id" = String, Path, description = "File ID (UUID)")),
    responses(
        (status = 204, description = "Record deleted"),
        (status = 400, description = "Malformed ID (VALIDATION_ERROR)", body = ErrorBody),
        (status = 404, description = "No such file (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state))]
pub async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let record = find_record(&state, &id).await?;

    let deleted = {
        let _guard = state.size_locks.lock(record.size).await;
        FileRecordStore::new(&state.db)
            .delete(record.id)
            .await?
            .ok_or_else(not_found)?
    };

    if let Some(key) = deleted.orphaned_blob {
        match state.blob_store.delete(&key).await {
            Ok(_) => tracing::debug!(blob_key = %key, "Removed unreferenced blob"),
            Err(e) => warn!(blob_key = %key, error = %e, "Failed to remove unreferenced blob"),
        }
    }

    tracing::info!(
        file_id = %deleted.record.id,
        promoted = ?deleted.promoted,
        "File deleted"
    );

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/{id}/download",
    tag = "Files",
    operation_id = "downloadFile",
    summary = "Download file content",
    description = "Streams the stored bytes with the record's filename and file type.",
    params(("id" = String, Path, description = "File ID (UUID)")),
    responses(
        (status = 200, description = "File content"),
        (status = 400, description = "Malformed ID (VALIDATION_ERROR)", body = ErrorBody),
        (status = 404, description = "No such file, or its content is missing (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state))]
pub async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let record = find_record(&state, &id).await?;
    build_blob_response(&record, &*state.blob_store).await
}

#[utoipa::path(
    get,
    path = "/{id}/status",
    tag = "Files",
    operation_id = "getFileStatus",
    summary = "Get deduplication status",
    description = "Reports whether the record owns its content (`OK`) or aliases an earlier \
        record's content (`DUPLICATE`).",
    params(("id" = String, Path, description = "File ID (UUID)")),
    responses(
        (status = 200, description = "Status of the record", body = FileStatusResponse),
        (status = 400, description = "Malformed ID (VALIDATION_ERROR)", body = ErrorBody),
        (status = 404, description = "No such file (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state))]
pub async fn file_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FileStatusResponse>, AppError> {
    let record = find_record(&state, &id).await?;
    Ok(Json(record.into()))
}

#[utoipa::path(
    get,
    path = "/savings",
    tag = "Files",
    operation_id = "getStorageSavings",
    summary = "Bytes saved by deduplication",
    description = "Sum of the sizes of all duplicate records: bytes that were not written \
        because identical content was already stored.",
    responses(
        (status = 200, description = "Saved bytes", body = i64),
    ),
)]
#[instrument(skip(state))]
pub async fn storage_savings(State(state): State<AppState>) -> Result<Json<i64>, AppError> {
    let saved = SavingsAccountant::new(&state.db).total_saved().await?;
    Ok(Json(saved))
}

fn not_found() -> AppError {
    AppError::NotFound("File not found".into())
}

fn parse_file_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::Validation("Invalid file ID".into()))
}

async fn find_record(state: &AppState, raw_id: &str) -> Result<file_record::Model, AppError> {
    let id = parse_file_id(raw_id)?;
    FileRecordStore::new(&state.db)
        .find_by_id(id)
        .await?
        .ok_or_else(not_found)
}

async fn ingest_staged(
    state: &AppState,
    staged: &StagedUpload,
) -> Result<crate::dedup::IngestOutcome, AppError> {
    let meta = NewFileRecord {
        original_filename: staged.filename.clone(),
        file_type: staged.file_type.clone(),
        size: staged.size,
    };

    let ingestor = Ingestor::new(
        &state.db,
        &*state.blob_store,
        &state.size_locks,
        state.config.storage.read_timeout(),
    );
    Ok(ingestor.ingest(meta, &staged.path).await?)
}

/// An uploaded file written to a temp path, with its client metadata.
struct StagedUpload {
    path: PathBuf,
    filename: String,
    file_type: String,
    size: i64,
}

impl StagedUpload {
    /// Spool a multipart field to disk.
    ///
    /// Fails if the field exceeds `max_size` or is not fully received
    /// within `timeout`.
    async fn receive(
        mut field: Field<'_>,
        max_size: u64,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let raw_name = field
            .file_name()
            .ok_or_else(|| AppError::Validation("File field must have a filename".into()))?;
        let filename = validate_flat_filename(raw_name)
            .map_err(|e| AppError::Validation(e.to_string()))?
            .to_string();
        let file_type = declared_file_type(field.content_type(), &filename);

        let path = std::env::temp_dir().join(format!("filevault-upload-{}", Uuid::new_v4()));

        let received = tokio::time::timeout(timeout, spool(&mut field, &path, max_size)).await;
        let size = match received {
            Ok(Ok(size)) => size,
            Ok(Err(e)) => {
                let _ = tokio::fs::remove_file(&path).await;
                return Err(e);
            }
            Err(_) => {
                let _ = tokio::fs::remove_file(&path).await;
                return Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "receiving upload timed out",
                ))
                .into());
            }
        };

        Ok(Self {
            path,
            filename,
            file_type,
            size: i64::try_from(size).unwrap_or(i64::MAX),
        })
    }

    /// Best effort.
    async fn discard(self) {
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            warn!(path = %self.path.display(), error = %e, "Failed to remove staged upload");
        }
    }
}

async fn spool(field: &mut Field<'_>, path: &FsPath, max_size: u64) -> Result<u64, AppError> {
    let mut temp_file = tokio::fs::File::create(path)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to create temp file: {e}")))?;

    let mut total_size: u64 = 0;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| AppError::Validation(format!("Upload read error: {e}")))?
    {
        total_size += chunk.len() as u64;
        if total_size > max_size {
            return Err(AppError::Validation(format!(
                "File exceeds maximum size of {max_size} bytes"
            )));
        }
        temp_file
            .write_all(&chunk)
            .await
            .map_err(|e| AppError::Internal(format!("Temp file write failed: {e}")))?;
    }

    temp_file
        .flush()
        .await
        .map_err(|e| AppError::Internal(format!("Temp file flush failed: {e}")))?;

    Ok(total_size)
}

/// The part's declared type, else a guess from the filename.
fn declared_file_type(content_type: Option<&str>, filename: &str) -> String {
    content_type
        .map(str::trim)
        .filter(|ct| !ct.is_empty())
        .map(str::to_string)
        .or_else(|| mime_guess::from_path(filename).first().map(|m| m.to_string()))
        .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string())
}

async fn build_blob_response(
    record: &file_record::Model,
    blob_store: &dyn common::storage::BlobStore,
) -> Result<Response, AppError> {
    let key = BlobKey::parse(&record.blob_key)?;
    let reader = blob_store.get_stream(&key).await?;
    let length = blob_store.size(&key).await?;
    let body = Body::from_stream(ReaderStream::new(reader));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, download_content_type(&record.file_type))
        .header(header::CONTENT_LENGTH, length.to_string())
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition_value(&record.original_filename),
        )
        .body(body)
        .map_err(|e| AppError::Internal(format!("Failed to build response: {e}")))
}

/// Stored types are client-supplied; anything that is not a valid header
/// value is served as opaque bytes.
fn download_content_type(file_type: &str) -> &str {
    if header::HeaderValue::from_str(file_type).is_ok() {
        file_type
    } else {
        FALLBACK_CONTENT_TYPE
    }
}

/// Build a safe `Content-Disposition: attachment` header value.
fn content_disposition_value(filename: &str) -> String {
    let ascii_safe: String = filename
        .chars()
        .filter(|c| (c.is_ascii_graphic() || *c == ' ') && !matches!(c, '"' | ';' | '\\'))
        .collect();
    let ascii_name = if ascii_safe.trim().is_empty() {
        "download".to_string()
    } else {
        ascii_safe
    };

    // RFC 5987 percent-encoding for filename*.
    let encoded: String = filename
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'!'
            | b'#'
            | b'$'
            | b'&'
            | b'+'
            | b'-'
            | b'.'
            | b'^'
            | b'_'
            | b'`'
            | b'|'
            | b'~' => String::from(b as char),
            _ => format!("%{b:02X}"),
        })
        .collect();

    format!("attachment; filename=\"{ascii_name}\"; filename*=UTF-8''{encoded}")
}
