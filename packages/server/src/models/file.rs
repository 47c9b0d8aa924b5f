use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::file_record::{self, FileStatus};

/// Query parameters for listing files.
///
/// Every field is taken as raw text; values that fail to parse are ignored
/// rather than rejected.
#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FileListQuery {
    /// Exact MIME type, case-insensitive.
    #[param(example = "text/plain")]
    pub file_type: Option<String>,
    /// Minimum size in whole kilobytes (inclusive).
    #[param(example = "1")]
    pub min_size: Option<String>,
    /// Maximum size in whole kilobytes (inclusive).
    #[param(example = "2")]
    pub max_size: Option<String>,
    /// Earliest upload date, `YYYY-MM-DD` (inclusive, from the first instant of the day).
    #[param(example = "2025-01-01")]
    pub min_uploaded_at: Option<String>,
    /// Latest upload date, `YYYY-MM-DD` (inclusive, to the last instant of the day).
    #[param(example = "2025-01-31")]
    pub max_uploaded_at: Option<String>,
    /// Filename prefix, case-insensitive.
    #[param(example = "report")]
    pub search: Option<String>,
}

/// A stored file record.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct FileResponse {
    #[schema(example = "01936f0e-1234-7abc-8000-000000000001")]
    pub id: Uuid,
    #[schema(example = "report.pdf")]
    pub original_filename: String,
    #[schema(example = "application/pdf")]
    pub file_type: String,
    /// Size in bytes.
    #[schema(example = 142857)]
    pub size: i64,
    pub uploaded_at: DateTime<Utc>,
    /// Record whose content this one duplicates; null for originals.
    pub original_file_id: Option<Uuid>,
    pub status: FileStatus,
}

impl From<file_record::Model> for FileResponse {
    fn from(model: file_record::Model) -> Self {
        let status = model.status();
        Self {
            id: model.id,
            original_filename: model.original_filename,
            file_type: model.file_type,
            size: model.size,
            uploaded_at: model.uploaded_at,
            original_file_id: model.original_file_id,
            status,
        }
    }
}

/// Existence and deduplication state of one record.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct FileStatusResponse {
    pub status: FileStatus,
    pub file_id: Uuid,
    #[schema(example = "report.pdf")]
    pub original_filename: String,
    pub original_file_id: Option<Uuid>,
}

impl From<file_record::Model> for FileStatusResponse {
    fn from(model: file_record::Model) -> Self {
        Self {
            status: model.status(),
            file_id: model.id,
            original_filename: model.original_filename,
            original_file_id: model.original_file_id,
        }
    }
}
