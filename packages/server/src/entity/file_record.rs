use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Derived state of a record; never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    /// The record introduced its blob.
    Ok,
    /// The record aliases the blob of an earlier original.
    Duplicate,
}

/// One logical upload.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "file_record")]
pub struct Model {
    /// UUIDv7 primary key; sorts in creation order.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Client-supplied filename, not unique.
    pub original_filename: String,

    /// Declared MIME type, not checked against the content.
    pub file_type: String,

    /// Lowercased `original_filename`. Case folding happens in Rust so it
    /// covers non-ASCII letters on every backend.
    pub filename_folded: String,

    /// Lowercased `file_type`.
    pub file_type_folded: String,

    /// Byte length observed at upload time.
    pub size: i64,

    pub uploaded_at: DateTimeUtc,

    /// Shared with the original when this record is a duplicate.
    pub blob_key: String,
    #[sea_orm(belongs_to, from = "blob_key", to = "blob_key")]
    pub blob_object: HasOne<super::blob_object::Entity>,

    /// Set iff this record is a duplicate. Always points at a record whose own
    /// `original_file_id` is NULL.
    pub original_file_id: Option<Uuid>,
}

impl Model {
    pub fn status(&self) -> FileStatus {
        if self.original_file_id.is_some() {
            FileStatus::Duplicate
        } else {
            FileStatus::Ok
        }
    }

    pub fn is_duplicate(&self) -> bool {
        self.original_file_id.is_some()
    }
}

impl ActiveModelBehavior for ActiveModel {}
