use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One physical blob in the blob store.
///
/// A row exists exactly while at least one `file_record` references the blob.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "blob_object")]
pub struct Model {
    /// Blob store handle (`BlobKey` canonical form).
    #[sea_orm(primary_key, auto_increment = false)]
    pub blob_key: String,

    /// Size of the blob in bytes when it was written.
    pub size: i64,

    pub created_at: DateTimeUtc,

    #[sea_orm(has_many)]
    pub file_records: HasMany<super::file_record::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
