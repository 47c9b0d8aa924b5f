use chrono::Utc;
use common::storage::{BlobKey, StoredBlob};
use sea_orm::sea_query::{Alias, Expr, ExprTrait, LikeExpr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Select, Set, TransactionSession, TransactionTrait,
};
use uuid::Uuid;

use crate::entity::{blob_object, file_record};
use crate::models::shared::escape_like;

use super::filter::FileFilter;

/// Metadata of an upload about to be recorded.
#[derive(Debug, Clone)]
pub struct NewFileRecord {
    pub original_filename: String,
    pub file_type: String,
    pub size: i64,
}

/// Where a new record's bytes live.
#[derive(Debug)]
pub enum BlobSource<'b> {
    /// Bytes were just written; the record introduces this blob.
    Fresh(&'b StoredBlob),
    /// Content matched an existing record; alias its blob.
    AliasOf(&'b file_record::Model),
}

/// Result of removing a record.
#[derive(Debug)]
pub struct DeletedRecord {
    pub record: file_record::Model,
    /// Duplicate that took over as original, if the deleted record had any.
    pub promoted: Option<Uuid>,
    /// Blob no longer referenced by any record; the caller should remove it
    /// from the blob store.
    pub orphaned_blob: Option<BlobKey>,
}

pub struct FileRecordStore<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> FileRecordStore<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    /// Persist a new record.
    ///
    /// Aliasing a record that is itself a duplicate points the new record at
    /// that record's original, keeping the reference graph one level deep.
    pub async fn create(
        &self,
        meta: NewFileRecord,
        source: BlobSource<'_>,
    ) -> Result<file_record::Model, DbErr> {
        let now = Utc::now();

        let (blob_key, original_file_id) = match source {
            BlobSource::Fresh(blob) => {
                let blob_obj = blob_object::ActiveModel {
                    blob_key: Set(blob.key.to_string()),
                    size: Set(i64::try_from(blob.size).unwrap_or(i64::MAX)),
                    created_at: Set(now),
                };
                blob_object::Entity::insert(blob_obj)
                    .exec_without_returning(self.conn)
                    .await?;
                (blob.key.to_string(), None)
            }
            BlobSource::AliasOf(original) => (
                original.blob_key.clone(),
                Some(original.original_file_id.unwrap_or(original.id)),
            ),
        };

        let record = file_record::ActiveModel {
            id: Set(Uuid::now_v7()),
            filename_folded: Set(meta.original_filename.to_lowercase()),
            file_type_folded: Set(meta.file_type.to_lowercase()),
            original_filename: Set(meta.original_filename),
            file_type: Set(meta.file_type),
            size: Set(meta.size),
            uploaded_at: Set(now),
            blob_key: Set(blob_key),
            original_file_id: Set(original_file_id),
        };

        record.insert(self.conn).await
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<file_record::Model>, DbErr> {
        file_record::Entity::find_by_id(id).one(self.conn).await
    }

    /// All records of exactly `size` bytes, in creation order.
    pub async fn find_by_size(&self, size: i64) -> Result<Vec<file_record::Model>, DbErr> {
        creation_order(file_record::Entity::find().filter(file_record::Column::Size.eq(size)))
            .all(self.conn)
            .await
    }

    /// Records of exactly `size` bytes that own their blob, in creation order.
    pub async fn find_originals_by_size(
        &self,
        size: i64,
    ) -> Result<Vec<file_record::Model>, DbErr> {
        creation_order(
            file_record::Entity::find()
                .filter(file_record::Column::Size.eq(size))
                .filter(file_record::Column::OriginalFileId.is_null()),
        )
        .all(self.conn)
        .await
    }

    /// Records matching every criterion set in `criteria`, in creation order.
    pub async fn filter(&self, criteria: &FileFilter) -> Result<Vec<file_record::Model>, DbErr> {
        let mut select = file_record::Entity::find();

        if let Some(ref file_type) = criteria.file_type {
            select =
                select.filter(file_record::Column::FileTypeFolded.eq(file_type.to_lowercase()));
        }
        if let Some(min) = criteria.min_size {
            select = select.filter(file_record::Column::Size.gte(min));
        }
        if let Some(max) = criteria.max_size {
            select = select.filter(file_record::Column::Size.lte(max));
        }
        if let Some(from) = criteria.uploaded_from {
            select = select.filter(file_record::Column::UploadedAt.gte(from));
        }
        if let Some(until) = criteria.uploaded_until {
            select = select.filter(file_record::Column::UploadedAt.lte(until));
        }
        if let Some(ref prefix) = criteria.name_prefix {
            select = select.filter(name_starts_with(prefix));
        }

        creation_order(select).all(self.conn).await
    }

    /// Records whose filename starts with `prefix`, ignoring case.
    pub async fn find_by_prefix(&self, prefix: &str) -> Result<Vec<file_record::Model>, DbErr> {
        creation_order(file_record::Entity::find().filter(name_starts_with(prefix)))
            .all(self.conn)
            .await
    }

    /// Duplicates referencing the original `id`, in creation order.
    pub async fn duplicates_of(&self, id: Uuid) -> Result<Vec<file_record::Model>, DbErr> {
        creation_order(
            file_record::Entity::find().filter(file_record::Column::OriginalFileId.eq(id)),
        )
        .all(self.conn)
        .await
    }

    /// Number of records aliasing `blob_key`.
    pub async fn count_blob_refs(&self, blob_key: &str) -> Result<u64, DbErr> {
        file_record::Entity::find()
            .filter(file_record::Column::BlobKey.eq(blob_key))
            .count(self.conn)
            .await
    }

    /// Sum of the declared sizes of every duplicate record; zero when there are none.
    pub async fn duplicate_bytes(&self) -> Result<i64, DbErr> {
        // Postgres widens SUM(bigint) to numeric.
        let total = file_record::Entity::find()
            .select_only()
            .column_as(
                file_record::Column::Size.sum().cast_as(Alias::new("BIGINT")),
                "total",
            )
            .filter(file_record::Column::OriginalFileId.is_not_null())
            .into_tuple::<Option<i64>>()
            .one(self.conn)
            .await?;
        Ok(total.flatten().unwrap_or(0))
    }
}

impl<C: ConnectionTrait + TransactionTrait> FileRecordStore<'_, C> {
    /// Remove a record, keeping the reference graph consistent.
    ///
    /// Deleting an original that still has duplicates promotes the earliest
    /// duplicate to original and re-points the rest at it. The blob row is
    /// dropped once nothing references it; removing the bytes themselves is
    /// left to the caller, after this transaction has committed.
    pub async fn delete(&self, id: Uuid) -> Result<Option<DeletedRecord>, DbErr> {
        let txn = self.conn.begin().await?;
        let store = FileRecordStore::new(&txn);

        let Some(record) = store.find_by_id(id).await? else {
            txn.rollback().await?;
            return Ok(None);
        };

        let mut promoted = None;
        if !record.is_duplicate() {
            let duplicates = store.duplicates_of(record.id).await?;
            if let Some(heir) = duplicates.into_iter().next() {
                let heir_id = heir.id;
                let mut active: file_record::ActiveModel = heir.into();
                active.original_file_id = Set(None);
                active.update(&txn).await?;

                file_record::Entity::update_many()
                    .col_expr(file_record::Column::OriginalFileId, Expr::value(heir_id))
                    .filter(file_record::Column::OriginalFileId.eq(record.id))
                    .exec(&txn)
                    .await?;

                promoted = Some(heir_id);
            }
        }

        file_record::Entity::delete_by_id(record.id)
            .exec(&txn)
            .await?;

        let mut orphaned_blob = None;
        if store.count_blob_refs(&record.blob_key).await? == 0 {
            blob_object::Entity::delete_by_id(record.blob_key.clone())
                .exec(&txn)
                .await?;
            orphaned_blob = BlobKey::parse(&record.blob_key).ok();
        }

        txn.commit().await?;

        Ok(Some(DeletedRecord {
            record,
            promoted,
            orphaned_blob,
        }))
    }
}

fn creation_order(select: Select<file_record::Entity>) -> Select<file_record::Entity> {
    select
        .order_by_asc(file_record::Column::UploadedAt)
        .order_by_asc(file_record::Column::Id)
}

fn name_starts_with(prefix: &str) -> Condition {
    Condition::all().add(
        Expr::col(file_record::Column::FilenameFolded).like(
            LikeExpr::new(format!("{}%", escape_like(&prefix.to_lowercase()))).escape('\\'),
        ),
    )
}
