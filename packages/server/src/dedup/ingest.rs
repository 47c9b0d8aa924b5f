use std::path::Path;
use std::time::Duration;

use common::storage::{BlobStore, BoxReader, StorageError};
use sea_orm::{ConnectionTrait, TransactionSession, TransactionTrait};
use tracing::{info, warn};

use crate::entity::file_record;
use crate::records::{BlobSource, FileRecordStore, NewFileRecord};

use super::DedupError;
use super::locks::SizeLocks;
use super::resolver::{DuplicateResolver, Verdict};

/// A persisted upload together with how it was resolved.
#[derive(Debug)]
pub struct IngestOutcome {
    pub record: file_record::Model,
    pub verdict: Verdict,
}

/// Stores an upload, writing its bytes only when no stored original holds them.
pub struct Ingestor<'a, C> {
    conn: &'a C,
    blobs: &'a dyn BlobStore,
    locks: &'a SizeLocks,
    read_timeout: Duration,
}

impl<'a, C: ConnectionTrait + TransactionTrait> Ingestor<'a, C> {
    pub fn new(
        conn: &'a C,
        blobs: &'a dyn BlobStore,
        locks: &'a SizeLocks,
        read_timeout: Duration,
    ) -> Self {
        Self {
            conn,
            blobs,
            locks,
            read_timeout,
        }
    }

    /// Record the upload whose bytes are staged at `content`.
    ///
    /// The size lock is held from candidate lookup until the record is
    /// committed, so a concurrent upload of the same bytes sees this one.
    pub async fn ingest(
        &self,
        meta: NewFileRecord,
        content: &Path,
    ) -> Result<IngestOutcome, DedupError> {
        let _guard = self.locks.lock(meta.size).await;

        let mut staged = open_staged(content).await?;
        let verdict = DuplicateResolver::new(self.conn, self.blobs, self.read_timeout)
            .resolve(&mut staged, meta.size)
            .await?;
        drop(staged);

        let record = match &verdict {
            Verdict::Duplicate(original) => {
                FileRecordStore::new(self.conn)
                    .create(meta, BlobSource::AliasOf(original))
                    .await?
            }
            Verdict::Unique => self.store_fresh(meta, content).await?,
        };

        info!(
            file_id = %record.id,
            filename = %record.original_filename,
            size = record.size,
            duplicate_of = ?record.original_file_id,
            "File recorded"
        );

        Ok(IngestOutcome { record, verdict })
    }

    async fn store_fresh(
        &self,
        meta: NewFileRecord,
        content: &Path,
    ) -> Result<file_record::Model, DedupError> {
        let reader: BoxReader = Box::new(open_staged(content).await?);
        let stored = self.blobs.put_stream(reader).await?;

        let created = async {
            let txn = self.conn.begin().await?;
            let record = FileRecordStore::new(&txn)
                .create(meta, BlobSource::Fresh(&stored))
                .await?;
            txn.commit().await?;
            Ok::<_, sea_orm::DbErr>(record)
        }
        .await;

        match created {
            Ok(record) => Ok(record),
            Err(e) => {
                if let Err(cleanup) = self.blobs.delete(&stored.key).await {
                    warn!(blob_key = %stored.key, error = %cleanup, "Failed to remove unrecorded blob");
                }
                Err(e.into())
            }
        }
    }
}

async fn open_staged(path: &Path) -> Result<tokio::fs::File, StorageError> {
    Ok(tokio::fs::File::open(path).await?)
}
