//! Content deduplication: deciding whether an upload needs its own blob.

mod candidates;
mod ingest;
mod locks;
mod resolver;
mod savings;

pub use candidates::CandidateFilter;
pub use ingest::{IngestOutcome, Ingestor};
pub use locks::{SizeGuard, SizeLocks};
pub use resolver::{DuplicateResolver, Verdict};
pub use savings::SavingsAccountant;

use common::storage::StorageError;
use sea_orm::DbErr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DedupError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
