use sea_orm::{ConnectionTrait, DbErr};

use crate::entity::file_record;
use crate::records::FileRecordStore;

/// Narrows the store to records that could possibly share an upload's content.
///
/// Equal length is necessary for equal content, and `size` is indexed, so
/// this query is cheap compared to hashing. Duplicates are left out: they
/// alias an original's blob and that original always precedes them in
/// creation order.
pub struct CandidateFilter<'a, C: ConnectionTrait> {
    records: FileRecordStore<'a, C>,
}

impl<'a, C: ConnectionTrait> CandidateFilter<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self {
            records: FileRecordStore::new(conn),
        }
    }

    /// Originals of exactly `size` bytes, oldest first. Empty when none exist.
    pub async fn find_by_size(&self, size: i64) -> Result<Vec<file_record::Model>, DbErr> {
        self.records.find_originals_by_size(size).await
    }
}
