use sea_orm::{ConnectionTrait, DbErr};

use crate::records::FileRecordStore;

/// Reports storage avoided by deduplication.
pub struct SavingsAccountant<'a, C: ConnectionTrait> {
    records: FileRecordStore<'a, C>,
}

impl<'a, C: ConnectionTrait> SavingsAccountant<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self {
            records: FileRecordStore::new(conn),
        }
    }

    /// Bytes not written because their uploads were duplicates.
    ///
    /// Sums the declared size of every duplicate record; zero when there are none.
    pub async fn total_saved(&self) -> Result<i64, DbErr> {
        self.records.duplicate_bytes().await
    }
}
