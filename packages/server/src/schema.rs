use sea_orm::sea_query::{Index, IndexCreateStatement, PostgresQueryBuilder, SqliteQueryBuilder};
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection};
use tracing::{info, warn};

use crate::entity::file_record;

/// Create secondary indexes schema-sync does not manage.
///
/// A failure is logged and skipped; the service still works without them.
pub async fn ensure_indexes(db: &DatabaseConnection) {
    // Candidate lookup: WHERE size = ? AND original_file_id IS NULL
    ensure(
        db,
        "idx_file_record_size_original",
        Index::create()
            .if_not_exists()
            .name("idx_file_record_size_original")
            .table(file_record::Entity)
            .col(file_record::Column::Size)
            .col(file_record::Column::OriginalFileId)
            .to_owned(),
    )
    .await;

    // Date-range listing and creation order.
    ensure(
        db,
        "idx_file_record_uploaded_at",
        Index::create()
            .if_not_exists()
            .name("idx_file_record_uploaded_at")
            .table(file_record::Entity)
            .col(file_record::Column::UploadedAt)
            .to_owned(),
    )
    .await;

    // Blob reference counting on delete.
    ensure(
        db,
        "idx_file_record_blob_key",
        Index::create()
            .if_not_exists()
            .name("idx_file_record_blob_key")
            .table(file_record::Entity)
            .col(file_record::Column::BlobKey)
            .to_owned(),
    )
    .await;
}

async fn ensure(db: &DatabaseConnection, name: &str, stmt: IndexCreateStatement) {
    let sql = match db.get_database_backend() {
        DatabaseBackend::Sqlite => stmt.to_string(SqliteQueryBuilder),
        _ => stmt.to_string(PostgresQueryBuilder),
    };

    match db.execute_unprepared(&sql).await {
        Ok(_) => info!("Ensured index {} exists", name),
        Err(e) => warn!("Failed to create index {}: {}", name, e),
    }
}
