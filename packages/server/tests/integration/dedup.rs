use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use ::common::storage::{BlobKey, StorageError};
use filevault::dedup::{DedupError, DuplicateResolver, SavingsAccountant, Verdict};
use filevault::records::{BlobSource, FileRecordStore, NewFileRecord};
use uuid::Uuid;

use crate::common::{TestApp, routes};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

async fn remove_blob_of(app: &TestApp, id: &str) {
    let record = FileRecordStore::new(&app.db)
        .find_by_id(Uuid::parse_str(id).unwrap())
        .await
        .unwrap()
        .unwrap();
    let key = BlobKey::parse(&record.blob_key).unwrap();
    assert!(app.state.blob_store.delete(&key).await.unwrap());
}

mod size_short_circuit {
    use super::*;

    #[tokio::test]
    async fn new_size_never_reads_stored_content() {
        let app = TestApp::spawn().await;
        for (i, len) in [3usize, 10, 100, 1000].into_iter().enumerate() {
            app.upload_expecting(&format!("f{i}.bin"), &vec![b'x'; len], 201)
                .await;
        }
        let reads = app.blobs.reads();

        app.upload_expecting("new.bin", &[b'x'; 42], 201).await;

        assert_eq!(app.blobs.reads(), reads);
    }

    #[tokio::test]
    async fn unique_verdict_leaves_upload_unread_without_candidates() {
        let app = TestApp::spawn().await;
        app.upload_expecting("other.bin", b"four", 201).await;

        let resolver = DuplicateResolver::new(&app.db, &*app.state.blob_store, READ_TIMEOUT);
        let mut upload = Cursor::new(b"seven b".to_vec());
        let verdict = resolver.resolve(&mut upload, 7).await.unwrap();

        assert!(matches!(verdict, Verdict::Unique));
        assert_eq!(upload.position(), 0);
    }

    #[tokio::test]
    async fn equal_size_different_content_is_unique() {
        let app = TestApp::spawn().await;
        let first = app.upload_expecting("a.txt", b"aaaa", 201).await;
        let reads = app.blobs.reads();

        let second = app.upload("b.txt", b"bbbb").await;

        assert_eq!(second.status, 201);
        assert!(second.body["original_file_id"].is_null());
        assert_eq!(app.blobs.reads(), reads + 1);
        assert_eq!(app.get(&routes::status(&first)).await.body["status"], "OK");
    }
}

mod resolution {
    use super::*;

    #[tokio::test]
    async fn duplicate_writes_no_blob_and_counts_savings() {
        let app = TestApp::spawn().await;
        let first = app.upload_expecting("a.txt", b"identical", 201).await;
        let writes = app.blobs.writes();

        let second = app.upload("b.txt", b"identical").await;

        assert_eq!(second.status, 409);
        assert_eq!(app.blobs.writes(), writes);
        assert_eq!(app.blob_file_count(), 1);

        let saved = SavingsAccountant::new(&app.db).total_saved().await.unwrap();
        assert_eq!(saved, 9);
        assert_eq!(second.body["original_file_id"], first.as_str());
    }

    #[tokio::test]
    async fn resolver_reports_matched_original() {
        let app = TestApp::spawn().await;
        let first = app.upload_expecting("a.txt", b"match me", 201).await;

        let resolver = DuplicateResolver::new(&app.db, &*app.state.blob_store, READ_TIMEOUT);
        let verdict = resolver
            .resolve(&mut Cursor::new(b"match me".to_vec()), 8)
            .await
            .unwrap();

        assert!(verdict.is_duplicate());
        assert_eq!(verdict.matched_record_id().map(|id| id.to_string()), Some(first));
    }

    #[tokio::test]
    async fn duplicates_are_never_candidates() {
        let app = TestApp::spawn().await;
        let original = app.upload_expecting("a.txt", b"chain", 201).await;
        app.upload_expecting("b.txt", b"chain", 409).await;
        let reads = app.blobs.reads();

        let third = app.upload("c.txt", b"chain").await;

        assert_eq!(third.body["original_file_id"], original.as_str());
        // Only the original was compared.
        assert_eq!(app.blobs.reads(), reads + 1);
    }

    #[tokio::test]
    async fn aliasing_a_duplicate_points_at_its_original() {
        let app = TestApp::spawn().await;
        let original = app.upload_expecting("a.txt", b"flat", 201).await;
        let dup = app.upload_expecting("b.txt", b"flat", 409).await;

        let store = FileRecordStore::new(&app.db);
        let dup_model = store
            .find_by_id(Uuid::parse_str(&dup).unwrap())
            .await
            .unwrap()
            .unwrap();
        let created = store
            .create(
                NewFileRecord {
                    original_filename: "c.txt".into(),
                    file_type: "text/plain".into(),
                    size: 4,
                },
                BlobSource::AliasOf(&dup_model),
            )
            .await
            .unwrap();

        assert_eq!(created.original_file_id.map(|id| id.to_string()), Some(original));
        assert_eq!(created.blob_key, dup_model.blob_key);
    }

    #[tokio::test]
    async fn unreadable_candidate_is_skipped() {
        let app = TestApp::spawn().await;
        let lost = app.upload_expecting("lost.txt", b"hello", 201).await;
        remove_blob_of(&app, &lost).await;

        let replacement = app.upload("again.txt", b"hello").await;
        assert_eq!(replacement.status, 201, "{}", replacement.text);
        assert!(replacement.body["original_file_id"].is_null());

        // The unreadable record is still first in line but a later original matches.
        let next = app.upload("third.txt", b"hello").await;
        assert_eq!(next.status, 409);
        assert_eq!(
            next.body["original_file_id"].as_str(),
            Some(replacement.id().as_str())
        );
    }

    #[tokio::test]
    async fn stalled_upload_times_out() {
        let app = TestApp::spawn().await;
        app.upload_expecting("a.bin", b"12345678", 201).await;

        // The writer half stays open, so reads never complete.
        let (_writer, mut reader) = tokio::io::duplex(64);
        let resolver =
            DuplicateResolver::new(&app.db, &*app.state.blob_store, Duration::from_millis(50));
        let result = resolver.resolve(&mut reader, 8).await;

        match result {
            Err(DedupError::Storage(StorageError::Io(e))) => {
                assert_eq!(e.kind(), std::io::ErrorKind::TimedOut);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}

mod concurrency {
    use super::*;

    #[tokio::test]
    async fn concurrent_identical_uploads_store_one_blob() {
        let app = Arc::new(TestApp::spawn().await);

        let mut handles = Vec::new();
        for i in 0..8 {
            let app = Arc::clone(&app);
            handles.push(tokio::spawn(async move {
                app.upload(&format!("copy-{i}.txt"), b"racing content").await
            }));
        }
        let mut responses = Vec::new();
        for handle in handles {
            responses.push(handle.await.unwrap());
        }

        let created: Vec<_> = responses.iter().filter(|r| r.status == 201).collect();
        assert_eq!(created.len(), 1, "exactly one upload should own the content");
        let original = created[0].id();
        for res in responses.iter().filter(|r| r.status != 201) {
            assert_eq!(res.status, 409, "{}", res.text);
            assert_eq!(res.body["original_file_id"], original.as_str());
        }

        assert_eq!(app.blob_file_count(), 1);
        assert_eq!(app.savings().await, 7 * 14);
        assert_eq!(app.state.size_locks.active(), 0);
    }

    #[tokio::test]
    async fn concurrent_distinct_uploads_are_all_unique() {
        let app = Arc::new(TestApp::spawn().await);

        let mut handles = Vec::new();
        for i in 0..6 {
            let app = Arc::clone(&app);
            handles.push(tokio::spawn(async move {
                app.upload(&format!("distinct-{i}.txt"), format!("content number {i}").as_bytes())
                    .await
            }));
        }
        for handle in handles {
            let res = handle.await.unwrap();
            assert_eq!(res.status, 201, "{}", res.text);
        }

        assert_eq!(app.blob_file_count(), 6);
        assert_eq!(app.savings().await, 0);
    }
}
