use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use ::common::StorageConfig;
use ::common::storage::filesystem::FilesystemBlobStore;
use ::common::storage::{BlobKey, BlobStore, BoxReader, StorageError, StoredBlob};
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use sea_orm::DatabaseConnection;
use serde_json::Value;
use tempfile::TempDir;

use filevault::config::{AppConfig, CorsConfig, DatabaseConfig, ServerConfig};
use filevault::dedup::SizeLocks;
use filevault::state::AppState;

pub mod routes {
    pub const FILES: &str = "/api/v1/files";
    pub const SAVINGS: &str = "/api/v1/files/savings";

    pub fn file(id: &str) -> String {
        format!("/api/v1/files/{id}")
    }

    pub fn download(id: &str) -> String {
        format!("/api/v1/files/{id}/download")
    }

    pub fn status(id: &str) -> String {
        format!("/api/v1/files/{id}/status")
    }
}

/// Blob store decorator that counts reads and writes.
pub struct CountingBlobStore {
    inner: Arc<dyn BlobStore>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl CountingBlobStore {
    pub fn new(inner: Arc<dyn BlobStore>) -> Self {
        Self {
            inner,
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for CountingBlobStore {
    async fn put_stream(&self, reader: BoxReader) -> Result<StoredBlob, StorageError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.put_stream(reader).await
    }

    async fn get_stream(&self, key: &BlobKey) -> Result<BoxReader, StorageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get_stream(key).await
    }

    async fn delete(&self, key: &BlobKey) -> Result<bool, StorageError> {
        self.inner.delete(key).await
    }

    async fn size(&self, key: &BlobKey) -> Result<u64, StorageError> {
        self.inner.size(key).await
    }
}

/// A running test server backed by a throwaway SQLite database and blob root.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub db: DatabaseConnection,
    pub state: AppState,
    pub blobs: Arc<CountingBlobStore>,
    pub blob_root: PathBuf,
    _dir: TempDir,
}

/// Parsed HTTP response for test assertions.
pub struct TestResponse {
    pub status: u16,
    /// Raw response body as text.
    pub text: String,
    /// Parsed JSON body, or `Null` if the response is not valid JSON.
    pub body: Value,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Spawn with a tweaked configuration.
    pub async fn spawn_with(configure: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let db_url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
        let blob_root = dir.path().join("blobs");

        let mut config = AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                utc_offset_minutes: 0,
                cors: CorsConfig {
                    allow_origins: vec![],
                    max_age: 3600,
                },
            },
            database: DatabaseConfig { url: db_url },
            storage: StorageConfig {
                root: blob_root.clone(),
                ..StorageConfig::default()
            },
        };
        configure(&mut config);

        let db = filevault::database::init_db(&config.database.url)
            .await
            .expect("Failed to initialize test database");
        filevault::schema::ensure_indexes(&db).await;

        let fs_store = FilesystemBlobStore::new(
            config.storage.root.clone(),
            config.storage.max_blob_size,
        )
        .await
        .expect("Failed to create blob store");
        let blobs = Arc::new(CountingBlobStore::new(Arc::new(fs_store)));

        let state = AppState {
            db: db.clone(),
            config: Arc::new(config),
            blob_store: blobs.clone(),
            size_locks: Arc::new(SizeLocks::new()),
        };

        let app = filevault::build_router(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            client: Client::new(),
            db,
            state,
            blobs,
            blob_root,
            _dir: dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        let res = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to send GET request");
        TestResponse::from_response(res).await
    }

    pub async fn get_raw(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to send GET request")
    }

    pub async fn delete(&self, path: &str) -> TestResponse {
        let res = self
            .client
            .delete(self.url(path))
            .send()
            .await
            .expect("Failed to send DELETE request");
        TestResponse::from_response(res).await
    }

    /// Upload `bytes` as the `file` field, letting the server guess the type.
    pub async fn upload(&self, file_name: &str, bytes: &[u8]) -> TestResponse {
        self.upload_part(Part::bytes(bytes.to_vec()).file_name(file_name.to_string()))
            .await
    }

    /// Upload `bytes` as the `file` field with a declared MIME type.
    pub async fn upload_typed(&self, file_name: &str, bytes: &[u8], mime: &str) -> TestResponse {
        let part = Part::bytes(bytes.to_vec())
            .file_name(file_name.to_string())
            .mime_str(mime)
            .expect("Invalid MIME type");
        self.upload_part(part).await
    }

    async fn upload_part(&self, part: Part) -> TestResponse {
        self.upload_form(Form::new().part("file", part)).await
    }

    pub async fn upload_form(&self, form: Form) -> TestResponse {
        let res = self
            .client
            .post(self.url(routes::FILES))
            .multipart(form)
            .send()
            .await
            .expect("Failed to send multipart upload request");
        TestResponse::from_response(res).await
    }

    /// Upload and return the new record's id, asserting the expected status.
    pub async fn upload_expecting(&self, file_name: &str, bytes: &[u8], status: u16) -> String {
        let res = self.upload(file_name, bytes).await;
        assert_eq!(res.status, status, "upload of {file_name} failed: {}", res.text);
        res.id()
    }

    pub async fn savings(&self) -> i64 {
        let res = self.get(routes::SAVINGS).await;
        assert_eq!(res.status, 200, "savings failed: {}", res.text);
        res.body.as_i64().expect("savings should be a bare integer")
    }

    /// Ids of every listed record for `query` (e.g. `"?min_size=1"`), in order.
    pub async fn list_ids(&self, query: &str) -> Vec<String> {
        let res = self.get(&format!("{}{query}", routes::FILES)).await;
        assert_eq!(res.status, 200, "list failed: {}", res.text);
        res.body
            .as_array()
            .expect("list should be a bare array")
            .iter()
            .map(|r| r["id"].as_str().unwrap().to_string())
            .collect()
    }

    /// Number of blob files under the blob root, excluding staging.
    pub fn blob_file_count(&self) -> usize {
        fn walk(dir: &std::path::Path) -> usize {
            let Ok(entries) = std::fs::read_dir(dir) else {
                return 0;
            };
            entries
                .flatten()
                .map(|entry| {
                    let path = entry.path();
                    if path.file_name().is_some_and(|n| n == ".tmp") {
                        0
                    } else if path.is_dir() {
                        walk(&path)
                    } else {
                        1
                    }
                })
                .sum()
        }
        walk(&self.blob_root)
    }
}

impl TestResponse {
    pub async fn from_response(res: reqwest::Response) -> Self {
        let status = res.status().as_u16();
        let text = res.text().await.unwrap_or_default();
        let body = serde_json::from_str(&text).unwrap_or(Value::Null);
        Self { status, text, body }
    }

    pub fn id(&self) -> String {
        self.body["id"]
            .as_str()
            .expect("response body should contain 'id'")
            .to_string()
    }
}
