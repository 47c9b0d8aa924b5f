use async_trait::async_trait;
use tokio::io::AsyncRead;

use super::digest::ContentDigest;
use super::error::StorageError;
use super::key::BlobKey;

/// Type alias for a boxed async reader.
pub type BoxReader = Box<dyn AsyncRead + Unpin + Send>;

/// A blob that has just been written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub key: BlobKey,
    /// Bytes written.
    pub size: u64,
}

/// Handle-addressed blob storage.
///
/// The store never deduplicates on its own: every `put_stream` allocates a new key.
/// Deciding whether bytes need to be written at all is the caller's job.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store everything from an async reader under a freshly allocated key.
    async fn put_stream(&self, reader: BoxReader) -> Result<StoredBlob, StorageError>;

    /// Retrieve a blob as a streaming async reader.
    async fn get_stream(&self, key: &BlobKey) -> Result<BoxReader, StorageError>;

    /// Digest the blob's current content.
    ///
    /// Always reads the live bytes; nothing is cached.
    async fn digest(&self, key: &BlobKey) -> Result<ContentDigest, StorageError> {
        let mut reader = self.get_stream(key).await?;
        Ok(ContentDigest::from_reader(&mut reader).await?)
    }

    /// Delete a blob.
    ///
    /// Returns `true` if the blob was deleted, `false` if it did not exist.
    async fn delete(&self, key: &BlobKey) -> Result<bool, StorageError>;

    /// Size of a blob in bytes.
    async fn size(&self, key: &BlobKey) -> Result<u64, StorageError>;
}
