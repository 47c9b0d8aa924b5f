use std::io;
use std::time::Duration;

use common::storage::{BlobKey, BlobStore, ContentDigest, StorageError};
use sea_orm::ConnectionTrait;
use tokio::io::AsyncRead;
use tracing::{debug, warn};

use crate::entity::file_record;

use super::DedupError;
use super::candidates::CandidateFilter;

/// Outcome of checking an upload against stored content.
#[derive(Debug, Clone)]
pub enum Verdict {
    /// No stored record holds these bytes.
    Unique,
    /// Byte-identical to this stored original.
    Duplicate(file_record::Model),
}

impl Verdict {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Verdict::Duplicate(_))
    }

    pub fn matched_record_id(&self) -> Option<uuid::Uuid> {
        match self {
            Verdict::Unique => None,
            Verdict::Duplicate(original) => Some(original.id),
        }
    }
}

/// Decides whether an upload duplicates content that is already stored.
///
/// Candidates are narrowed by exact size before anything is hashed. If no
/// record shares the upload's size the upload is unique and neither side is
/// read. Otherwise the upload is digested once and compared, oldest first,
/// against a digest of each candidate's live blob. A candidate whose blob
/// cannot be read is skipped; a failure reading the upload aborts.
pub struct DuplicateResolver<'a, C: ConnectionTrait> {
    candidates: CandidateFilter<'a, C>,
    blobs: &'a dyn BlobStore,
    read_timeout: Duration,
}

impl<'a, C: ConnectionTrait> DuplicateResolver<'a, C> {
    pub fn new(conn: &'a C, blobs: &'a dyn BlobStore, read_timeout: Duration) -> Self {
        Self {
            candidates: CandidateFilter::new(conn),
            blobs,
            read_timeout,
        }
    }

    /// Resolve an upload of `size` bytes whose content is readable from `upload`.
    ///
    /// `upload` is consumed only when at least one candidate exists.
    pub async fn resolve<R>(&self, upload: &mut R, size: i64) -> Result<Verdict, DedupError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let candidates = self.candidates.find_by_size(size).await?;
        if candidates.is_empty() {
            debug!(size, "No size match, upload is unique");
            return Ok(Verdict::Unique);
        }

        let upload_digest =
            match tokio::time::timeout(self.read_timeout, ContentDigest::from_reader(upload)).await
            {
                Ok(digest) => digest.map_err(StorageError::from)?,
                Err(_) => return Err(timed_out("upload").into()),
            };

        debug!(
            size,
            candidates = candidates.len(),
            digest = %upload_digest,
            "Comparing upload against size matches"
        );

        for candidate in candidates {
            let Some(candidate_digest) = self.candidate_digest(&candidate).await else {
                continue;
            };
            if candidate_digest == upload_digest {
                debug!(size, matched = %candidate.id, "Upload matches stored content");
                return Ok(Verdict::Duplicate(candidate));
            }
        }

        Ok(Verdict::Unique)
    }

    /// Digest of a candidate's stored bytes, or `None` if they cannot be read.
    async fn candidate_digest(&self, candidate: &file_record::Model) -> Option<ContentDigest> {
        let key = match BlobKey::parse(&candidate.blob_key) {
            Ok(key) => key,
            Err(e) => {
                warn!(record = %candidate.id, error = %e, "Skipping candidate with malformed blob key");
                return None;
            }
        };

        let result = match tokio::time::timeout(self.read_timeout, self.blobs.digest(&key)).await {
            Ok(result) => result,
            Err(_) => Err(timed_out("candidate blob")),
        };

        match result {
            Ok(digest) => Some(digest),
            Err(e) => {
                warn!(
                    record = %candidate.id,
                    blob_key = %key,
                    error = %e,
                    "Skipping candidate whose content cannot be read"
                );
                None
            }
        }
    }
}

fn timed_out(what: &str) -> StorageError {
    StorageError::Io(io::Error::new(
        io::ErrorKind::TimedOut,
        format!("reading {what} timed out"),
    ))
}
