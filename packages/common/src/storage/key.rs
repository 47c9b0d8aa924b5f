use std::fmt;
use std::path::PathBuf;

use uuid::Uuid;

use super::error::StorageError;

/// Handle of one physical blob inside a [`BlobStore`](super::BlobStore).
///
/// Keys are allocated by the store when bytes are written and are opaque to
/// callers. The canonical form is a sharded relative path,
/// `{2 hex chars}/{30 hex chars}`, so several records may alias one blob by
/// sharing its key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobKey(String);

impl BlobKey {
    /// Allocate a fresh, never-before-used key.
    pub fn generate() -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self(format!("{}/{}", &id[..2], &id[2..]))
    }

    /// Parse a key previously obtained from [`BlobKey::as_str`].
    pub fn parse(s: &str) -> Result<Self, StorageError> {
        let (prefix, suffix) = s
            .split_once('/')
            .ok_or_else(|| StorageError::InvalidKey(format!("missing shard separator: {s}")))?;

        let is_lower_hex = |part: &str| part.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if prefix.len() != 2 || suffix.len() != 30 || !is_lower_hex(prefix) || !is_lower_hex(suffix)
        {
            return Err(StorageError::InvalidKey(format!("malformed key: {s}")));
        }

        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shard directory name.
    pub fn shard_prefix(&self) -> &str {
        &self.0[..2]
    }

    /// File name within the shard directory.
    pub fn shard_suffix(&self) -> &str {
        &self.0[3..]
    }

    /// Relative filesystem path of the blob below a store root.
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(self.shard_prefix()).join(self.shard_suffix())
    }
}

impl fmt::Debug for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobKey({})", self.0)
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
