//! Artifact Store
//!
//! Content-addressed, revision-versioned blob storage keyed by
//! `(namespace, name)`. Every `put` claims the next revision for its key and
//! never overwrites an earlier one; "latest" is the highest revision.
//!
//! Two backends:
//! - [`MemoryArtifactStore`]: process-local, for tests and embedding
//! - [`FsArtifactStore`]: one file per revision under a root directory

mod fs;
mod memory;

pub use fs::FsArtifactStore;
pub use memory::MemoryArtifactStore;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{RatchetError, Result};

/// Which revision of an artifact to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revision {
    Latest,
    At(u64),
}

impl From<Option<u64>> for Revision {
    fn from(value: Option<u64>) -> Self {
        value.map(Revision::At).unwrap_or(Revision::Latest)
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Revision::Latest => write!(f, "latest"),
            Revision::At(rev) => write!(f, "{}", rev),
        }
    }
}

/// Reference to a stored artifact, embedded in step outputs instead of content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub name: String,
    pub revision: u64,
}

/// Metadata for one stored revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub namespace: String,
    pub name: String,
    pub revision: u64,
    /// Lowercase hex SHA-256 of the content
    pub content_hash: String,
    pub size: u64,
    pub created_at: i64,
}

impl ArtifactMeta {
    pub fn to_ref(&self) -> ArtifactRef {
        ArtifactRef {
            name: self.name.clone(),
            revision: self.revision,
        }
    }
}

/// A stored revision with its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub meta: ArtifactMeta,
    pub content: Vec<u8>,
}

impl Artifact {
    /// Content as UTF-8 text, if it is valid UTF-8.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }
}

/// Storage contract shared by every backend.
///
/// Writes to different keys never contend; concurrent writes to the same key
/// each receive their own revision.
pub trait ArtifactStore: Send + Sync {
    /// Store a new revision and return its metadata.
    fn put(&self, namespace: &str, name: &str, content: &[u8]) -> Result<ArtifactMeta>;

    /// Read a revision. Fails with `NotFound` if the key or revision is absent.
    fn get(&self, namespace: &str, name: &str, revision: Revision) -> Result<Artifact>;

    /// Metadata of a revision without its content.
    fn head(&self, namespace: &str, name: &str, revision: Revision) -> Result<ArtifactMeta> {
        self.get(namespace, name, revision).map(|a| a.meta)
    }

    /// All revision numbers for a key, ascending. Empty if the key is absent.
    fn revisions(&self, namespace: &str, name: &str) -> Result<Vec<u64>>;

    /// Latest revision of every artifact in a namespace, ordered by name.
    fn list(&self, namespace: &str) -> Result<Vec<ArtifactMeta>>;

    /// Remove every artifact in a namespace, returning the number of revisions removed.
    fn purge_namespace(&self, namespace: &str) -> Result<usize>;
}

/// Lowercase hex SHA-256 of some content.
pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Check a namespace or name: `/`-separated, non-empty segments, no `.`/`@`
/// prefixed segments (reserved for revisions and temp files), no backslashes.
pub(crate) fn validate_key_part(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(RatchetError::InvalidState(format!("empty artifact {}", kind)));
    }
    if value.contains('\\') {
        return Err(RatchetError::InvalidState(format!("artifact {} '{}' contains '\\'", kind, value)));
    }
    for segment in value.split('/') {
        if segment.is_empty() || segment.starts_with('.') || segment.starts_with('@') {
            return Err(RatchetError::InvalidState(format!(
                "artifact {} '{}' has invalid segment '{}'",
                kind, value, segment
            )));
        }
    }
    Ok(())
}

pub(crate) fn not_found(namespace: &str, name: &str, revision: Revision) -> RatchetError {
    RatchetError::NotFound(format!("artifact {}/{}@{}", namespace, name, revision))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_sha256_hex() {
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_validate_key_part() {
        assert!(validate_key_part("name", "patches/SPEND-123.diff").is_ok());
        assert!(validate_key_part("name", "").is_err());
        assert!(validate_key_part("name", "/abs").is_err());
        assert!(validate_key_part("name", "a//b").is_err());
        assert!(validate_key_part("name", "../escape").is_err());
        assert!(validate_key_part("name", "a/@0").is_err());
        assert!(validate_key_part("name", "a\\b").is_err());
    }

    #[test]
    fn test_revision_from_option() {
        assert_eq!(Revision::from(None), Revision::Latest);
        assert_eq!(Revision::from(Some(3)), Revision::At(3));
        assert_eq!(Revision::At(3).to_string(), "3");
    }

    #[test]
    fn test_artifact_text() {
        let artifact = Artifact {
            meta: ArtifactMeta {
                namespace: "ns".to_string(),
                name: "report".to_string(),
                revision: 0,
                content_hash: content_hash(b"hi"),
                size: 2,
                created_at: 0,
            },
            content: b"hi".to_vec(),
        };
        assert_eq!(artifact.text(), Some("hi"));
        assert_eq!(artifact.meta.to_ref(), ArtifactRef { name: "report".to_string(), revision: 0 });
    }
}
