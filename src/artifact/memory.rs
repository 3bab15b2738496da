//! In-memory artifact store.

use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{Artifact, ArtifactMeta, ArtifactStore, Revision, content_hash, not_found, validate_key_part};
use crate::error::{RatchetError, Result};
use crate::id::now_ms;

/// Process-local artifact store. One lock guards revision allocation, so a
/// single `put` is atomic with respect to every other call.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    inner: Mutex<BTreeMap<(String, String), Vec<Artifact>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn put(&self, namespace: &str, name: &str, content: &[u8]) -> Result<ArtifactMeta> {
        validate_key_part("namespace", namespace)?;
        validate_key_part("name", name)?;

        let mut inner = self.inner.lock().map_err(RatchetError::poisoned)?;
        let revisions = inner.entry((namespace.to_string(), name.to_string())).or_default();
        let meta = ArtifactMeta {
            namespace: namespace.to_string(),
            name: name.to_string(),
            revision: revisions.len() as u64,
            content_hash: content_hash(content),
            size: content.len() as u64,
            created_at: now_ms(),
        };
        revisions.push(Artifact {
            meta: meta.clone(),
            content: content.to_vec(),
        });
        Ok(meta)
    }

    fn get(&self, namespace: &str, name: &str, revision: Revision) -> Result<Artifact> {
        let inner = self.inner.lock().map_err(RatchetError::poisoned)?;
        let revisions = inner
            .get(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| not_found(namespace, name, revision))?;
        let found = match revision {
            Revision::Latest => revisions.last(),
            Revision::At(rev) => revisions.get(rev as usize),
        };
        found.cloned().ok_or_else(|| not_found(namespace, name, revision))
    }

    fn revisions(&self, namespace: &str, name: &str) -> Result<Vec<u64>> {
        let inner = self.inner.lock().map_err(RatchetError::poisoned)?;
        Ok(inner
            .get(&(namespace.to_string(), name.to_string()))
            .map(|revs| revs.iter().map(|a| a.meta.revision).collect())
            .unwrap_or_default())
    }

    fn list(&self, namespace: &str) -> Result<Vec<ArtifactMeta>> {
        let inner = self.inner.lock().map_err(RatchetError::poisoned)?;
        Ok(inner
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .filter_map(|(_, revs)| revs.last().map(|a| a.meta.clone()))
            .collect())
    }

    fn purge_namespace(&self, namespace: &str) -> Result<usize> {
        let mut inner = self.inner.lock().map_err(RatchetError::poisoned)?;
        let mut removed = 0;
        inner.retain(|(ns, _), revs| {
            if ns == namespace {
                removed += revs.len();
                false
            } else {
                true
            }
        });
        Ok(removed)
    }
}
