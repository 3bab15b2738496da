//! The contract between the core and the collaborator behind each step.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::artifact::{Artifact, ArtifactRef, ArtifactStore, Revision};
use crate::domain::StepFailure;
use crate::error::Result;
use crate::id::run_namespace;

/// A collaborator's view of its run's artifact namespace.
///
/// Collaborators write blobs here and put the returned [`ArtifactRef`] in
/// their output rather than the content itself.
#[derive(Clone)]
pub struct ArtifactScope {
    store: Arc<dyn ArtifactStore>,
    namespace: String,
}

impl ArtifactScope {
    pub fn new(store: Arc<dyn ArtifactStore>, run_id: &str) -> Self {
        Self {
            store,
            namespace: run_namespace(run_id),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn put(&self, name: &str, content: &[u8]) -> Result<ArtifactRef> {
        self.store.put(&self.namespace, name, content).map(|meta| meta.to_ref())
    }

    pub fn get(&self, name: &str, revision: Revision) -> Result<Artifact> {
        self.store.get(&self.namespace, name, revision)
    }

    /// Resolve a reference produced by an earlier step.
    pub fn resolve(&self, reference: &ArtifactRef) -> Result<Artifact> {
        self.get(&reference.name, Revision::At(reference.revision))
    }
}

impl std::fmt::Debug for ArtifactScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactScope").field("namespace", &self.namespace).finish()
    }
}

/// Everything a collaborator receives for one invocation.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub run_id: String,
    pub iteration: u32,
    pub step: String,
    /// 1-based invocation count within this iteration
    pub attempt: u32,
    /// Schema-validated input assembled from the work unit and ledger
    pub input: Value,
    pub artifacts: ArtifactScope,
}

/// An external collaborator: an opaque function from a typed input to a
/// typed output or a failure.
#[async_trait]
pub trait Step: Send + Sync {
    async fn invoke(&self, ctx: &StepContext) -> std::result::Result<Value, StepFailure>;
}
