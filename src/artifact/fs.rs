//! Filesystem-backed artifact store.
//!
//! Layout: `<root>/<namespace>/@/<name>/@<revision>`. The `@` directory marks
//! where a namespace ends and names begin; key segments may not start with
//! `@`, so a nested namespace never aliases a name. A write first lands in a
//! temp file beside the revisions, then is hard-linked onto the next free
//! revision path. `hard_link` fails if the target exists, so a revision is
//! claimed only once and only with complete content; a writer that loses the
//! race simply claims the next number.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use rand::Rng;

use super::{Artifact, ArtifactMeta, ArtifactStore, Revision, content_hash, not_found, validate_key_part};
use crate::error::Result;

const REVISION_PREFIX: char = '@';
const NAMES_DIR: &str = "@";

/// Artifact store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Open (creating if needed) a store at the given root.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_dir(&self, namespace: &str, name: &str) -> Result<PathBuf> {
        validate_key_part("namespace", namespace)?;
        validate_key_part("name", name)?;
        Ok(self.names_dir(namespace).join(name))
    }

    fn names_dir(&self, namespace: &str) -> PathBuf {
        self.root.join(namespace).join(NAMES_DIR)
    }

    /// Remove now-empty namespace directories between `dir` and the root.
    fn prune_empty_parents(&self, dir: &Path) {
        let mut current = Some(dir);
        while let Some(path) = current {
            if path == self.root || !path.starts_with(&self.root) || fs::remove_dir(path).is_err() {
                break;
            }
            current = path.parent();
        }
    }

    fn revision_path(dir: &Path, revision: u64) -> PathBuf {
        dir.join(format!("{}{}", REVISION_PREFIX, revision))
    }

    /// Revision numbers present in a key directory, ascending.
    fn scan_revisions(dir: &Path) -> Result<Vec<u64>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut revisions = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            if let Some(rev) = file_name
                .to_str()
                .and_then(|n| n.strip_prefix(REVISION_PREFIX))
                .and_then(|n| n.parse::<u64>().ok())
            {
                revisions.push(rev);
            }
        }
        revisions.sort_unstable();
        Ok(revisions)
    }

    fn read_meta(namespace: &str, name: &str, revision: u64, path: &Path, content: &[u8]) -> Result<ArtifactMeta> {
        let created_at = fs::metadata(path)?
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Ok(ArtifactMeta {
            namespace: namespace.to_string(),
            name: name.to_string(),
            revision,
            content_hash: content_hash(content),
            size: content.len() as u64,
            created_at,
        })
    }

    /// Recursively collect artifact names (relative paths) under a namespace directory.
    fn collect_names(base: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
        let mut has_revision = false;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if file_type.is_dir() {
                Self::collect_names(base, &entry.path(), out)?;
            } else if file_name.starts_with(REVISION_PREFIX) {
                has_revision = true;
            }
        }
        if has_revision {
            if let Ok(rel) = dir.strip_prefix(base) {
                let name = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                if !name.is_empty() {
                    out.push(name);
                }
            }
        }
        Ok(())
    }
}

impl ArtifactStore for FsArtifactStore {
    fn put(&self, namespace: &str, name: &str, content: &[u8]) -> Result<ArtifactMeta> {
        let dir = self.key_dir(namespace, name)?;
        fs::create_dir_all(&dir)?;

        let suffix: u64 = rand::rng().random();
        let tmp = dir.join(format!(".tmp-{:016x}", suffix));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(content)?;
            file.sync_all()?;
        }

        let revision = loop {
            let next = Self::scan_revisions(&dir)?.last().map(|r| r + 1).unwrap_or(0);
            match fs::hard_link(&tmp, Self::revision_path(&dir, next)) {
                Ok(()) => break next,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    let _ = fs::remove_file(&tmp);
                    return Err(e.into());
                }
            }
        };
        fs::remove_file(&tmp)?;

        log::debug!("Stored artifact {}/{}@{}", namespace, name, revision);
        Self::read_meta(namespace, name, revision, &Self::revision_path(&dir, revision), content)
    }

    fn get(&self, namespace: &str, name: &str, revision: Revision) -> Result<Artifact> {
        let dir = self.key_dir(namespace, name)?;
        let rev = match revision {
            Revision::At(rev) => rev,
            Revision::Latest => *Self::scan_revisions(&dir)?
                .last()
                .ok_or_else(|| not_found(namespace, name, revision))?,
        };
        let path = Self::revision_path(&dir, rev);
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(not_found(namespace, name, revision)),
            Err(e) => return Err(e.into()),
        };
        let meta = Self::read_meta(namespace, name, rev, &path, &content)?;
        Ok(Artifact { meta, content })
    }

    fn revisions(&self, namespace: &str, name: &str) -> Result<Vec<u64>> {
        Self::scan_revisions(&self.key_dir(namespace, name)?)
    }

    fn list(&self, namespace: &str) -> Result<Vec<ArtifactMeta>> {
        validate_key_part("namespace", namespace)?;
        let base = self.names_dir(namespace);
        if !base.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        Self::collect_names(&base, &base, &mut names)?;
        names.sort();
        names
            .iter()
            .map(|name| self.head(namespace, name, Revision::Latest))
            .collect()
    }

    fn purge_namespace(&self, namespace: &str) -> Result<usize> {
        validate_key_part("namespace", namespace)?;
        let base = self.names_dir(namespace);
        if !base.is_dir() {
            return Ok(0);
        }
        let mut names = Vec::new();
        Self::collect_names(&base, &base, &mut names)?;
        let mut removed = 0;
        for name in &names {
            removed += Self::scan_revisions(&base.join(name))?.len();
        }
        fs::remove_dir_all(&base)?;
        self.prune_empty_parents(&self.root.join(namespace));
        log::info!("Purged {} artifact revisions from {}", removed, namespace);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RatchetError;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_test_store() -> (FsArtifactStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FsArtifactStore::open(temp_dir.path()).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_put_assigns_sequential_revisions() {
        let (store, _temp) = create_test_store();
        assert_eq!(store.put("runs/r1", "patch.diff", b"a").unwrap().revision, 0);
        assert_eq!(store.put("runs/r1", "patch.diff", b"b").unwrap().revision, 1);
        assert_eq!(store.put("runs/r1", "patch.diff", b"c").unwrap().revision, 2);
    }

    #[test]
    fn test_get_latest_and_specific() {
        let (store, _temp) = create_test_store();
        store.put("ns", "report", b"first").unwrap();
        store.put("ns", "report", b"second").unwrap();

        assert_eq!(store.get("ns", "report", Revision::Latest).unwrap().content, b"second");
        assert_eq!(store.get("ns", "report", Revision::At(0)).unwrap().content, b"first");
    }

    #[test]
    fn test_meta_hash_matches_content() {
        let (store, _temp) = create_test_store();
        let meta = store.put("ns", "report", b"abc").unwrap();
        assert_eq!(meta.content_hash, content_hash(b"abc"));
        assert_eq!(meta.size, 3);
        assert_eq!(store.head("ns", "report", Revision::At(0)).unwrap().content_hash, meta.content_hash);
    }

    #[test]
    fn test_get_not_found() {
        let (store, _temp) = create_test_store();
        assert!(matches!(
            store.get("ns", "missing", Revision::Latest),
            Err(RatchetError::NotFound(_))
        ));
        store.put("ns", "report", b"x").unwrap();
        assert!(matches!(
            store.get("ns", "report", Revision::At(4)),
            Err(RatchetError::NotFound(_))
        ));
    }

    #[test]
    fn test_nested_names_listed() {
        let (store, _temp) = create_test_store();
        store.put("ns", "patches/SPEND-1.diff", b"1").unwrap();
        store.put("ns", "patches/SPEND-1.diff", b"2").unwrap();
        store.put("ns", "report.json", b"{}").unwrap();

        let listed = store.list("ns").unwrap();
        let names: Vec<_> = listed.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["patches/SPEND-1.diff", "report.json"]);
        assert_eq!(listed[0].revision, 1);
    }

    #[test]
    fn test_list_missing_namespace_is_empty() {
        let (store, _temp) = create_test_store();
        assert!(store.list("nothing").unwrap().is_empty());
    }

    #[test]
    fn test_persistence_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = FsArtifactStore::open(temp_dir.path()).unwrap();
            store.put("ns", "report", b"v0").unwrap();
        }
        let store = FsArtifactStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.put("ns", "report", b"v1").unwrap().revision, 1);
        assert_eq!(store.get("ns", "report", Revision::At(0)).unwrap().content, b"v0");
    }

    #[test]
    fn test_purge_namespace() {
        let (store, _temp) = create_test_store();
        store.put("runs/a", "x", b"1").unwrap();
        store.put("runs/a", "y/z", b"2").unwrap();
        store.put("runs/b", "x", b"3").unwrap();

        assert_eq!(store.purge_namespace("runs/a").unwrap(), 2);
        assert!(store.list("runs/a").unwrap().is_empty());
        assert_eq!(store.list("runs/b").unwrap().len(), 1);
    }

    #[test]
    fn test_namespace_and_name_never_alias() {
        let (store, _temp) = create_test_store();
        assert_eq!(store.put("runs/r1", "work_unit.json", b"first").unwrap().revision, 0);
        assert_eq!(store.put("runs", "r1/work_unit.json", b"second").unwrap().revision, 0);

        assert_eq!(store.get("runs/r1", "work_unit.json", Revision::Latest).unwrap().content, b"first");
        assert_eq!(store.get("runs", "r1/work_unit.json", Revision::Latest).unwrap().content, b"second");
        assert_eq!(store.list("runs").unwrap().len(), 1);
        assert_eq!(store.list("runs/r1").unwrap().len(), 1);
    }

    #[test]
    fn test_purge_leaves_nested_namespaces() {
        let (store, temp) = create_test_store();
        store.put("runs", "index", b"parent").unwrap();
        store.put("runs/r1", "work_unit.json", b"child").unwrap();
        store.put("other", "x", b"1").unwrap();

        assert_eq!(store.purge_namespace("runs").unwrap(), 1);
        assert!(store.list("runs").unwrap().is_empty());
        assert_eq!(store.get("runs/r1", "work_unit.json", Revision::Latest).unwrap().content, b"child");

        assert_eq!(store.purge_namespace("runs/r1").unwrap(), 1);
        assert!(!temp.path().join("runs").exists());
        assert!(temp.path().join("other").exists());
    }

    #[test]
    fn test_rejects_traversal() {
        let (store, _temp) = create_test_store();
        assert!(store.put("ns", "../outside", b"x").is_err());
    }

    #[test]
    fn test_concurrent_writers_same_key() {
        let (store, _temp) = create_test_store();
        let store = Arc::new(store);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || store.put("ns", "shared", format!("payload-{}", i).as_bytes()).unwrap())
            })
            .collect();
        let mut revs: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap().revision).collect();
        revs.sort();
        assert_eq!(revs, (0..8).collect::<Vec<_>>());

        let mut contents: Vec<String> = (0..8)
            .map(|r| store.get("ns", "shared", Revision::At(r)).unwrap().text().unwrap().to_string())
            .collect();
        contents.sort();
        let mut expected: Vec<String> = (0..8).map(|i| format!("payload-{}", i)).collect();
        expected.sort();
        assert_eq!(contents, expected);
    }
}
