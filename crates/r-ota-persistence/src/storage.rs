//! ---
//! ota_section: "03-persistence-logging"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Key-value module state storage backends."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::{PersistenceError, Result};

const STATE_EXTENSION: &str = "state";

/// Opaque per-module state storage provided by the host.
pub trait ModuleStorage: Send + Sync {
    /// Fetch the stored blob for `id`; an empty vector when nothing was stored.
    fn get_module_state(&self, id: &str) -> Result<Vec<u8>>;

    /// Replace the stored blob for `id`.
    fn set_module_state(&self, id: &str, state: &[u8]) -> Result<()>;
}

impl<S: ModuleStorage + ?Sized> ModuleStorage for Arc<S> {
    fn get_module_state(&self, id: &str) -> Result<Vec<u8>> {
        (**self).get_module_state(id)
    }

    fn set_module_state(&self, id: &str, state: &[u8]) -> Result<()> {
        (**self).set_module_state(id, state)
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    blobs: HashMap<String, Vec<u8>>,
    writes: usize,
    fail_reads: bool,
    fail_writes: bool,
}

/// Process-local storage, mainly for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: Mutex<MemoryInner>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a blob without counting it as a write.
    pub fn insert(&self, id: impl Into<String>, state: Vec<u8>) {
        self.inner.lock().blobs.insert(id.into(), state);
    }

    /// Raw blob currently stored for `id`.
    pub fn get(&self, id: &str) -> Option<Vec<u8>> {
        self.inner.lock().blobs.get(id).cloned()
    }

    /// Number of successful writes since creation.
    pub fn write_count(&self) -> usize {
        self.inner.lock().writes
    }

    /// Make subsequent reads fail.
    pub fn fail_reads(&self, fail: bool) {
        self.inner.lock().fail_reads = fail;
    }

    /// Make subsequent writes fail.
    pub fn fail_writes(&self, fail: bool) {
        self.inner.lock().fail_writes = fail;
    }
}

impl ModuleStorage for MemoryStorage {
    fn get_module_state(&self, id: &str) -> Result<Vec<u8>> {
        let inner = self.inner.lock();
        if inner.fail_reads {
            return Err(PersistenceError::Backend(format!(
                "read of {id} rejected by memory storage"
            )));
        }
        Ok(inner.blobs.get(id).cloned().unwrap_or_default())
    }

    fn set_module_state(&self, id: &str, state: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail_writes {
            return Err(PersistenceError::Backend(format!(
                "write of {id} rejected by memory storage"
            )));
        }
        inner.blobs.insert(id.to_owned(), state.to_vec());
        inner.writes += 1;
        Ok(())
    }
}

/// One file per module under a root directory, replaced atomically on write.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Use `root` as the storage directory; it is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Storage directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File backing `id`.
    pub fn path_for(&self, id: &str) -> Result<PathBuf> {
        validate_key(id)?;
        Ok(self.root.join(format!("{id}.{STATE_EXTENSION}")))
    }
}

impl ModuleStorage for FileStorage {
    fn get_module_state(&self, id: &str) -> Result<Vec<u8>> {
        let path = self.path_for(id)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    fn set_module_state(&self, id: &str, state: &[u8]) -> Result<()> {
        let path = self.path_for(id)?;
        fs::create_dir_all(&self.root)?;
        let staging = self.root.join(format!(".{id}.{STATE_EXTENSION}.tmp"));
        {
            let mut file = File::create(&staging)?;
            file.write_all(state)?;
            file.sync_all()?;
        }
        fs::rename(&staging, &path)?;
        debug!(module = id, path = %path.display(), bytes = state.len(), "module state written");
        Ok(())
    }
}

fn validate_key(id: &str) -> Result<()> {
    let invalid = id.is_empty()
        || id == "."
        || id == ".."
        || id.contains(['/', '\\', '\0'])
        || id.starts_with('.');
    if invalid {
        return Err(PersistenceError::InvalidKey(id.to_owned()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn memory_storage_counts_writes() {
        let storage = MemoryStorage::new();
        assert!(storage.get_module_state("ecu").unwrap().is_empty());
        storage.set_module_state("ecu", b"abc").unwrap();
        assert_eq!(storage.get_module_state("ecu").unwrap(), b"abc");
        assert_eq!(storage.write_count(), 1);

        storage.fail_writes(true);
        assert!(matches!(
            storage.set_module_state("ecu", b"def"),
            Err(PersistenceError::Backend(_))
        ));
        assert_eq!(storage.get("ecu").unwrap(), b"abc");
        assert_eq!(storage.write_count(), 1);
    }

    #[test]
    fn file_storage_missing_state_is_empty() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("state"));
        assert!(storage.get_module_state("ecu").unwrap().is_empty());
    }

    #[test]
    fn file_storage_replaces_contents() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("state"));
        storage.set_module_state("ecu", b"first").unwrap();
        storage.set_module_state("ecu", b"second").unwrap();
        assert_eq!(storage.get_module_state("ecu").unwrap(), b"second");

        let leftovers: Vec<_> = fs::read_dir(storage.root())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn unsafe_keys_are_rejected() {
        let storage = FileStorage::new("unused");
        for id in ["", "..", "a/b", ".hidden", "a\\b"] {
            assert!(
                matches!(storage.path_for(id), Err(PersistenceError::InvalidKey(_))),
                "{id:?} should be rejected"
            );
        }
        assert!(storage.path_for("renesas-ecu_1").is_ok());
    }
}
