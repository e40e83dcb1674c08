//! Key/value state shared by the host and the extension.
//!
//! [`FileStore`] keeps a flat JSON object in the shared container. Every
//! write rewrites the whole document to a temporary file and renames it
//! into place, so a reader never sees a half-written file.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::BridgeError;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, BridgeError>;
    fn set(&self, key: &str, value: &str) -> Result<(), BridgeError>;
    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), BridgeError>;
}

// ── FileStore ────────────────────────────────────────────────────

type Document = BTreeMap<String, String>;

pub struct FileStore {
    path: PathBuf,
    // Serializes read-modify-write within this process.
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Document, BridgeError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Document::new()),
            Err(e) => return Err(BridgeError::Store(format!("{}: {e}", self.path.display()))),
        };
        if text.trim().is_empty() {
            return Ok(Document::new());
        }
        match serde_json::from_str(&text) {
            Ok(document) => Ok(document),
            Err(e) => {
                warn!(path = %self.path.display(), "discarding unreadable store: {e}");
                Ok(Document::new())
            }
        }
    }

    fn save(&self, document: &Document) -> Result<(), BridgeError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(format!(".{}.tmp", std::process::id()));
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, serde_json::to_vec_pretty(document)?)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), keys = document.len(), "store saved");
        Ok(())
    }

    fn update(&self, f: impl FnOnce(&mut Document) -> bool) -> Result<(), BridgeError> {
        let _guard = self.write_lock.lock();
        let mut document = self.load()?;
        if f(&mut document) {
            self.save(&document)?;
        }
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, BridgeError> {
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), BridgeError> {
        self.update(|document| {
            document.insert(key.to_string(), value.to_string());
            true
        })
    }

    fn remove(&self, key: &str) -> Result<(), BridgeError> {
        self.update(|document| document.remove(key).is_some())
    }
}

// ── MemoryStore ──────────────────────────────────────────────────

/// In-process store for tests and single-process setups.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, BridgeError> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), BridgeError> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), BridgeError> {
        self.values.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("store.json"));

        assert_eq!(store.get("a").unwrap(), None);
        store.set("a", "1").unwrap();
        store.set("b", "2").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));

        store.remove("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
        assert_eq!(store.get("b").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn file_store_is_shared_between_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let writer = FileStore::new(&path);
        let reader = FileStore::new(&path);

        writer.set("broadcastFps", "30").unwrap();
        assert_eq!(reader.get("broadcastFps").unwrap().as_deref(), Some("30"));
    }

    #[test]
    fn file_store_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("store.json"));
        store.set("k", "v").unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("store.json")]);
    }

    #[test]
    fn corrupt_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = FileStore::new(&path);
        assert_eq!(store.get("k").unwrap(), None);
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn remove_missing_key_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("store.json"));
        store.remove("nothing").unwrap();
        assert!(!store.path().exists());
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }
}
