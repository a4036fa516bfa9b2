//! Key-value persistence seam.
//!
//! Every store in this crate persists through a flat string-keyed area where each key holds one
//! JSON document, mirroring browser local storage. Operations are full read-modify-write cycles
//! of a single key; there is no locking across processes and the last writer wins.
//!
//! Two backends are provided:
//!
//! - [`MemoryStore`]: a mutex-guarded map, used by tests and short-lived sessions
//! - [`FileStore`]: one `<key>.json` file per key under a data directory
//!
//! ## Storage Layout
//!
//! ```text
//! <data_dir>/
//!   users.json
//!   currentUser.json
//!   medicalRecords.json
//!   appointments.json
//! ```

use crate::{PortalError, PortalResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Get/set/remove access to a flat key-value area.
pub trait KeyValueStore: Send + Sync {
    /// Returns the raw value for `key`, or `None` when nothing is stored.
    fn get(&self, key: &str) -> PortalResult<Option<String>>;

    /// Replaces the value for `key`.
    fn set(&self, key: &str, value: &str) -> PortalResult<()>;

    /// Removes `key`. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> PortalResult<()>;
}

/// In-process key-value area.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> PortalResult<Option<String>> {
        let entries = self.entries.lock().map_err(|_| PortalError::StoragePoisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> PortalResult<()> {
        let mut entries = self.entries.lock().map_err(|_| PortalError::StoragePoisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> PortalResult<()> {
        let mut entries = self.entries.lock().map_err(|_| PortalError::StoragePoisoned)?;
        entries.remove(key);
        Ok(())
    }
}

/// Directory-backed key-value area.
///
/// Writes go to a sibling temporary file which is then renamed over the target, so a crash
/// mid-write leaves the previous document intact.
#[derive(Debug, Clone)]
pub struct FileStore {
    data_dir: PathBuf,
}

impl FileStore {
    /// Opens (creating if needed) a key-value directory.
    ///
    /// # Errors
    ///
    /// Returns `PortalError::StorageDirCreation` if the directory cannot be created.
    pub fn open(data_dir: &Path) -> PortalResult<Self> {
        fs::create_dir_all(data_dir).map_err(PortalError::StorageDirCreation)?;
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn key_path(&self, key: &str) -> PortalResult<PathBuf> {
        let valid = !key.is_empty()
            && key
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' | b'_' | b'-'));
        if !valid {
            return Err(PortalError::InvalidKey(key.to_string()));
        }
        Ok(self.data_dir.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> PortalResult<Option<String>> {
        let path = self.key_path(key)?;
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PortalError::StorageRead {
                key: key.to_string(),
                source: e,
            }),
        }
    }

    fn set(&self, key: &str, value: &str) -> PortalResult<()> {
        let path = self.key_path(key)?;
        let tmp = path.with_extension("json.tmp");
        let write_err = |source| PortalError::StorageWrite {
            key: key.to_string(),
            source,
        };

        fs::write(&tmp, value).map_err(write_err)?;
        fs::rename(&tmp, &path).map_err(write_err)
    }

    fn remove(&self, key: &str) -> PortalResult<()> {
        let path = self.key_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PortalError::StorageWrite {
                key: key.to_string(),
                source: e,
            }),
        }
    }
}

/// Reads a JSON array stored under `key`; an absent key yields an empty collection.
///
/// # Errors
///
/// A present but unparseable document is a storage fault and returns
/// `PortalError::Deserialization`.
pub fn read_collection<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> PortalResult<Vec<T>> {
    match store.get(key)? {
        Some(raw) => serde_json::from_str(&raw).map_err(|source| PortalError::Deserialization {
            key: key.to_string(),
            source,
        }),
        None => Ok(Vec::new()),
    }
}

/// Serialises `items` and replaces the document stored under `key`.
pub fn write_collection<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    items: &[T],
) -> PortalResult<()> {
    let raw = serde_json::to_string(items).map_err(|source| PortalError::Serialization {
        key: key.to_string(),
        source,
    })?;
    store.set(key, &raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store_get_set_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get("users").unwrap(), None);

        store.set("users", "[]").unwrap();
        assert_eq!(store.get("users").unwrap().as_deref(), Some("[]"));

        store.remove("users").unwrap();
        assert_eq!(store.get("users").unwrap(), None);
        // Removing twice is fine
        store.remove("users").unwrap();
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("portal_data");

        let first = FileStore::open(&dir).unwrap();
        first.set("appointments", "[1,2]").unwrap();
        drop(first);

        let second = FileStore::open(&dir).unwrap();
        assert_eq!(second.get("appointments").unwrap().as_deref(), Some("[1,2]"));
        assert!(dir.join("appointments.json").is_file());
        assert!(!dir.join("appointments.json.tmp").exists());
    }

    #[test]
    fn test_file_store_missing_key_is_none() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::open(temp.path()).unwrap();

        assert_eq!(store.get("currentUser").unwrap(), None);
        store.remove("currentUser").unwrap();
    }

    #[test]
    fn test_file_store_rejects_path_like_keys() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::open(temp.path()).unwrap();

        assert!(matches!(
            store.set("../escape", "x"),
            Err(PortalError::InvalidKey(_))
        ));
        assert!(matches!(store.get(""), Err(PortalError::InvalidKey(_))));
    }

    #[test]
    fn test_read_collection_absent_is_empty() {
        let store = MemoryStore::new();
        let items: Vec<u32> = read_collection(&store, "medicalRecords").unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn test_read_collection_corrupt_is_error() {
        let store = MemoryStore::new();
        store.set("medicalRecords", "{not json").unwrap();

        let result: PortalResult<Vec<u32>> = read_collection(&store, "medicalRecords");
        assert!(matches!(
            result,
            Err(PortalError::Deserialization { ref key, .. }) if key == "medicalRecords"
        ));
    }

    #[test]
    fn test_write_then_read_collection() {
        let store = MemoryStore::new();
        write_collection(&store, "appointments", &[3u32, 1, 2]).unwrap();

        let items: Vec<u32> = read_collection(&store, "appointments").unwrap();
        assert_eq!(items, vec![3, 1, 2]);
    }
}
