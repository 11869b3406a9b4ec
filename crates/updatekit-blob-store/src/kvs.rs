//! Key-value store used for the blob metadata side channel.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use updatekit_errors::{Result, UpdateError};

/// Small-record persistent storage keyed by string.
pub trait KeyValueStore: Send {
    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Backend-specific write failures.
    fn put(&mut self, key: &str, value: &[u8]) -> Result<()>;

    /// Fetch the value stored under `key`.
    ///
    /// # Errors
    ///
    /// `NotFound` when the key is absent.
    fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Remove `key`.
    ///
    /// # Errors
    ///
    /// `NotFound` when the key is absent.
    fn delete(&mut self, key: &str) -> Result<()>;
}

/// Volatile key-value store with put-failure injection.
#[derive(Debug, Clone, Default)]
pub struct InMemoryKeyValueStore {
    entries: BTreeMap<String, Vec<u8>>,
    fail_puts: bool,
}

impl InMemoryKeyValueStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `put` fail with `DataLoss`.
    pub fn inject_put_failure(&mut self, fail: bool) {
        self.fail_puts = fail;
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn put(&mut self, key: &str, value: &[u8]) -> Result<()> {
        if self.fail_puts {
            return Err(UpdateError::data_loss("injected key-value put failure"));
        }
        self.entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.entries
            .get(key)
            .cloned()
            .ok_or_else(|| UpdateError::not_found(format!("key '{key}'")))
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        self.entries
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| UpdateError::not_found(format!("key '{key}'")))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredEntries {
    entries: BTreeMap<String, String>,
}

/// Key-value store persisted as a JSON file with base64 values.
///
/// Every mutation rewrites the file through a temporary file and a rename,
/// so a crash leaves either the old or the new contents.
#[derive(Debug)]
pub struct FileKeyValueStore {
    path: PathBuf,
    entries: BTreeMap<String, Vec<u8>>,
}

impl FileKeyValueStore {
    /// Open the store at `path`, loading it if the file exists.
    ///
    /// # Errors
    ///
    /// I/O errors reading the file, `DataLoss` if it cannot be parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut store = Self {
            path,
            entries: BTreeMap::new(),
        };
        if store.path.exists() {
            store.load()?;
        }
        Ok(store)
    }

    /// Backing file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&mut self) -> Result<()> {
        let content = fs::read_to_string(&self.path)?;
        let stored: StoredEntries = serde_json::from_str(&content).map_err(|e| {
            UpdateError::data_loss(format!("failed to parse {}: {e}", self.path.display()))
        })?;
        self.entries.clear();
        for (key, encoded) in stored.entries {
            match BASE64.decode(encoded.as_bytes()) {
                Ok(value) => {
                    self.entries.insert(key, value);
                }
                Err(e) => warn!(key = %key, error = %e, "dropping undecodable key-value entry"),
            }
        }
        debug!(path = %self.path.display(), entries = self.entries.len(), "loaded key-value store");
        Ok(())
    }

    fn save(&self) -> Result<()> {
        let stored = StoredEntries {
            entries: self
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), BASE64.encode(v)))
                .collect(),
        };
        let content = serde_json::to_string_pretty(&stored)
            .map_err(|e| UpdateError::internal(format!("failed to encode key-value store: {e}")))?;

        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, content)?;
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn put(&mut self, key: &str, value: &[u8]) -> Result<()> {
        let previous = self.entries.insert(key.to_string(), value.to_vec());
        if let Err(e) = self.save() {
            match previous {
                Some(old) => self.entries.insert(key.to_string(), old),
                None => self.entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.entries
            .get(key)
            .cloned()
            .ok_or_else(|| UpdateError::not_found(format!("key '{key}'")))
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        let Some(old) = self.entries.remove(key) else {
            return Err(UpdateError::not_found(format!("key '{key}'")));
        };
        if let Err(e) = self.save() {
            self.entries.insert(key.to_string(), old);
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use updatekit_errors::ErrorKind;

    #[test]
    fn test_in_memory_not_found() {
        let mut kvs = InMemoryKeyValueStore::new();
        assert_eq!(kvs.get("x").err().map(|e| e.kind()), Some(ErrorKind::NotFound));
        assert_eq!(kvs.delete("x").err().map(|e| e.kind()), Some(ErrorKind::NotFound));
    }

    #[test]
    fn test_file_store_persists() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("kvs.json");
        {
            let mut kvs = FileKeyValueStore::open(&path)?;
            kvs.put("blob", &[0, 1, 2, 255])?;
            kvs.put("gone", b"x")?;
            kvs.delete("gone")?;
        }
        let kvs = FileKeyValueStore::open(&path)?;
        assert_eq!(kvs.get("blob")?, vec![0, 1, 2, 255]);
        assert!(kvs.get("gone").is_err());
        assert!(!path.with_extension("tmp").exists());
        Ok(())
    }

    #[test]
    fn test_file_store_rejects_garbage() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("kvs.json");
        fs::write(&path, "not json")?;
        let err = FileKeyValueStore::open(&path).err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::DataLoss));
        Ok(())
    }
}
