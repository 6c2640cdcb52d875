//! Synchronous key-value tiers used as local fallbacks.
//!
//! `FileStore` is the durable tier: one file per key in the data directory.
//! `MemoryStore` is the ephemeral, session-scoped tier; it can be given a byte
//! quota so hosts (and tests) can model storage exhaustion.
//!
//! Storage layout:
//! ```text
//! ~/.local/share/dashsync/
//! ├── dashboard_layout_<user>.json
//! ├── dashboard_layout_offline_queue.json
//! └── layout_versions_<user>.json
//! ```

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use thiserror::Error;

/// File extension for stored values.
const VALUE_EXTENSION: &str = "json";

/// Errors that can occur in a storage tier.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error for {}: {1}", .0.display())]
    IoError(PathBuf, #[source] io::Error),

    #[error("Storage quota exceeded writing '{key}': {size} bytes over a {quota} byte quota")]
    QuotaExceeded { key: String, size: usize, quota: usize },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Payload codec error: {0}")]
    Codec(String),
}

/// A synchronous string key-value store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Returns `Ok(true)` if a value was removed.
    fn remove(&self, key: &str) -> Result<bool, StorageError>;
}

/// Durable store keeping each key in its own file.
#[derive(Clone, Debug)]
pub struct FileStore {
    data_dir: PathBuf,
}

impl FileStore {
    /// Creates a new store rooted at a custom data directory.
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    /// Returns the full path for a key.
    ///
    /// Characters outside `[A-Za-z0-9_.-]` are hex-escaped so arbitrary user
    /// ids map to distinct, portable filenames.
    pub fn path(&self, key: &str) -> PathBuf {
        let mut name = String::with_capacity(key.len());
        for b in key.bytes() {
            if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.' {
                name.push(b as char);
            } else {
                name.push_str(&format!("%{:02X}", b));
            }
        }
        self.data_dir.join(format!("{}.{}", name, VALUE_EXTENSION))
    }

    /// Checks if a key exists on disk.
    pub fn exists(&self, key: &str) -> bool {
        self.path(key).exists()
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path(key);

        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::IoError(path, e)),
        }
    }

    /// Creates the data directory if it doesn't exist.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        fs::create_dir_all(&self.data_dir)
            .map_err(|e| StorageError::IoError(self.data_dir.clone(), e))?;

        let path = self.path(key);
        fs::write(&path, value).map_err(|e| StorageError::IoError(path, e))?;

        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path(key);

        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::IoError(path, e)),
        }
    }
}

/// Ephemeral in-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
    quota: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that rejects writes once the total stored bytes would exceed `quota`.
    pub fn with_quota(quota: usize) -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
            quota: Some(quota),
        }
    }

    pub fn len(&self) -> usize {
        self.values.lock().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(quota) = self.quota {
            let used: usize = values
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let size = used + key.len() + value.len();
            if size > quota {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    size,
                    quota,
                });
            }
        }

        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        Ok(values.remove(key).is_some())
    }
}

/// Wraps and unwraps payloads before they reach a local tier, e.g. to
/// encrypt at rest. Key management belongs to the implementor.
pub trait PayloadCodec: Send + Sync {
    fn encode(&self, plaintext: &str) -> Result<String, StorageError>;

    fn decode(&self, stored: &str) -> Result<String, StorageError>;
}

/// Stores payloads as-is.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainCodec;

impl PayloadCodec for PlainCodec {
    fn encode(&self, plaintext: &str) -> Result<String, StorageError> {
        Ok(plaintext.to_string())
    }

    fn decode(&self, stored: &str) -> Result<String, StorageError> {
        Ok(stored.to_string())
    }
}
