use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

/// Errors raised by the key-value stores.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("storage serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
}

/// Minimal async key-value contract shared by the library and the
/// watch-progress store.
///
/// Values are JSON so callers own their record shapes; the store only moves
/// documents around.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;

    /// Removes `key`, returning the previous value if one was stored.
    async fn remove(&self, key: &str) -> Result<Option<Value>, StorageError>;
}

/// In-memory store, the default for short-lived sessions and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.entries.write().remove(key))
    }
}

/// Durable store backed by a single JSON document on disk.
///
/// The whole map is cached in memory and rewritten through a temp file plus
/// rename on every mutation. Entries are tiny records, so synchronous writes
/// under the lock are cheaper than coordinating async file I/O.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, Value>>,
}

impl JsonFileStore {
    /// Opens the store at `path`, creating an empty one if the file does not
    /// exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn persist(&self, entries: &HashMap<String, Value>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let mut entries = self.entries.write();
        entries.insert(key.to_string(), value);
        self.persist(&entries)
    }

    async fn remove(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let mut entries = self.entries.write();
        let previous = entries.remove(key);
        if previous.is_some() {
            self.persist(&entries)?;
        }
        Ok(previous)
    }
}
