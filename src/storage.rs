use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use crate::errors::{InsureResult, SafeReadLock, SafeWriteLock};

/// Keyed blob storage, the server-side stand-in for browser local storage.
pub trait BlobStore: Send + Sync {
    fn get(&self, key: &str) -> InsureResult<Option<Vec<u8>>>;

    fn put(&self, key: &str, value: &[u8]) -> InsureResult<()>;

    fn remove(&self, key: &str) -> InsureResult<()>;
}

/// A sled-backed blob store. Every write is flushed before returning.
pub struct SledBlobStore {
    tree: sled::Tree,
}

impl SledBlobStore {
    pub fn open<P: AsRef<Path>>(path: P) -> InsureResult<Self> {
        let db = sled::open(path.as_ref())?;
        let tree = db.open_tree("local_storage")?;
        tracing::debug!(path = %path.as_ref().display(), "opened blob store");
        Ok(SledBlobStore { tree })
    }
}

impl BlobStore for SledBlobStore {
    fn get(&self, key: &str) -> InsureResult<Option<Vec<u8>>> {
        Ok(self.tree.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    fn put(&self, key: &str, value: &[u8]) -> InsureResult<()> {
        self.tree.insert(key.as_bytes(), value)?;
        self.tree.flush()?;
        Ok(())
    }

    fn remove(&self, key: &str) -> InsureResult<()> {
        self.tree.remove(key.as_bytes())?;
        self.tree.flush()?;
        Ok(())
    }
}

/// In-process store used for ephemeral servers and tests.
#[derive(Default)]
pub struct MemoryBlobStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, key: &str) -> InsureResult<Option<Vec<u8>>> {
        Ok(self.entries.safe_read("memory_store")?.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> InsureResult<()> {
        self.entries
            .safe_write("memory_store")?
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> InsureResult<()> {
        self.entries.safe_write("memory_store")?.remove(key);
        Ok(())
    }
}
