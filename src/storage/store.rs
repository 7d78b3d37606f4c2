// RegistryStore - Persistent transmitter registry using sled
//
// One key per transmitter ("tx:" + big-endian id), postcard-encoded.
// The whole registry is rewritten after every mutation.

use crate::registry::{Registry, Transmitter};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Key prefixes for organizing data
mod keys {
    pub const TRANSMITTER_PREFIX: &[u8] = b"tx:";

    pub fn transmitter(id: u32) -> Vec<u8> {
        [TRANSMITTER_PREFIX, &id.to_be_bytes()].concat()
    }
}

/// Errors from storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open database: {0}")]
    OpenFailed(String),

    #[error("Database operation failed: {0}")]
    DatabaseError(String),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("Flush failed: {0}")]
    FlushFailed(String),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::DatabaseError(err.to_string())
    }
}

/// Statistics about the storage
#[derive(Clone, Debug)]
pub struct StorageStats {
    /// Number of stored transmitters
    pub transmitter_count: usize,
    /// Approximate disk size in bytes
    pub disk_size_bytes: u64,
}

/// Durable home of the transmitter registry
pub struct RegistryStore {
    db: sled::Db,
}

impl RegistryStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::OpenFailed(e.to_string()))?;
        Ok(Self { db })
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.db.scan_prefix(keys::TRANSMITTER_PREFIX).next().is_none())
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map_err(|e| StoreError::FlushFailed(e.to_string()))?;
        Ok(())
    }

    pub fn stats(&self) -> Result<StorageStats, StoreError> {
        Ok(StorageStats {
            transmitter_count: self.db.scan_prefix(keys::TRANSMITTER_PREFIX).count(),
            disk_size_bytes: self.db.size_on_disk().unwrap_or(0),
        })
    }

    // ========================================================================
    // TRANSMITTERS
    // ========================================================================

    /// Save one transmitter, replacing any previous record for its id
    pub fn save_transmitter(&self, transmitter: &Transmitter) -> Result<(), StoreError> {
        let bytes = postcard::to_allocvec(transmitter)
            .map_err(|e| StoreError::SerializationFailed(e.to_string()))?;
        self.db.insert(keys::transmitter(transmitter.id()), bytes)?;
        Ok(())
    }

    pub fn load_transmitter(&self, id: u32) -> Result<Option<Transmitter>, StoreError> {
        match self.db.get(keys::transmitter(id))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn delete_transmitter(&self, id: u32) -> Result<(), StoreError> {
        self.db.remove(keys::transmitter(id))?;
        Ok(())
    }

    // ========================================================================
    // WHOLE REGISTRY
    // ========================================================================

    /// Replace the stored registry with `registry` and flush
    pub fn save_registry(&self, registry: &Registry) -> Result<(), StoreError> {
        let mut batch = sled::Batch::default();
        for result in self.db.scan_prefix(keys::TRANSMITTER_PREFIX) {
            let (key, _) = result?;
            batch.remove(key);
        }
        for transmitter in registry.iter() {
            let bytes = postcard::to_allocvec(transmitter)
                .map_err(|e| StoreError::SerializationFailed(e.to_string()))?;
            batch.insert(keys::transmitter(transmitter.id()), bytes);
        }
        self.db.apply_batch(batch)?;
        self.flush()?;
        debug!(transmitters = registry.len(), "Saved registry");
        Ok(())
    }

    /// Load every stored transmitter
    pub fn load_registry(&self) -> Result<Registry, StoreError> {
        let mut transmitters = Vec::new();
        for result in self.db.scan_prefix(keys::TRANSMITTER_PREFIX) {
            let (_, bytes) = result?;
            transmitters.push(decode(&bytes)?);
        }
        debug!(transmitters = transmitters.len(), "Loaded registry");
        Ok(transmitters.into_iter().collect())
    }
}

fn decode(bytes: &[u8]) -> Result<Transmitter, StoreError> {
    postcard::from_bytes(bytes).map_err(|e| StoreError::DeserializationFailed(e.to_string()))
}
