// Storage module - PERSISTENCE
// Durable transmitter registry using sled

mod store;

pub use store::{RegistryStore, StorageStats, StoreError};
