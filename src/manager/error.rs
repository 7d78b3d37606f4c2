// Manager errors

use crate::protocol::ProtocolError;
use crate::registry::RegistryError;
use crate::sink::SinkError;
use crate::storage::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("Bridge error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Pairing with {id} failed: {reason}")]
    PairingFailed { id: u32, reason: String },

    #[error("Could not reopen the bridge connection after {attempts} attempts: {reason}")]
    ReopenFailed { attempts: u32, reason: String },
}
