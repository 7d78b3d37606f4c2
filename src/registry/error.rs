// Registry errors

use crate::event::TransmitterKind;
use crate::sink::SinkError;
use thiserror::Error;

/// Errors from registry operations
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Transmitter {0} is not registered")]
    UnknownTransmitter(u32),

    #[error("Transmitter {0} is already registered")]
    DuplicateTransmitter(u32),

    #[error("{kind} {id} has no sensor on port {port}")]
    UnknownSensorPort { id: u32, kind: TransmitterKind, port: u8 },

    #[error("{kind} units have no sensor port {port}")]
    InvalidSensorPort { kind: TransmitterKind, port: u8 },

    #[error("Log channel {channel} is already used by transmitter {owner}")]
    LogChannelInUse { channel: u32, owner: u32 },

    #[error("Transmitter {0} is not switchable")]
    NotSwitchable(u32),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),
}
