// Event model - Typed readings produced from bridge event lines

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// TRANSMITTER KIND
// ============================================================================

/// The two kinds of radio unit the bridge knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransmitterKind {
    /// Passive sender with up to three sensors
    Tx,
    /// Switchable unit with one sensor and an on/off relay
    Trx,
}

impl TransmitterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tx => "TX",
            Self::Trx => "TRX",
        }
    }
}

impl fmt::Display for TransmitterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransmitterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tx" => Ok(Self::Tx),
            "trx" => Ok(Self::Trx),
            other => Err(format!("unknown transmitter type '{}'", other)),
        }
    }
}

// ============================================================================
// POWER STATE
// ============================================================================

/// Relay state of a switchable unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PowerState {
    Off,
    On,
}

impl PowerState {
    pub fn from_flag(flag: u64) -> Self {
        if flag == 0 {
            Self::Off
        } else {
            Self::On
        }
    }

    /// 0 or 1, as written to data files and switch commands
    pub fn as_flag(&self) -> u8 {
        match self {
            Self::Off => 0,
            Self::On => 1,
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => f.write_str("off"),
            Self::On => f.write_str("on"),
        }
    }
}

impl FromStr for PowerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" | "1" => Ok(Self::On),
            "off" | "0" => Ok(Self::Off),
            other => Err(format!("'{}' is not on/off", other)),
        }
    }
}

// ============================================================================
// READING
// ============================================================================

/// What a reading represents; the classifications are mutually exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingKind {
    Sample,
    PairingRequest,
    PairingAck,
}

/// One decoded event, stamped with wall-clock time
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub source_id: u32,
    pub source_kind: TransmitterKind,
    /// Unix seconds
    pub timecode: i64,
    /// Sensor port to watts
    pub sensor_values: BTreeMap<u8, u32>,
    pub reported_state: Option<PowerState>,
    /// `Some(false)` marks an unsolicited push, `Some(true)` an answer to a
    /// status poll; older firmware omits the field
    pub reply_to_poll: Option<bool>,
    pub kind: ReadingKind,
}

impl Reading {
    /// Create a sample reading with no sensor values
    pub fn sample(source_id: u32, source_kind: TransmitterKind, timecode: i64) -> Self {
        Self {
            source_id,
            source_kind,
            timecode,
            sensor_values: BTreeMap::new(),
            reported_state: None,
            reply_to_poll: None,
            kind: ReadingKind::Sample,
        }
    }

    pub fn with_sensor(mut self, port: u8, watts: u32) -> Self {
        self.sensor_values.insert(port, watts);
        self
    }

    pub fn with_state(mut self, state: PowerState) -> Self {
        self.reported_state = Some(state);
        self
    }

    pub fn with_reply_to_poll(mut self, reply: bool) -> Self {
        self.reply_to_poll = Some(reply);
        self
    }

    pub fn with_kind(mut self, kind: ReadingKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn is_sample(&self) -> bool {
        self.kind == ReadingKind::Sample
    }

    pub fn is_pairing_request(&self) -> bool {
        self.kind == ReadingKind::PairingRequest
    }

    pub fn is_pairing_ack(&self) -> bool {
        self.kind == ReadingKind::PairingAck
    }
}
