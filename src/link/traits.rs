// Link Traits and Core Types
// Defines the abstract line-oriented Link trait and the types shared by its implementations

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// LINK CONFIG
// ============================================================================

/// Configuration for the connection to the bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Serial device path
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Default per-line read timeout in milliseconds
    pub line_timeout_ms: u64,
    /// Maximum length of a single line before it is discarded
    pub max_line_len: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            line_timeout_ms: 1_000,
            max_line_len: 1_024,
        }
    }
}

impl LinkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_port(mut self, port: &str) -> Self {
        self.port = port.to_string();
        self
    }

    pub fn with_baud_rate(mut self, baud: u32) -> Self {
        self.baud_rate = baud;
        self
    }

    pub fn with_line_timeout_ms(mut self, ms: u64) -> Self {
        self.line_timeout_ms = ms;
        self
    }

    pub fn with_max_line_len(mut self, len: usize) -> Self {
        self.max_line_len = len;
        self
    }

    /// Default per-line timeout as a Duration
    pub fn line_timeout(&self) -> Duration {
        Duration::from_millis(self.line_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), LinkError> {
        if self.port.is_empty() {
            return Err(LinkError::InvalidConfig("port cannot be empty".to_string()));
        }
        if self.baud_rate == 0 {
            return Err(LinkError::InvalidConfig("baud_rate cannot be 0".to_string()));
        }
        if self.line_timeout_ms == 0 {
            return Err(LinkError::InvalidConfig("line_timeout_ms cannot be 0".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// LINK STATE
// ============================================================================

/// State of the underlying connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LinkState {
    #[default]
    Closed,
    Open,
    /// The device went away underneath us
    Disconnected,
}

impl LinkState {
    /// Check if transition to another state is valid
    pub fn can_transition_to(&self, target: LinkState) -> bool {
        matches!(
            (self, target),
            (Self::Closed, Self::Open)
                | (Self::Open, Self::Closed)
                | (Self::Open, Self::Disconnected)
                | (Self::Disconnected, Self::Closed)
                | (Self::Disconnected, Self::Open)
        )
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

// ============================================================================
// LINK ERRORS
// ============================================================================

/// Errors that can occur on the link
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("Failed to open {port}: {reason}")]
    OpenFailed { port: String, reason: String },

    #[error("Link is not open")]
    NotOpen,

    #[error("Device disconnected: {0}")]
    Disconnected(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl LinkError {
    /// Check if the error means the connection must be reopened
    pub fn needs_reopen(&self) -> bool {
        matches!(self, Self::NotOpen | Self::Disconnected(_) | Self::WriteFailed(_))
    }
}

impl From<std::io::Error> for LinkError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

// ============================================================================
// LINK STATISTICS
// ============================================================================

/// Counters for link traffic
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkStats {
    pub lines_received: u64,
    pub bytes_sent: u64,
    pub read_timeouts: u64,
    pub reopens: u64,
}

// ============================================================================
// LINK TRAIT
// ============================================================================

/// Blocking, line-oriented connection to the bridge
pub trait Link {
    /// Read one line, without its terminator and surrounding whitespace.
    ///
    /// Returns `Ok(None)` when nothing complete arrived within `timeout`.
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, LinkError>;

    /// Write raw bytes
    fn write(&mut self, bytes: &[u8]) -> Result<(), LinkError>;

    /// Drop everything received but not yet read
    fn flush_input(&mut self) -> Result<(), LinkError>;

    /// Close the connection and open it again
    fn reopen(&mut self) -> Result<(), LinkError>;

    /// Close the connection
    fn close(&mut self);

    /// Get the current state
    fn state(&self) -> LinkState;

    /// Get traffic statistics
    fn stats(&self) -> LinkStats;
}

impl<L: Link + ?Sized> Link for Box<L> {
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, LinkError> {
        (**self).read_line(timeout)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        (**self).write(bytes)
    }

    fn flush_input(&mut self) -> Result<(), LinkError> {
        (**self).flush_input()
    }

    fn reopen(&mut self) -> Result<(), LinkError> {
        (**self).reopen()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn state(&self) -> LinkState {
        (**self).state()
    }

    fn stats(&self) -> LinkStats {
        (**self).stats()
    }
}
