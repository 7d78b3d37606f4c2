// Sink records and the SampleSink trait

use crate::event::PowerState;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors writing samples or labels
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to write {path}: {reason}")]
    WriteFailed { path: PathBuf, reason: String },

    #[error("'{0}' exists but is not a directory")]
    NotADirectory(PathBuf),

    #[error("No data directory: pass one explicitly or set DATA_DIR")]
    NoDataDirectory,

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for SinkError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// One accepted sample, as appended to a channel file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleRecord {
    pub timecode: i64,
    pub watts: u32,
    /// Present only on the sample where a switchable unit changed state
    pub state: Option<PowerState>,
}

impl fmt::Display for SampleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.timecode, self.watts)?;
        if let Some(state) = self.state {
            write!(f, " {}", state.as_flag())?;
        }
        Ok(())
    }
}

/// Destination for accepted samples and the channel-name mapping
pub trait SampleSink {
    /// Append a record to `channel`
    fn record(&mut self, channel: u32, record: &SampleRecord) -> Result<(), SinkError>;

    /// Replace the channel-number-to-name mapping
    fn write_labels(&mut self, labels: &[(u32, String)]) -> Result<(), SinkError>;
}

/// Sink that keeps everything in memory
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    records: Vec<(u32, SampleRecord)>,
    labels: Vec<(u32, String)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record, in the order received
    pub fn records(&self) -> &[(u32, SampleRecord)] {
        &self.records
    }

    /// Records written to one channel
    pub fn channel(&self, channel: u32) -> Vec<SampleRecord> {
        self.records
            .iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, r)| *r)
            .collect()
    }

    pub fn labels(&self) -> &[(u32, String)] {
        &self.labels
    }
}

impl SampleSink for MemorySink {
    fn record(&mut self, channel: u32, record: &SampleRecord) -> Result<(), SinkError> {
        self.records.push((channel, *record));
        Ok(())
    }

    fn write_labels(&mut self, labels: &[(u32, String)]) -> Result<(), SinkError> {
        self.labels = labels.to_vec();
        Ok(())
    }
}

/// An absent sink discards everything
impl<S: SampleSink> SampleSink for Option<S> {
    fn record(&mut self, channel: u32, record: &SampleRecord) -> Result<(), SinkError> {
        match self {
            Some(sink) => sink.record(channel, record),
            None => Ok(()),
        }
    }

    fn write_labels(&mut self, labels: &[(u32, String)]) -> Result<(), SinkError> {
        match self {
            Some(sink) => sink.write_labels(labels),
            None => Ok(()),
        }
    }
}
