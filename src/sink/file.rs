// File Sink - One append-only text file per log channel
//
// <dir>/channel_<N>.dat   lines of "<unix_time> <watts> [<0|1>]"
// <dir>/labels.dat        lines of "<N> <name>"

use crate::sink::{SampleRecord, SampleSink, SinkError};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const LABELS_FILE: &str = "labels.dat";

/// Writes samples under a data directory
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    /// Use `dir`, creating it if needed
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, SinkError> {
        let dir = dir.as_ref().to_path_buf();
        ensure_dir(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file for `channel`
    pub fn channel_path(&self, channel: u32) -> PathBuf {
        self.dir.join(format!("channel_{}.dat", channel))
    }

    pub fn labels_path(&self) -> PathBuf {
        self.dir.join(LABELS_FILE)
    }
}

impl SampleSink for FileSink {
    fn record(&mut self, channel: u32, record: &SampleRecord) -> Result<(), SinkError> {
        let path = self.channel_path(channel);
        let write = || -> std::io::Result<()> {
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            writeln!(file, "{}", record)
        };
        write().map_err(|e| SinkError::WriteFailed {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        debug!(channel, record = %record, "Recorded sample");
        Ok(())
    }

    fn write_labels(&mut self, labels: &[(u32, String)]) -> Result<(), SinkError> {
        let path = self.labels_path();
        let write = || -> std::io::Result<()> {
            let mut file = File::create(&path)?;
            for (channel, name) in labels {
                writeln!(file, "{} {}", channel, name)?;
            }
            Ok(())
        };
        write().map_err(|e| SinkError::WriteFailed {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        debug!(count = labels.len(), "Wrote labels file");
        Ok(())
    }
}

fn ensure_dir(dir: &Path) -> Result<(), SinkError> {
    if dir.is_dir() {
        return Ok(());
    }
    if dir.exists() {
        return Err(SinkError::NotADirectory(dir.to_path_buf()));
    }
    info!(dir = %dir.display(), "Creating data directory");
    fs::create_dir_all(dir)?;
    Ok(())
}

/// Pick the directory this run writes to.
///
/// An explicit directory wins. Otherwise a new numbered subdirectory
/// (`000`, `001`, ...) is created under `base`, one past the highest
/// numeric subdirectory already there.
pub fn resolve_data_dir(explicit: Option<&Path>, base: Option<&Path>) -> Result<PathBuf, SinkError> {
    if let Some(dir) = explicit {
        ensure_dir(dir)?;
        return Ok(dir.to_path_buf());
    }

    let base = base.ok_or(SinkError::NoDataDirectory)?;
    let mut next = 0u32;
    if base.is_dir() {
        for entry in fs::read_dir(base)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(n) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) {
                next = next.max(n + 1);
            }
        }
    }

    let dir = base.join(format!("{:03}", next));
    ensure_dir(&dir)?;
    Ok(dir)
}

/// Sink for an editing session: the explicit directory's files when one
/// is named, nothing otherwise. Never creates a numbered directory.
pub fn edit_sink(explicit: Option<&Path>) -> Result<Option<FileSink>, SinkError> {
    explicit.map(FileSink::new).transpose()
}
