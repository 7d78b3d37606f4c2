// Sink module - WHERE SAMPLES GO
// Time-series output per log channel plus the channel labels file

mod file;
mod record;

pub use file::{edit_sink, resolve_data_dir, FileSink};
pub use record::{MemorySink, SampleRecord, SampleSink, SinkError};
