//! The line-delimited JSON query log: one shared, mutex-guarded sink.

use std::fs::File;
use std::io::{BufWriter, Write as _};
use std::path::Path;
use std::sync::Mutex;

use crate::error::Result;
use crate::query::QueryRecord;

const WRITER_BUFFER_CAPACITY: usize = 256 * 1024;

/// Appends `QueryRecord`s to `Queries_<start_timestamp>.json`, one JSON
/// object per line, flushed after every write.
pub struct RecordWriter {
    sink: Mutex<BufWriter<File>>,
}

impl RecordWriter {
    /// Creates the log file under `dir`, named from `start_timestamp`
    /// (`YYYY-MM-DDTHH:MM:SS`).
    pub fn create(dir: &Path, start_timestamp: &str) -> Result<Self> {
        let path = dir.join(format!("Queries_{start_timestamp}.json"));
        let file = File::create(&path)?;
        Ok(Self {
            sink: Mutex::new(BufWriter::with_capacity(WRITER_BUFFER_CAPACITY, file)),
        })
    }

    /// Serializes `record` and appends it, flushing immediately so a crash
    /// loses at most one in-flight record.
    pub fn write(&self, record: &QueryRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut sink = self
            .sink
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        sink.write_all(&line)?;
        sink.flush()?;
        Ok(())
    }
}
