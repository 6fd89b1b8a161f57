//! Merged output sinks

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use contracts::{ContractError, MergedRecord, MergedSink};
use parking_lot::Mutex;
use tracing::{debug, instrument};

/// Writes `channel;timestamp` lines to one file
pub struct MergedFileSink {
    name: String,
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    written: u64,
}

impl MergedFileSink {
    /// Create the file (and its parent directories), truncating any previous content
    pub fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&path)?;
        Ok(Self {
            name: format!("merged:{}", path.display()),
            path,
            writer: Some(BufWriter::new(file)),
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>, ContractError> {
        self.writer.as_mut().ok_or_else(|| {
            ContractError::acquisition(format!("sink {} is already closed", self.name))
        })
    }
}

impl MergedSink for MergedFileSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&mut self, records: &[MergedRecord]) -> Result<(), ContractError> {
        let writer = self.writer()?;
        for record in records {
            writeln!(writer, "{};{}", record.channel, record.timestamp)?;
        }
        self.written += records.len() as u64;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        self.writer()?.flush()?;
        Ok(())
    }

    #[instrument(name = "merged_file_sink_close", skip(self), fields(sink = %self.name))]
    async fn close(&mut self) -> Result<(), ContractError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        debug!(sink = %self.name, written = self.written, "merged file closed");
        Ok(())
    }
}

/// Keeps merged records in memory, shared with the caller
#[derive(Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<MergedRecord>>>,
    writes: Arc<Mutex<Vec<usize>>>,
    closed: Arc<Mutex<bool>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<MergedRecord> {
        self.records.lock().clone()
    }

    /// Record count of every `write` call
    pub fn writes(&self) -> Vec<usize> {
        self.writes.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }
}

impl MergedSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn write(&mut self, records: &[MergedRecord]) -> Result<(), ContractError> {
        self.records.lock().extend_from_slice(records);
        self.writes.lock().push(records.len());
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        *self.closed.lock() = true;
        Ok(())
    }
}
