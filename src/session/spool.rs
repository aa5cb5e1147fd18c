//! Local batch sink: appends each delivered batch to a JSON-lines file.
//!
//! Used when no remote aggregate is configured, and as the record of what
//! a recording shipped.

use crate::session::buffer::{BatchSink, EventBatch, TransportError};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct SpoolSink {
    path: PathBuf,
}

impl SpoolSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every batch in the spool, in write order.
    pub fn read_batches(&self) -> Result<Vec<EventBatch>, TransportError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(&self.path)?;
        let mut batches = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            batches.push(serde_json::from_str(&line)?);
        }
        Ok(batches)
    }
}

impl BatchSink for SpoolSink {
    fn send_batch(&mut self, batch: &EventBatch) -> Result<(), TransportError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(batch)?;
        line.push('\n');
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

/// A sink that drops everything. For recordings that only need a report.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardSink;

impl BatchSink for DiscardSink {
    fn send_batch(&mut self, _batch: &EventBatch) -> Result<(), TransportError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::types::{CapturedEvent, KeystrokeEvent};
    use uuid::Uuid;

    #[test]
    fn test_spool_appends_batches() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = SpoolSink::new(dir.path().join("spool").join("batches.jsonl"));
        let session_id = Uuid::new_v4();

        for sequence in 1..=2 {
            sink.send_batch(&EventBatch {
                session_id,
                batch_sequence: sequence,
                events: vec![CapturedEvent::Keystroke(KeystrokeEvent::press(
                    65,
                    Some('a'),
                    sequence as f64,
                ))],
            })
            .unwrap();
        }

        let batches = sink.read_batches().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].batch_sequence, 2);
        assert_eq!(batches[0].session_id, session_id);
    }
}
