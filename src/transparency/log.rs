//! Transparency log.
//!
//! Counts what the agent captured, dropped and shipped. Nothing here ever
//! holds typed content: only totals.

use crate::collector::filter::SubmitOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One tracked total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    /// Events that passed the capture filter
    Accepted,
    /// Events dropped as duplicates of an accepted event
    Duplicate,
    /// Side-effect events inside an ignore window
    Suppressed,
    /// Malformed, skewed or untrusted events
    Rejected,
    BatchFlushed,
    FlushFailure,
    SessionStarted,
    ReportSigned,
}

impl Counter {
    const ALL: [Counter; 8] = [
        Counter::Accepted,
        Counter::Duplicate,
        Counter::Suppressed,
        Counter::Rejected,
        Counter::BatchFlushed,
        Counter::FlushFailure,
        Counter::SessionStarted,
        Counter::ReportSigned,
    ];

    fn slot(self) -> usize {
        self as usize
    }
}

/// Totals at one point in time. Also the on-disk format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransparencyStats {
    pub events_accepted: u64,
    pub duplicates_dropped: u64,
    pub events_suppressed: u64,
    pub events_rejected: u64,
    pub batches_flushed: u64,
    pub flush_failures: u64,
    pub sessions_started: u64,
    pub reports_signed: u64,
}

impl TransparencyStats {
    fn get(&self, counter: Counter) -> u64 {
        match counter {
            Counter::Accepted => self.events_accepted,
            Counter::Duplicate => self.duplicates_dropped,
            Counter::Suppressed => self.events_suppressed,
            Counter::Rejected => self.events_rejected,
            Counter::BatchFlushed => self.batches_flushed,
            Counter::FlushFailure => self.flush_failures,
            Counter::SessionStarted => self.sessions_started,
            Counter::ReportSigned => self.reports_signed,
        }
    }

    fn set(&mut self, counter: Counter, value: u64) {
        let field = match counter {
            Counter::Accepted => &mut self.events_accepted,
            Counter::Duplicate => &mut self.duplicates_dropped,
            Counter::Suppressed => &mut self.events_suppressed,
            Counter::Rejected => &mut self.events_rejected,
            Counter::BatchFlushed => &mut self.batches_flushed,
            Counter::FlushFailure => &mut self.flush_failures,
            Counter::SessionStarted => &mut self.sessions_started,
            Counter::ReportSigned => &mut self.reports_signed,
        };
        *field = value;
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StatsFile {
    #[serde(flatten)]
    totals: TransparencyStats,
    last_updated: DateTime<Utc>,
}

#[derive(Debug)]
pub struct TransparencyLog {
    counters: [AtomicU64; 8],
    persist_path: Option<PathBuf>,
}

impl TransparencyLog {
    pub fn new() -> Self {
        Self {
            counters: Default::default(),
            persist_path: None,
        }
    }

    /// A log that continues from the totals saved at `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<StatsFile>(&content) {
                Ok(file) => log.restore(&file.totals),
                Err(e) => tracing::warn!("ignoring unreadable transparency stats: {e}"),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("could not load previous transparency stats: {e}"),
        }
        log.persist_path = Some(path);
        log
    }

    pub fn bump(&self, counter: Counter, by: u64) {
        self.counters[counter.slot()].fetch_add(by, Ordering::Relaxed);
    }

    /// Count one capture-filter outcome.
    pub fn record_outcome(&self, outcome: &SubmitOutcome) {
        let counter = match outcome {
            SubmitOutcome::Accepted(_) => Counter::Accepted,
            SubmitOutcome::Duplicate => Counter::Duplicate,
            SubmitOutcome::Suppressed => Counter::Suppressed,
            SubmitOutcome::Rejected(_) => Counter::Rejected,
        };
        self.bump(counter, 1);
    }

    /// Events accepted on the receiving side of a batch.
    pub fn record_accepted(&self, count: u64) {
        self.bump(Counter::Accepted, count);
    }

    pub fn record_batch_flushed(&self) {
        self.bump(Counter::BatchFlushed, 1);
    }

    pub fn record_flush_failure(&self) {
        self.bump(Counter::FlushFailure, 1);
    }

    pub fn record_session_started(&self) {
        self.bump(Counter::SessionStarted, 1);
    }

    pub fn record_report_signed(&self) {
        self.bump(Counter::ReportSigned, 1);
    }

    pub fn stats(&self) -> TransparencyStats {
        let mut stats = TransparencyStats::default();
        for counter in Counter::ALL {
            stats.set(counter, self.counters[counter.slot()].load(Ordering::Relaxed));
        }
        stats
    }

    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Capture Statistics:\n\
             - Events accepted: {}\n\
             - Duplicates dropped: {}\n\
             - Side effects suppressed: {}\n\
             - Events rejected: {}\n\
             - Batches flushed: {} ({} failed attempts)\n\
             - Sessions started: {}\n\
             - Reports signed: {}\n\
             \n\
             Privacy Guarantee:\n\
             - Only key codes, timings and character counts are analyzed\n\
             - Reports carry a hash of the text, not the text itself",
            stats.events_accepted,
            stats.duplicates_dropped,
            stats.events_suppressed,
            stats.events_rejected,
            stats.batches_flushed,
            stats.flush_failures,
            stats.sessions_started,
            stats.reports_signed,
        )
    }

    /// Write the totals to the persistence path, if there is one.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = StatsFile {
            totals: self.stats(),
            last_updated: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&file).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    pub fn reset(&self) {
        self.restore(&TransparencyStats::default());
    }

    fn restore(&self, totals: &TransparencyStats) {
        for counter in Counter::ALL {
            self.counters[counter.slot()].store(totals.get(counter), Ordering::Relaxed);
        }
    }
}

impl Default for TransparencyLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe shared transparency log.
pub type SharedTransparencyLog = Arc<TransparencyLog>;

pub fn create_shared_log() -> SharedTransparencyLog {
    Arc::new(TransparencyLog::new())
}

pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedTransparencyLog {
    Arc::new(TransparencyLog::with_persistence(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::filter::CaptureError;

    #[test]
    fn test_outcome_counting() {
        let log = TransparencyLog::new();
        log.record_outcome(&SubmitOutcome::Duplicate);
        log.record_outcome(&SubmitOutcome::Duplicate);
        log.record_outcome(&SubmitOutcome::Rejected(CaptureError::ChannelUnavailable));
        log.record_accepted(7);

        let stats = log.stats();
        assert_eq!(stats.duplicates_dropped, 2);
        assert_eq!(stats.events_rejected, 1);
        assert_eq!(stats.events_accepted, 7);
    }

    #[test]
    fn test_reset() {
        let log = TransparencyLog::new();
        log.record_batch_flushed();
        log.record_report_signed();
        log.reset();
        assert_eq!(log.stats(), TransparencyStats::default());
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transparency.json");

        let log = TransparencyLog::with_persistence(path.clone());
        log.record_session_started();
        log.record_flush_failure();
        log.save().unwrap();

        let reloaded = TransparencyLog::with_persistence(path);
        assert_eq!(reloaded.stats().sessions_started, 1);
        assert_eq!(reloaded.stats().flush_failures, 1);
    }

    #[test]
    fn test_corrupt_stats_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transparency.json");
        std::fs::write(&path, "not json").unwrap();

        let log = TransparencyLog::with_persistence(path);
        assert_eq!(log.stats(), TransparencyStats::default());
    }

    #[test]
    fn test_summary_format() {
        let summary = TransparencyLog::new().summary();
        assert!(summary.contains("Duplicates dropped"));
        assert!(summary.contains("Privacy Guarantee"));
    }
}
