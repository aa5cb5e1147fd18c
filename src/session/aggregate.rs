//! The per-session state container.
//!
//! A [`SessionAggregate`] is the only writer of its session's ledger, event
//! history and batch buffer. It is plain data: [`SessionAggregate::snapshot`]
//! captures everything needed to rebuild it after the hosting process is
//! suspended, including events accepted but not yet acknowledged by the
//! receiving side.

use crate::collector::filter::{CaptureFilter, FilterConfig, FilterStats, SubmitOutcome};
use crate::collector::types::{CapturedEvent, PasteEvent, RawEvent};
use crate::core::classifier::{ClassificationResult, ClassifierConfig, ClassifierInput, HybridClassifier};
use crate::core::features::{FeatureConfig, FeatureSet, ModelFeatures};
use crate::core::model::{Prediction, Predictor};
use crate::session::buffer::{BatchBuffer, BatchSink, EventBatch, FlushPolicy, TransportError};
use crate::session::ledger::CharacterLedger;
use crate::session::store::SnapshotError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use uuid::Uuid;

/// Bumped whenever the snapshot layout changes incompatibly.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Recording,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub domain: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub state: SessionState,
}

/// All tunables the pipeline needs for one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub capture: FilterConfig,
    pub batching: FlushPolicy,
    pub features: FeatureConfig,
    pub classifier: ClassifierConfig,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session {id} is not recording (state {state:?})")]
    NotRecording { id: Uuid, state: SessionState },
    #[error("session {0} has ended")]
    Ended(Uuid),
    #[error("batch {0} is not in flight")]
    UnknownBatch(u64),
    #[error("batch {sequence} contains an invalid event: {reason}")]
    InvalidBatch { sequence: u64, reason: String },
    #[error("{0} events have not been flushed")]
    UnflushedEvents(usize),
    #[error("no active session")]
    NoActiveSession,
    #[error("session {0} is already recording")]
    Busy(Uuid),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// Result of applying a batch on the receiving side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Applied { events: usize },
    /// This sequence was applied before; nothing changed
    AlreadyApplied,
}

/// Features, model input and verdict from one analysis pass.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub features: FeatureSet,
    pub model_features: ModelFeatures,
    pub prediction: Option<Prediction>,
    pub result: ClassificationResult,
}

/// Serialized form of an aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    pub format_version: u32,
    pub taken_at: DateTime<Utc>,
    pub aggregate: SessionAggregate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionAggregate {
    session: Session,
    config: PipelineConfig,
    filter: CaptureFilter,
    ledger: CharacterLedger,
    /// Accepted events, ordered by timestamp
    history: Vec<CapturedEvent>,
    buffer: BatchBuffer,
    /// Capture-clock time recording started, when known
    clock_start_ms: Option<f64>,
    applied_sequences: BTreeSet<u64>,
    last_result: Option<ClassificationResult>,
}

impl SessionAggregate {
    pub fn new(domain: impl Into<String>, config: PipelineConfig) -> Self {
        Self::with_id(Uuid::new_v4(), domain, config)
    }

    pub fn with_id(id: Uuid, domain: impl Into<String>, config: PipelineConfig) -> Self {
        Self {
            session: Session {
                id,
                domain: domain.into(),
                started_at: Utc::now(),
                ended_at: None,
                state: SessionState::Idle,
            },
            filter: CaptureFilter::new(config.capture.clone()),
            buffer: BatchBuffer::new(config.batching.clone()),
            config,
            ledger: CharacterLedger::new(),
            history: Vec::new(),
            clock_start_ms: None,
            applied_sequences: BTreeSet::new(),
            last_result: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.session.id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    pub fn is_recording(&self) -> bool {
        self.session.state == SessionState::Recording
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &CharacterLedger {
        &self.ledger
    }

    pub fn history(&self) -> &[CapturedEvent] {
        &self.history
    }

    pub fn buffer(&self) -> &BatchBuffer {
        &self.buffer
    }

    pub fn filter_stats(&self) -> &FilterStats {
        self.filter.stats()
    }

    pub fn last_result(&self) -> Option<&ClassificationResult> {
        self.last_result.as_ref()
    }

    /// Enter `Recording`. A no-op while already recording.
    ///
    /// `clock_ms` is the capture-clock time of the start, if the caller
    /// shares a clock with the event source.
    pub fn start(&mut self, clock_ms: Option<f64>) -> Result<Uuid, SessionError> {
        match self.session.state {
            SessionState::Recording => {
                tracing::debug!(session = %self.session.id, "start ignored: already recording");
                Ok(self.session.id)
            }
            SessionState::Ended => Err(SessionError::Ended(self.session.id)),
            SessionState::Idle => {
                self.filter.reset();
                self.ledger = CharacterLedger::new();
                self.history.clear();
                self.buffer.reset(clock_ms.unwrap_or(0.0));
                self.applied_sequences.clear();
                self.last_result = None;
                self.clock_start_ms = clock_ms;
                self.session.started_at = Utc::now();
                self.session.state = SessionState::Recording;
                tracing::info!(session = %self.session.id, domain = %self.session.domain, "recording started");
                Ok(self.session.id)
            }
        }
    }

    /// Run one raw event through the filter and, if accepted, into the
    /// ledger, history and batch buffer.
    pub fn submit(&mut self, raw: &RawEvent) -> Result<SubmitOutcome, SessionError> {
        self.ensure_recording()?;
        let outcome = self.filter.submit(raw);
        if let SubmitOutcome::Accepted(event) = &outcome {
            self.record(event.clone(), true);
        }
        Ok(outcome)
    }

    /// Cut a batch if the flush policy says it is time.
    pub fn poll_flush(&mut self, now_ms: f64) -> Option<EventBatch> {
        self.begin_flush(now_ms, false)
    }

    /// Cut a batch; with `force` the minimum size is ignored.
    ///
    /// The batch stays in flight until [`complete_flush`](Self::complete_flush)
    /// is called. Events keep buffering meanwhile.
    pub fn begin_flush(&mut self, now_ms: f64, force: bool) -> Option<EventBatch> {
        if !self.is_recording() {
            return None;
        }
        let batch = self.buffer.take_batch(now_ms, force)?;
        Some(EventBatch {
            session_id: self.session.id,
            batch_sequence: batch.sequence,
            events: batch.events,
        })
    }

    /// Settle an in-flight batch. A failed batch returns to the front of the
    /// buffer and is retried under the same sequence.
    pub fn complete_flush(
        &mut self,
        sequence: u64,
        result: &Result<(), TransportError>,
    ) -> Result<(), SessionError> {
        if !self.buffer.complete(sequence, result.is_ok()) {
            return Err(SessionError::UnknownBatch(sequence));
        }
        match result {
            Ok(()) => tracing::debug!(session = %self.session.id, sequence, "batch delivered"),
            Err(e) => tracing::warn!(
                session = %self.session.id,
                sequence,
                "batch delivery failed, will retry: {e}"
            ),
        }
        Ok(())
    }

    /// Cut a batch and hand it to `sink` synchronously. Returns the number
    /// of events delivered.
    pub fn flush_with(
        &mut self,
        sink: &mut dyn BatchSink,
        now_ms: f64,
        force: bool,
    ) -> Result<usize, SessionError> {
        let Some(batch) = self.begin_flush(now_ms, force) else {
            return Ok(0);
        };
        let result = sink.send_batch(&batch);
        self.complete_flush(batch.batch_sequence, &result)?;
        result?;
        Ok(batch.events.len())
    }

    /// Flush everything and end the session.
    ///
    /// If the final flush fails the session stays `Recording` with its
    /// events intact, so the caller can retry or suspend it.
    pub fn stop(&mut self, sink: &mut dyn BatchSink, now_ms: f64) -> Result<(), SessionError> {
        match self.session.state {
            SessionState::Ended => return Ok(()),
            SessionState::Idle => {
                return Err(SessionError::NotRecording {
                    id: self.session.id,
                    state: SessionState::Idle,
                })
            }
            SessionState::Recording => {}
        }

        // The outcome of a send interrupted elsewhere is unknown; resend it.
        self.buffer.requeue_in_flight();
        let mut delivered = 0;
        while !self.buffer.is_drained() {
            delivered += self.flush_with(sink, now_ms, true)?;
        }
        self.finish();
        tracing::info!(session = %self.session.id, delivered, "recording stopped");
        Ok(())
    }

    /// End a session that has nothing left to ship (the receiving side).
    pub fn end(&mut self) -> Result<(), SessionError> {
        match self.session.state {
            SessionState::Ended => Ok(()),
            SessionState::Idle => Err(SessionError::NotRecording {
                id: self.session.id,
                state: SessionState::Idle,
            }),
            SessionState::Recording => {
                if !self.buffer.is_drained() {
                    return Err(SessionError::UnflushedEvents(
                        self.buffer.unacknowledged().count(),
                    ));
                }
                self.finish();
                tracing::info!(session = %self.session.id, "session ended");
                Ok(())
            }
        }
    }

    /// Apply a batch shipped by a capture context. Idempotent per sequence.
    pub fn ingest_batch(
        &mut self,
        sequence: u64,
        events: Vec<CapturedEvent>,
    ) -> Result<IngestOutcome, SessionError> {
        self.ensure_recording()?;
        if self.applied_sequences.contains(&sequence) {
            tracing::debug!(session = %self.session.id, sequence, "batch already applied");
            return Ok(IngestOutcome::AlreadyApplied);
        }
        if let Some(bad) = events
            .iter()
            .find(|e| !e.timestamp().is_finite() || e.timestamp() < 0.0)
        {
            return Err(SessionError::InvalidBatch {
                sequence,
                reason: format!("timestamp {}", bad.timestamp()),
            });
        }

        let mut count = 0;
        for event in events {
            if self.filter.admit_forwarded(&event) {
                self.record(event, false);
                count += 1;
            }
        }
        self.applied_sequences.insert(sequence);
        Ok(IngestOutcome::Applied { events: count })
    }

    /// Apply a standalone paste report. Retries of the same paste are
    /// recognized as duplicates and reported as accepted.
    pub fn ingest_paste(&mut self, event: &PasteEvent) -> Result<bool, SessionError> {
        self.ensure_recording()?;
        match self.filter.submit(&RawEvent::paste(event.length, event.timestamp)) {
            SubmitOutcome::Accepted(accepted) => {
                self.record(accepted, false);
                Ok(true)
            }
            SubmitOutcome::Duplicate => Ok(true),
            SubmitOutcome::Suppressed | SubmitOutcome::Rejected(_) => Ok(false),
        }
    }

    /// Features over everything accepted so far.
    pub fn features(&self) -> FeatureSet {
        FeatureSet::extract(&self.history, self.clock_start_ms, &self.config.features)
    }

    /// Extract features, consult the model (when enough keys were seen) and
    /// run the cascade. The result is remembered as the session's latest.
    pub fn analyze(&mut self, predictor: &dyn Predictor) -> Analysis {
        let features = self.features();
        let model_features = features.model_features(&self.config.features);
        let prediction = if features.keystrokes >= self.config.classifier.min_model_keys {
            predictor.predict(&model_features)
        } else {
            None
        };

        let input = ClassifierInput::from_ledger(&self.ledger, &features.burst)
            .with_prediction(prediction.as_ref())
            .with_prior(
                self.last_result
                    .as_ref()
                    .filter(|r| !r.is_waiting())
                    .map(|r| r.confidence),
            );
        let result = HybridClassifier::new(self.config.classifier.clone()).classify(&input);
        tracing::debug!(
            session = %self.session.id,
            verdict = %result.verdict,
            confidence = result.confidence,
            "session classified"
        );
        self.last_result = Some(result.clone());

        Analysis {
            features,
            model_features,
            prediction,
            result,
        }
    }

    pub fn classify(&mut self, predictor: &dyn Predictor) -> ClassificationResult {
        self.analyze(predictor).result
    }

    pub fn snapshot(&self) -> AggregateSnapshot {
        AggregateSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            taken_at: Utc::now(),
            aggregate: self.clone(),
        }
    }

    /// Rebuild an aggregate from a snapshot.
    ///
    /// A batch that was in flight when the snapshot was taken is queued for
    /// retry under its original sequence.
    pub fn restore(snapshot: AggregateSnapshot) -> Result<Self, SnapshotError> {
        if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: snapshot.format_version,
                expected: SNAPSHOT_FORMAT_VERSION,
            });
        }
        let mut aggregate = snapshot.aggregate;
        aggregate.buffer.requeue_in_flight();
        tracing::info!(session = %aggregate.session.id, "session restored");
        Ok(aggregate)
    }

    fn ensure_recording(&self) -> Result<(), SessionError> {
        match self.session.state {
            SessionState::Recording => Ok(()),
            SessionState::Ended => Err(SessionError::Ended(self.session.id)),
            state => Err(SessionError::NotRecording {
                id: self.session.id,
                state,
            }),
        }
    }

    fn record(&mut self, event: CapturedEvent, buffered: bool) {
        self.ledger.apply(&event);
        let ts = event.timestamp();
        let at = self.history.partition_point(|e| e.timestamp() <= ts);
        self.history.insert(at, event.clone());
        if buffered {
            self.buffer.push(event);
        }
    }

    fn finish(&mut self) {
        self.session.state = SessionState::Ended;
        self.session.ended_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::Verdict;
    use crate::core::model::NoModel;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct RecordingSink {
        batches: Vec<EventBatch>,
        fail: bool,
    }

    impl BatchSink for RecordingSink {
        fn send_batch(&mut self, batch: &EventBatch) -> Result<(), TransportError> {
            if self.fail {
                return Err(TransportError::Unavailable("offline".to_string()));
            }
            self.batches.push(batch.clone());
            Ok(())
        }
    }

    fn recording() -> SessionAggregate {
        let mut aggregate = SessionAggregate::new("docs.example.com", PipelineConfig::default());
        aggregate.start(Some(0.0)).unwrap();
        aggregate
    }

    fn type_chars(aggregate: &mut SessionAggregate, n: usize, start_ms: f64) -> f64 {
        let mut t = start_ms;
        for i in 0..n {
            let code = 65 + (i % 26) as u32;
            aggregate.submit(&RawEvent::key_press(code, Some('a'), t)).unwrap();
            aggregate.submit(&RawEvent::key_release(code, t + 90.0)).unwrap();
            t += 200.0;
        }
        t
    }

    #[test]
    fn test_start_is_idempotent_and_resets() {
        let mut aggregate = SessionAggregate::new("example.org", PipelineConfig::default());
        assert_eq!(aggregate.state(), SessionState::Idle);
        assert!(aggregate.submit(&RawEvent::key_press(65, Some('a'), 1.0)).is_err());

        let id = aggregate.start(Some(0.0)).unwrap();
        type_chars(&mut aggregate, 3, 10.0);
        assert_eq!(aggregate.start(Some(5000.0)).unwrap(), id);
        assert_eq!(aggregate.ledger().typed, 3);
    }

    #[test]
    fn test_ledger_matches_accepted_characters() {
        let mut aggregate = recording();
        let raws = vec![
            RawEvent::key_press(72, Some('h'), 0.0),
            RawEvent::input_change(1, 3.0),
            RawEvent::key_release(72, 80.0),
            RawEvent::paste(40, 500.0),
            RawEvent::input_change(40, 505.0),
            RawEvent::assistant(12, 2000.0, None),
            RawEvent::assistant(12, 2010.0, None),
            RawEvent::input_change(1, 3000.0),
        ];
        let mut accepted_chars = 0;
        for raw in &raws {
            if let SubmitOutcome::Accepted(event) = aggregate.submit(raw).unwrap() {
                accepted_chars += event.char_count();
            }
            let ledger = aggregate.ledger();
            assert_eq!(ledger.typed + ledger.pasted + ledger.assistant, accepted_chars);
        }
        assert_eq!(
            *aggregate.ledger(),
            CharacterLedger {
                typed: 2,
                pasted: 40,
                assistant: 12
            }
        );
    }

    #[test]
    fn test_flush_failure_keeps_events_for_retry() {
        let mut aggregate = recording();
        type_chars(&mut aggregate, 10, 0.0);
        let mut sink = RecordingSink {
            fail: true,
            ..Default::default()
        };
        assert!(aggregate.flush_with(&mut sink, 600.0, false).is_err());
        assert_eq!(aggregate.buffer().len(), 20);

        sink.fail = false;
        assert_eq!(aggregate.flush_with(&mut sink, 1200.0, false).unwrap(), 20);
        assert_eq!(sink.batches.len(), 1);
        assert_eq!(sink.batches[0].batch_sequence, 1);
        assert!(aggregate.buffer().is_drained());
    }

    #[test]
    fn test_stop_flushes_then_ends() {
        let mut aggregate = recording();
        type_chars(&mut aggregate, 3, 0.0);
        let mut sink = RecordingSink::default();
        aggregate.stop(&mut sink, 700.0).unwrap();

        assert_eq!(aggregate.state(), SessionState::Ended);
        assert_eq!(sink.batches.iter().map(|b| b.events.len()).sum::<usize>(), 6);
        assert!(matches!(
            aggregate.submit(&RawEvent::key_press(90, Some('z'), 800.0)),
            Err(SessionError::Ended(_))
        ));
        assert!(matches!(aggregate.start(None), Err(SessionError::Ended(_))));
    }

    #[test]
    fn test_failed_stop_stays_recording() {
        let mut aggregate = recording();
        type_chars(&mut aggregate, 2, 0.0);
        let mut sink = RecordingSink {
            fail: true,
            ..Default::default()
        };
        assert!(aggregate.stop(&mut sink, 700.0).is_err());
        assert!(aggregate.is_recording());
        assert_eq!(aggregate.buffer().len(), 4);
    }

    #[test]
    fn test_ingest_batch_is_idempotent() {
        let mut source = recording();
        type_chars(&mut source, 30, 0.0);
        let batch = source.begin_flush(10_000.0, true).unwrap();

        let mut receiver = SessionAggregate::with_id(source.id(), "docs.example.com", PipelineConfig::default());
        receiver.start(None).unwrap();
        assert_eq!(
            receiver.ingest_batch(batch.batch_sequence, batch.events.clone()).unwrap(),
            IngestOutcome::Applied { events: 60 }
        );
        assert_eq!(
            receiver.ingest_batch(batch.batch_sequence, batch.events).unwrap(),
            IngestOutcome::AlreadyApplied
        );
        assert_eq!(receiver.ledger(), source.ledger());
    }

    #[test]
    fn test_ingest_paste_retry() {
        let mut aggregate = recording();
        let paste = PasteEvent {
            length: 25,
            timestamp: 100.0,
        };
        assert!(aggregate.ingest_paste(&paste).unwrap());
        assert!(aggregate.ingest_paste(&paste).unwrap());
        assert_eq!(aggregate.ledger().pasted, 25);
    }

    #[test]
    fn test_paste_in_batch_and_reported_separately_counts_once() {
        let paste = PasteEvent {
            length: 50,
            timestamp: 1000.0,
        };

        let mut aggregate = recording();
        let outcome = aggregate
            .ingest_batch(1, vec![CapturedEvent::Paste(paste.clone())])
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Applied { events: 1 });
        assert!(aggregate.ingest_paste(&paste).unwrap());
        assert_eq!(aggregate.ledger().pasted, 50);

        let mut aggregate = recording();
        assert!(aggregate.ingest_paste(&paste).unwrap());
        let outcome = aggregate
            .ingest_batch(1, vec![CapturedEvent::Paste(paste)])
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Applied { events: 0 });
        assert_eq!(aggregate.ledger().pasted, 50);
        assert_eq!(aggregate.history().len(), 1);
    }

    #[test]
    fn test_key_press_after_input_change_counts_once() {
        let mut aggregate = recording();
        aggregate.submit(&RawEvent::input_change(1, 500.0)).unwrap();
        aggregate.submit(&RawEvent::key_press(66, Some('b'), 502.0)).unwrap();
        aggregate.submit(&RawEvent::key_release(66, 570.0)).unwrap();
        assert_eq!(aggregate.ledger().typed, 1);
        // The press still feeds the timing features.
        assert_eq!(aggregate.history().len(), 3);
    }

    #[test]
    fn test_snapshot_restore_mid_recording() {
        let mut aggregate = recording();
        type_chars(&mut aggregate, 25, 0.0);
        aggregate.submit(&RawEvent::paste(5, 9000.0)).unwrap();
        aggregate.classify(&NoModel);

        let json = serde_json::to_string(&aggregate.snapshot()).unwrap();
        let restored = SessionAggregate::restore(serde_json::from_str(&json).unwrap()).unwrap();

        assert_eq!(restored, aggregate);
        assert_eq!(restored.ledger(), aggregate.ledger());
        assert_eq!(
            restored.buffer().unacknowledged().collect::<Vec<_>>(),
            aggregate.buffer().unacknowledged().collect::<Vec<_>>()
        );
        assert_eq!(restored.last_result(), aggregate.last_result());
        assert_eq!(restored.state(), SessionState::Recording);
    }

    #[test]
    fn test_restore_requeues_in_flight_batch() {
        let mut aggregate = recording();
        type_chars(&mut aggregate, 10, 0.0);
        let batch = aggregate.begin_flush(5000.0, true).unwrap();
        let snapshot = aggregate.snapshot();

        let mut restored = SessionAggregate::restore(snapshot).unwrap();
        let mut sink = RecordingSink::default();
        restored.flush_with(&mut sink, 5001.0, true).unwrap();
        assert_eq!(sink.batches, vec![batch]);
    }

    #[test]
    fn test_restore_rejects_unknown_version() {
        let mut snapshot = recording().snapshot();
        snapshot.format_version = 99;
        assert!(matches!(
            SessionAggregate::restore(snapshot),
            Err(SnapshotError::UnsupportedVersion { found: 99, .. })
        ));
    }

    #[test]
    fn test_classify_waits_for_enough_input() {
        let mut aggregate = recording();
        type_chars(&mut aggregate, 15, 0.0);
        assert_eq!(aggregate.classify(&NoModel).verdict, Verdict::InsufficientData);

        type_chars(&mut aggregate, 10, 10_000.0);
        let result = aggregate.classify(&NoModel);
        assert_eq!(result.verdict, Verdict::HumanVerified);
        assert_eq!(aggregate.last_result(), Some(&result));
    }

    #[test]
    fn test_waiting_result_is_not_a_prior() {
        let mut aggregate = recording();
        let t = type_chars(&mut aggregate, 5, 0.0);
        assert!(aggregate.classify(&NoModel).is_waiting());

        // 17 typed, 2 pasted, 2 inserted: no rule fires, human share 81%.
        let t = type_chars(&mut aggregate, 12, t);
        aggregate.submit(&RawEvent::paste(2, t + 1000.0)).unwrap();
        aggregate
            .submit(&RawEvent::assistant(2, t + 2000.0, None))
            .unwrap();
        let result = aggregate.classify(&NoModel);
        assert_eq!(result.verdict, Verdict::Uncertain);
        assert_eq!(
            result.confidence,
            aggregate.config().classifier.fallback_confidence
        );

        // A real verdict does carry over.
        let again = aggregate.classify(&NoModel);
        assert_eq!(again.confidence, result.confidence);
    }

    #[test]
    fn test_model_not_consulted_below_key_gate() {
        let mut aggregate = recording();
        type_chars(&mut aggregate, 5, 0.0);
        let called = std::sync::atomic::AtomicBool::new(false);
        let predictor = |_: &ModelFeatures| -> Option<Prediction> {
            called.store(true, std::sync::atomic::Ordering::SeqCst);
            None
        };
        let analysis = aggregate.analyze(&predictor);
        assert!(analysis.prediction.is_none());
        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
    }
}
