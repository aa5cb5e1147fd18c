//! A capture context: one event bus feeding at most one recording session.

use crate::collector::bus::EventBus;
use crate::collector::filter::SubmitOutcome;
use crate::collector::types::CaptureSource;
use crate::collector::CaptureTap;
use crate::session::aggregate::{PipelineConfig, SessionAggregate, SessionError};
use crate::session::buffer::BatchSink;
use crate::session::store::SnapshotStore;
use crate::transparency::SharedTransparencyLog;
use uuid::Uuid;

/// What one [`CaptureContext::pump`] call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PumpReport {
    pub drained: usize,
    pub accepted: usize,
    pub dropped: usize,
    /// Events delivered to the sink by this pump
    pub flushed: usize,
    /// A due flush failed; the batch waits for the next attempt
    pub flush_failed: bool,
}

pub struct CaptureContext {
    bus: EventBus,
    config: PipelineConfig,
    current: Option<SessionAggregate>,
    transparency: Option<SharedTransparencyLog>,
}

impl CaptureContext {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            bus: EventBus::default(),
            config,
            current: None,
            transparency: None,
        }
    }

    pub fn with_transparency(mut self, log: SharedTransparencyLog) -> Self {
        self.transparency = Some(log);
        self
    }

    /// A tap for one capture strategy. Taps stay valid across sessions.
    pub fn tap(&self, source: CaptureSource) -> CaptureTap {
        self.bus.tap(source)
    }

    pub fn aggregate(&self) -> Option<&SessionAggregate> {
        self.current.as_ref()
    }

    pub fn aggregate_mut(&mut self) -> Option<&mut SessionAggregate> {
        self.current.as_mut()
    }

    /// Hand the current aggregate to the caller, leaving the context empty.
    pub fn take(&mut self) -> Option<SessionAggregate> {
        self.current.take()
    }

    pub fn is_recording(&self) -> bool {
        self.current.as_ref().is_some_and(SessionAggregate::is_recording)
    }

    /// Start recording. While a session is recording this returns its id
    /// instead of starting another.
    pub fn start_session(&mut self, domain: &str, now_ms: f64) -> Result<Uuid, SessionError> {
        if let Some(current) = self.current.as_ref().filter(|a| a.is_recording()) {
            if current.session().domain != domain {
                tracing::warn!(
                    session = %current.id(),
                    requested = domain,
                    "start ignored: another session is recording"
                );
            }
            let id = current.id();
            self.bus.reopen();
            return Ok(id);
        }

        // Anything queued before the start belongs to no session.
        let stale = self.bus.drain().len();
        if stale > 0 {
            tracing::debug!(stale, "discarded events queued before start");
        }
        let mut aggregate = SessionAggregate::new(domain, self.config.clone());
        let id = aggregate.start(Some(now_ms))?;
        self.current = Some(aggregate);
        self.bus.reopen();
        if let Some(log) = &self.transparency {
            log.record_session_started();
        }
        Ok(id)
    }

    /// Drain the bus into the session and flush if the policy says so.
    ///
    /// A failed flush is not an error here: the batch stays queued and is
    /// retried on a later pump.
    pub fn pump(&mut self, sink: &mut dyn BatchSink, now_ms: f64) -> Result<PumpReport, SessionError> {
        let mut report = self.drain()?;
        let aggregate = self.current.as_mut().ok_or(SessionError::NoActiveSession)?;
        if aggregate.buffer().is_flush_due(now_ms) {
            match aggregate.flush_with(sink, now_ms, false) {
                Ok(flushed) => {
                    report.flushed = flushed;
                    if flushed > 0 {
                        self.note_flush(true);
                    }
                }
                Err(SessionError::Transport(e)) => {
                    tracing::warn!("flush failed, events stay buffered: {e}");
                    report.flush_failed = true;
                    self.note_flush(false);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    /// Drain the bus, close it and end the session with a final flush.
    ///
    /// If the flush fails the session keeps recording and the bus is
    /// opened again, so capture continues until the next stop.
    pub fn stop(&mut self, sink: &mut dyn BatchSink, now_ms: f64) -> Result<(), SessionError> {
        self.drain()?;
        self.bus.close();
        let aggregate = self.current.as_mut().ok_or(SessionError::NoActiveSession)?;
        let before = aggregate.buffer().next_sequence();
        let result = aggregate.stop(sink, now_ms);
        let batches = aggregate.buffer().next_sequence() - before;
        if aggregate.is_recording() {
            self.bus.reopen();
        }
        if let Some(log) = &self.transparency {
            for _ in 0..batches {
                log.record_batch_flushed();
            }
            if result.is_err() {
                log.record_flush_failure();
            }
        }
        result
    }

    /// Persist the recording session and release it.
    pub fn suspend(&mut self, store: &SnapshotStore) -> Result<Uuid, SessionError> {
        self.drain()?;
        let aggregate = self.current.take().ok_or(SessionError::NoActiveSession)?;
        match store.save(&aggregate.snapshot()) {
            Ok(path) => {
                self.bus.close();
                tracing::info!(session = %aggregate.id(), path = %path.display(), "session suspended");
                Ok(aggregate.id())
            }
            Err(e) => {
                self.current = Some(aggregate);
                Err(e.into())
            }
        }
    }

    /// Bring a suspended session back. Fails if another session is recording.
    pub fn resume(&mut self, store: &SnapshotStore, session_id: Uuid) -> Result<Uuid, SessionError> {
        if let Some(current) = self.current.as_ref().filter(|a| a.is_recording()) {
            if current.id() == session_id {
                return Ok(session_id);
            }
            return Err(SessionError::Busy(current.id()));
        }
        let aggregate = SessionAggregate::restore(store.load(session_id)?)?;
        store.remove(session_id)?;
        self.current = Some(aggregate);
        self.bus.reopen();
        Ok(session_id)
    }

    fn drain(&mut self) -> Result<PumpReport, SessionError> {
        let mut report = PumpReport::default();
        let raws = self.bus.drain();
        if raws.is_empty() {
            return Ok(report);
        }
        let aggregate = self.current.as_mut().ok_or(SessionError::NoActiveSession)?;
        for raw in &raws {
            let outcome = aggregate.submit(raw)?;
            report.drained += 1;
            if outcome.is_accepted() {
                report.accepted += 1;
            } else {
                report.dropped += 1;
            }
            if let Some(log) = &self.transparency {
                log.record_outcome(&outcome);
            }
            if let SubmitOutcome::Rejected(e) = &outcome {
                tracing::debug!(source = ?raw.source, "dropped: {e}");
            }
        }
        Ok(report)
    }

    fn note_flush(&self, delivered: bool) {
        if let Some(log) = &self.transparency {
            if delivered {
                log.record_batch_flushed();
            } else {
                log.record_flush_failure();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::types::KeyKind;
    use crate::session::aggregate::SessionState;
    use crate::session::buffer::{EventBatch, TransportError};
    use crate::session::spool::DiscardSink;
    use crate::transparency::create_shared_log;

    struct FlakySink {
        fail: bool,
        delivered: Vec<EventBatch>,
    }

    impl BatchSink for FlakySink {
        fn send_batch(&mut self, batch: &EventBatch) -> Result<(), TransportError> {
            if self.fail {
                Err(TransportError::Timeout)
            } else {
                self.delivered.push(batch.clone());
                Ok(())
            }
        }
    }

    #[test]
    fn test_one_recording_session_per_context() {
        let mut context = CaptureContext::new(PipelineConfig::default());
        let first = context.start_session("a.example", 0.0).unwrap();
        let second = context.start_session("b.example", 10.0).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_redundant_taps_count_once() {
        let log = create_shared_log();
        let mut context = CaptureContext::new(PipelineConfig::default()).with_transparency(log.clone());
        context.start_session("example.org", 0.0).unwrap();

        let keys = context.tap(CaptureSource::KeyListener);
        let inputs = context.tap(CaptureSource::InputChange);
        let keys_again = context.tap(CaptureSource::KeyListener);

        keys.key(KeyKind::Press, 72, Some('h'), 100.0).unwrap();
        keys_again.key(KeyKind::Press, 72, Some('h'), 100.5).unwrap();
        inputs.input(1, 101.0).unwrap();
        keys.key(KeyKind::Release, 72, None, 180.0).unwrap();

        let report = context.pump(&mut DiscardSink, 200.0).unwrap();
        assert_eq!(report.drained, 4);
        assert_eq!(report.accepted, 2);
        assert_eq!(context.aggregate().unwrap().ledger().typed, 1);
        assert_eq!(log.stats().duplicates_dropped, 2);
    }

    #[test]
    fn test_pump_fails_soft_and_retries() {
        let mut context = CaptureContext::new(PipelineConfig::default());
        context.start_session("example.org", 0.0).unwrap();
        let keys = context.tap(CaptureSource::KeyListener);
        for i in 0..12u32 {
            keys.key(KeyKind::Press, 65 + i, Some('a'), 10.0 + i as f64 * 150.0).unwrap();
        }

        let mut sink = FlakySink {
            fail: true,
            delivered: Vec::new(),
        };
        let report = context.pump(&mut sink, 2000.0).unwrap();
        assert!(report.flush_failed);
        assert_eq!(context.aggregate().unwrap().buffer().len(), 12);

        sink.fail = false;
        let report = context.pump(&mut sink, 2600.0).unwrap();
        assert_eq!(report.flushed, 12);
        assert_eq!(sink.delivered.len(), 1);
    }

    #[test]
    fn test_stop_closes_bus() {
        let mut context = CaptureContext::new(PipelineConfig::default());
        context.start_session("example.org", 0.0).unwrap();
        let keys = context.tap(CaptureSource::KeyListener);
        keys.key(KeyKind::Press, 65, Some('a'), 10.0).unwrap();

        context.stop(&mut DiscardSink, 100.0).unwrap();
        assert_eq!(context.aggregate().unwrap().state(), SessionState::Ended);
        assert_eq!(context.aggregate().unwrap().ledger().typed, 1);
        assert!(keys.key(KeyKind::Press, 66, Some('b'), 20.0).is_err());
    }

    #[test]
    fn test_failed_stop_keeps_capturing() {
        let log = create_shared_log();
        let mut context = CaptureContext::new(PipelineConfig::default()).with_transparency(log.clone());
        let id = context.start_session("example.org", 0.0).unwrap();
        let keys = context.tap(CaptureSource::KeyListener);
        keys.key(KeyKind::Press, 65, Some('a'), 10.0).unwrap();

        let mut sink = FlakySink {
            fail: true,
            delivered: Vec::new(),
        };
        assert!(context.stop(&mut sink, 100.0).is_err());
        assert!(context.is_recording());
        assert_eq!(log.stats().flush_failures, 1);
        keys.key(KeyKind::Release, 65, None, 120.0).unwrap();
        assert_eq!(context.start_session("example.org", 150.0).unwrap(), id);

        sink.fail = false;
        context.stop(&mut sink, 200.0).unwrap();
        let shipped: usize = sink.delivered.iter().map(|b| b.events.len()).sum();
        assert_eq!(shipped, 2);
        assert!(keys.key(KeyKind::Press, 66, Some('b'), 300.0).is_err());
    }

    #[test]
    fn test_suspend_and_resume() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());

        let mut context = CaptureContext::new(PipelineConfig::default());
        let id = context.start_session("example.org", 0.0).unwrap();
        let keys = context.tap(CaptureSource::KeyListener);
        keys.key(KeyKind::Press, 65, Some('a'), 10.0).unwrap();
        keys.key(KeyKind::Press, 66, Some('b'), 200.0).unwrap();

        assert_eq!(context.suspend(&store).unwrap(), id);
        assert!(context.aggregate().is_none());

        let mut resumed = CaptureContext::new(PipelineConfig::default());
        assert_eq!(resumed.resume(&store, id).unwrap(), id);
        let aggregate = resumed.aggregate().unwrap();
        assert_eq!(aggregate.ledger().typed, 2);
        assert_eq!(aggregate.buffer().len(), 2);
        assert!(store.list().unwrap().is_empty());
    }
}
