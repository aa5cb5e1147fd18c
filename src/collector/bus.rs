//! Tagged-variant event bus.
//!
//! Every capture strategy gets its own [`CaptureTap`]. All taps feed one
//! bounded channel, so the dedup filter and ledger see a single ordered
//! stream no matter how many listeners are active.

use crate::collector::filter::CaptureError;
use crate::collector::types::{CaptureSource, KeyKind, RawEvent, RawPayload};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default channel capacity.
pub const DEFAULT_BUS_CAPACITY: usize = 10_000;

/// The receiving end of all capture strategies.
pub struct EventBus {
    sender: Sender<RawEvent>,
    receiver: Receiver<RawEvent>,
    open: Arc<AtomicBool>,
}

impl EventBus {
    /// Create a new bus with a bounded channel to prevent unbounded memory growth.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Hand out a tap for one capture strategy.
    pub fn tap(&self, source: CaptureSource) -> CaptureTap {
        CaptureTap {
            source,
            sender: self.sender.clone(),
            open: self.open.clone(),
        }
    }

    /// Stop accepting events from taps.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    /// Re-open the bus for a new recording.
    pub fn reopen(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Take everything currently queued without blocking.
    pub fn drain(&self) -> Vec<RawEvent> {
        self.receiver.try_iter().collect()
    }

    /// Wait up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<RawEvent> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Number of events waiting to be drained.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

/// Sending handle owned by one capture strategy.
#[derive(Clone)]
pub struct CaptureTap {
    source: CaptureSource,
    sender: Sender<RawEvent>,
    open: Arc<AtomicBool>,
}

impl CaptureTap {
    pub fn source(&self) -> CaptureSource {
        self.source
    }

    /// Send a payload tagged with this tap's source.
    pub fn send(&self, payload: RawPayload) -> Result<(), CaptureError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(CaptureError::BusClosed);
        }
        self.sender
            .try_send(RawEvent::new(self.source, payload))
            .map_err(|_| CaptureError::BusClosed)
    }

    pub fn key(&self, kind: KeyKind, code: u32, char: Option<char>, timestamp: f64) -> Result<(), CaptureError> {
        self.send(RawPayload::Key {
            kind,
            code,
            char,
            timestamp,
            trusted: true,
        })
    }

    pub fn input(&self, inserted: u32, timestamp: f64) -> Result<(), CaptureError> {
        self.send(RawPayload::Input {
            inserted,
            timestamp,
        })
    }

    pub fn paste(&self, length: u32, timestamp: f64) -> Result<(), CaptureError> {
        self.send(RawPayload::Paste { length, timestamp })
    }
}
