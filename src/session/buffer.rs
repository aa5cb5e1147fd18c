//! Batching of accepted events for shipment to the aggregate.
//!
//! Events accumulate until either the size threshold or the time threshold is
//! reached. A batch that fails to deliver goes back to the front of the
//! buffer and is retried later under the same sequence number, so the
//! receiving side can apply it idempotently.

use crate::collector::types::CapturedEvent;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;
use uuid::Uuid;

/// When to cut a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlushPolicy {
    /// Flush as soon as this many events are buffered
    pub max_events: usize,
    /// Flush when this long has passed since the last flush
    pub interval_ms: f64,
    /// Do not ship fewer events than this unless forced
    pub min_events: usize,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            max_events: 100,
            interval_ms: 500.0,
            min_events: 10,
        }
    }
}

/// One shipment of events, as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBatch {
    pub session_id: Uuid,
    pub batch_sequence: u64,
    pub events: Vec<CapturedEvent>,
}

/// Failure to move a batch (or a verify request) to the other side.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),
    #[error("request timed out")]
    Timeout,
    #[error("remote returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("remote rejected batch {0}")]
    Rejected(u64),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[cfg(feature = "gateway")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Anything that can receive a batch.
pub trait BatchSink {
    fn send_batch(&mut self, batch: &EventBatch) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct SequencedEvents {
    pub sequence: u64,
    pub events: Vec<CapturedEvent>,
}

/// Buffered events plus the single batch that may be in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchBuffer {
    policy: FlushPolicy,
    /// A batch that failed and must go out again before anything newer
    retry: Option<SequencedEvents>,
    pending: VecDeque<CapturedEvent>,
    in_flight: Option<SequencedEvents>,
    next_sequence: u64,
    last_flush_ms: f64,
}

impl BatchBuffer {
    pub fn new(policy: FlushPolicy) -> Self {
        Self {
            policy,
            retry: None,
            pending: VecDeque::new(),
            in_flight: None,
            next_sequence: 1,
            last_flush_ms: 0.0,
        }
    }

    pub fn policy(&self) -> &FlushPolicy {
        &self.policy
    }

    /// Drop everything and restart the flush clock.
    pub fn reset(&mut self, now_ms: f64) {
        *self = Self::new(self.policy.clone());
        self.last_flush_ms = now_ms;
    }

    pub fn push(&mut self, event: CapturedEvent) {
        self.pending.push_back(event);
    }

    /// Events not yet handed to a sink (including a batch awaiting retry).
    pub fn len(&self) -> usize {
        self.pending.len() + self.retry.as_ref().map_or(0, |r| r.events.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when nothing is buffered or in flight.
    pub fn is_drained(&self) -> bool {
        self.is_empty() && self.in_flight.is_none()
    }

    pub fn in_flight_sequence(&self) -> Option<u64> {
        self.in_flight.as_ref().map(|b| b.sequence)
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Every event not yet acknowledged, in send order.
    pub fn unacknowledged(&self) -> impl Iterator<Item = &CapturedEvent> {
        self.in_flight
            .iter()
            .chain(self.retry.iter())
            .flat_map(|b| b.events.iter())
            .chain(self.pending.iter())
    }

    pub fn is_flush_due(&self, now_ms: f64) -> bool {
        if self.in_flight.is_some() {
            return false;
        }
        let elapsed = now_ms - self.last_flush_ms;
        if self.retry.is_some() {
            return elapsed >= self.policy.interval_ms;
        }
        self.pending.len() >= self.policy.max_events
            || (elapsed >= self.policy.interval_ms && self.pending.len() >= self.policy.min_events)
    }

    /// Cut the next batch if the policy (or `force`) allows it.
    ///
    /// Only one batch is in flight at a time; new events keep buffering
    /// behind it.
    pub(crate) fn take_batch(&mut self, now_ms: f64, force: bool) -> Option<SequencedEvents> {
        if self.in_flight.is_some() {
            return None;
        }
        let batch = if let Some(retry) = self.retry.take() {
            if !force && now_ms - self.last_flush_ms < self.policy.interval_ms {
                self.retry = Some(retry);
                return None;
            }
            retry
        } else {
            if self.pending.is_empty() || (!force && !self.is_flush_due(now_ms)) {
                return None;
            }
            let count = self.pending.len().min(self.policy.max_events);
            let batch = SequencedEvents {
                sequence: self.next_sequence,
                events: self.pending.drain(..count).collect(),
            };
            self.next_sequence += 1;
            batch
        };
        self.last_flush_ms = now_ms;
        self.in_flight = Some(batch.clone());
        Some(batch)
    }

    /// Settle the in-flight batch. Returns false when `sequence` is not the
    /// batch in flight.
    pub(crate) fn complete(&mut self, sequence: u64, delivered: bool) -> bool {
        match self.in_flight.take() {
            Some(batch) if batch.sequence == sequence => {
                if !delivered {
                    self.retry = Some(batch);
                }
                true
            }
            other => {
                self.in_flight = other;
                false
            }
        }
    }

    /// Put an in-flight batch back in line. Used after a restore, where the
    /// outcome of the interrupted send is unknown.
    pub(crate) fn requeue_in_flight(&mut self) {
        if let Some(batch) = self.in_flight.take() {
            self.retry = Some(batch);
        }
    }
}
