//! Duplicate suppression across overlapping capture strategies.
//!
//! Several listeners observe the same physical action (a key listener and an
//! input-change listener both see a typed letter; a paste listener and a
//! mutation observer both see a paste). The filter sits in front of the
//! single ledger mutator and lets exactly one logical event through per
//! physical action.

use crate::collector::types::{
    AssistantInsertion, CaptureSource, CapturedEvent, InputChange, KeyKind, KeystrokeEvent, Origin,
    PasteEvent, RawEvent, RawPayload,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

/// Upper bound on remembered dedup keys. Far more than can fit in one window.
const RECENT_CAPACITY: usize = 256;

/// Tunables for the capture filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Two events of the same kind and code closer than this are one action
    pub dedup_window_ms: f64,
    /// Input-change events are side effects for this long after a paste or
    /// assistant insertion
    pub ignore_window_ms: f64,
    /// Events older than the newest accepted one by more than this are rejected
    pub max_skew_ms: f64,
    /// Whether the host application's suggestion channel is wired up at all
    pub trusted_assistant_channel: bool,
    /// Shared secret the suggestion channel must present, if configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_token: Option<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            dedup_window_ms: 100.0,
            ignore_window_ms: 300.0,
            max_skew_ms: 1000.0,
            trusted_assistant_channel: true,
            assistant_token: None,
        }
    }
}

/// Why a raw event could not be turned into a logical event.
///
/// These are never fatal: the event is dropped and logged.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CaptureError {
    #[error("malformed event: {0}")]
    Malformed(String),
    #[error("timestamp {timestamp:.3}ms is {skew_ms:.3}ms behind the newest accepted event")]
    ClockSkew { timestamp: f64, skew_ms: f64 },
    #[error("assistant insertion from untrusted source {0:?}")]
    UntrustedAssistantSignal(CaptureSource),
    #[error("assistant channel unavailable")]
    ChannelUnavailable,
    #[error("ambiguous {inserted}-character insertion from {channel:?}")]
    AmbiguousInsertion {
        channel: CaptureSource,
        inserted: u32,
    },
    #[error("capture bus is closed")]
    BusClosed,
}

/// Result of submitting one raw event.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// First sighting of a physical action
    Accepted(CapturedEvent),
    /// Another strategy already reported this action
    Duplicate,
    /// Expected side effect of an already-recorded paste or insertion
    Suppressed,
    /// Dropped; see the error for why
    Rejected(CaptureError),
}

impl SubmitOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmitOutcome::Accepted(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum DedupKind {
    Press,
    Release,
    Paste,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DedupKey {
    kind: DedupKind,
    code: u32,
    timestamp: f64,
}

/// Per-outcome counters kept by the filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterStats {
    pub accepted: u64,
    pub duplicates: u64,
    pub suppressed: u64,
    pub rejected: u64,
}

/// Stateful dedup/ignore-window filter.
///
/// The state is plain data so it can travel inside a session snapshot; a
/// restored filter keeps suppressing echoes of events accepted before the
/// suspension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureFilter {
    config: FilterConfig,
    recent: VecDeque<DedupKey>,
    ignore_until_ms: Option<f64>,
    last_char_press_ms: Option<f64>,
    /// Single-character input not yet matched by a key press
    #[serde(default)]
    last_char_input_ms: Option<f64>,
    newest_accepted_ms: Option<f64>,
    stats: FilterStats,
}

impl CaptureFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self {
            config,
            recent: VecDeque::new(),
            ignore_until_ms: None,
            last_char_press_ms: None,
            last_char_input_ms: None,
            newest_accepted_ms: None,
            stats: FilterStats::default(),
        }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn stats(&self) -> &FilterStats {
        &self.stats
    }

    /// Forget everything seen so far (new recording).
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }

    /// Submit one raw event.
    pub fn submit(&mut self, raw: &RawEvent) -> SubmitOutcome {
        let outcome = self.evaluate(raw);
        match &outcome {
            SubmitOutcome::Accepted(_) => self.stats.accepted += 1,
            SubmitOutcome::Duplicate => {
                tracing::debug!(source = ?raw.source, "duplicate event dropped");
                self.stats.duplicates += 1;
            }
            SubmitOutcome::Suppressed => {
                tracing::debug!(source = ?raw.source, "event suppressed by ignore window");
                self.stats.suppressed += 1;
            }
            SubmitOutcome::Rejected(e) => {
                tracing::warn!(source = ?raw.source, "capture error: {e}");
                self.stats.rejected += 1;
            }
        }
        outcome
    }

    /// Check an event that was already accepted by a filter on the capture
    /// side. Pastes and insertions are also reported on their own, so one
    /// seen both ways is let through only once. Returns `false` for a
    /// repeat.
    pub fn admit_forwarded(&mut self, event: &CapturedEvent) -> bool {
        let kind = match event {
            CapturedEvent::Paste(_) => DedupKind::Paste,
            CapturedEvent::Assistant(_) => DedupKind::Assistant,
            _ => return true,
        };
        let timestamp = event.timestamp();
        if self.is_duplicate(kind, 0, timestamp) {
            tracing::debug!(?kind, timestamp, "forwarded insertion already recorded");
            self.stats.duplicates += 1;
            return false;
        }
        self.remember(kind, 0, timestamp);
        true
    }

    fn evaluate(&mut self, raw: &RawEvent) -> SubmitOutcome {
        let timestamp = raw.timestamp();
        if let Err(e) = validate(&raw.payload) {
            return SubmitOutcome::Rejected(e);
        }

        if let Some(newest) = self.newest_accepted_ms {
            let skew_ms = newest - timestamp;
            if skew_ms > self.config.max_skew_ms {
                return SubmitOutcome::Rejected(CaptureError::ClockSkew { timestamp, skew_ms });
            }
        }

        match &raw.payload {
            RawPayload::Input { inserted, .. } => self.evaluate_input(raw.source, *inserted, timestamp),
            RawPayload::Key {
                kind,
                code,
                char,
                trusted,
                ..
            } => {
                let dedup_kind = match kind {
                    KeyKind::Press => DedupKind::Press,
                    KeyKind::Release => DedupKind::Release,
                };
                if self.is_duplicate(dedup_kind, *code, timestamp) {
                    return SubmitOutcome::Duplicate;
                }
                let mut event = KeystrokeEvent {
                    kind: *kind,
                    code: *code,
                    char: *char,
                    timestamp,
                    origin: if *trusted {
                        Origin::Genuine
                    } else {
                        Origin::Synthetic
                    },
                };
                if event.produces_char() {
                    if self.input_already_counted(timestamp) {
                        // The input listener fired first and already counted
                        // this character; keep the press for timing only.
                        event.char = None;
                        self.last_char_input_ms = None;
                    } else {
                        self.last_char_press_ms = Some(timestamp);
                    }
                }
                self.accept(dedup_kind, *code, CapturedEvent::Keystroke(event))
            }
            RawPayload::Paste { length, .. } => {
                if self.is_duplicate(DedupKind::Paste, 0, timestamp) {
                    return SubmitOutcome::Duplicate;
                }
                self.open_ignore_window(timestamp);
                self.accept(
                    DedupKind::Paste,
                    0,
                    CapturedEvent::Paste(PasteEvent {
                        length: *length,
                        timestamp,
                    }),
                )
            }
            RawPayload::Assistant { length, token, .. } => {
                if let Err(e) = self.authenticate_assistant(raw.source, token.as_deref()) {
                    return SubmitOutcome::Rejected(e);
                }
                if self.is_duplicate(DedupKind::Assistant, 0, timestamp) {
                    return SubmitOutcome::Duplicate;
                }
                self.open_ignore_window(timestamp);
                self.accept(
                    DedupKind::Assistant,
                    0,
                    CapturedEvent::Assistant(AssistantInsertion {
                        length: *length,
                        timestamp,
                    }),
                )
            }
        }
    }

    fn evaluate_input(&mut self, source: CaptureSource, inserted: u32, timestamp: f64) -> SubmitOutcome {
        if self.in_ignore_window(timestamp) {
            return SubmitOutcome::Suppressed;
        }
        if let Some(press) = self.last_char_press_ms {
            if (timestamp - press).abs() <= self.config.dedup_window_ms {
                return SubmitOutcome::Duplicate;
            }
        }
        if source == CaptureSource::MutationObserver {
            return SubmitOutcome::Rejected(CaptureError::AmbiguousInsertion {
                channel: source,
                inserted,
            });
        }
        match inserted {
            0 => SubmitOutcome::Suppressed,
            1 => {
                self.last_char_input_ms = Some(timestamp);
                self.note_accepted(timestamp);
                SubmitOutcome::Accepted(CapturedEvent::Input(InputChange {
                    inserted,
                    timestamp,
                }))
            }
            _ => SubmitOutcome::Rejected(CaptureError::AmbiguousInsertion {
                channel: source,
                inserted,
            }),
        }
    }

    fn authenticate_assistant(
        &self,
        source: CaptureSource,
        token: Option<&str>,
    ) -> Result<(), CaptureError> {
        if source != CaptureSource::AssistantChannel {
            return Err(CaptureError::UntrustedAssistantSignal(source));
        }
        if !self.config.trusted_assistant_channel {
            return Err(CaptureError::ChannelUnavailable);
        }
        match (&self.config.assistant_token, token) {
            (None, _) => Ok(()),
            (Some(expected), Some(given)) if expected == given => Ok(()),
            _ => Err(CaptureError::UntrustedAssistantSignal(source)),
        }
    }

    fn is_duplicate(&self, kind: DedupKind, code: u32, timestamp: f64) -> bool {
        self.recent.iter().any(|key| {
            key.kind == kind
                && key.code == code
                && (timestamp - key.timestamp).abs() <= self.config.dedup_window_ms
        })
    }

    fn input_already_counted(&self, timestamp: f64) -> bool {
        self.last_char_input_ms
            .is_some_and(|input| (timestamp - input).abs() <= self.config.dedup_window_ms)
    }

    fn in_ignore_window(&self, timestamp: f64) -> bool {
        self.ignore_until_ms.is_some_and(|until| timestamp <= until)
    }

    fn open_ignore_window(&mut self, timestamp: f64) {
        let until = timestamp + self.config.ignore_window_ms;
        self.ignore_until_ms = Some(self.ignore_until_ms.map_or(until, |current| current.max(until)));
    }

    fn accept(&mut self, kind: DedupKind, code: u32, event: CapturedEvent) -> SubmitOutcome {
        let timestamp = event.timestamp();
        self.remember(kind, code, timestamp);
        self.note_accepted(timestamp);
        SubmitOutcome::Accepted(event)
    }

    fn remember(&mut self, kind: DedupKind, code: u32, timestamp: f64) {
        self.recent.push_back(DedupKey {
            kind,
            code,
            timestamp,
        });
        while self.recent.len() > RECENT_CAPACITY {
            self.recent.pop_front();
        }
    }

    fn note_accepted(&mut self, timestamp: f64) {
        self.newest_accepted_ms = Some(
            self.newest_accepted_ms
                .map_or(timestamp, |newest| newest.max(timestamp)),
        );
        // Keys older than the dedup horizon can never match again.
        let horizon = self.newest_accepted_ms.unwrap_or(timestamp)
            - self.config.dedup_window_ms
            - self.config.max_skew_ms;
        while self.recent.front().is_some_and(|k| k.timestamp < horizon) {
            self.recent.pop_front();
        }
    }
}

fn validate(payload: &RawPayload) -> Result<(), CaptureError> {
    let timestamp = payload.timestamp();
    if !timestamp.is_finite() || timestamp < 0.0 {
        return Err(CaptureError::Malformed(format!(
            "invalid timestamp {timestamp}"
        )));
    }
    match payload {
        RawPayload::Paste { length: 0, .. } => {
            Err(CaptureError::Malformed("empty paste".to_string()))
        }
        RawPayload::Assistant { length: 0, .. } => {
            Err(CaptureError::Malformed("empty assistant insertion".to_string()))
        }
        _ => Ok(()),
    }
}
