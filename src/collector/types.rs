//! Event types for keystroke-dynamics capture.
//!
//! Raw events arrive from several overlapping capture strategies and carry the
//! strategy that produced them. Accepted events are normalized into
//! [`CapturedEvent`], which is what the session aggregate stores and ships.
//!
//! Timestamps are monotonic milliseconds (sub-millisecond precision) on the
//! capture clock, not wall-clock time.

use serde::{Deserialize, Serialize};

/// Whether a key went down or came up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    Press,
    Release,
}

/// Whether an event came from a physical input device or was manufactured by
/// script. Synthetic events stay distinguishable all the way downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    #[default]
    Genuine,
    Synthetic,
}

/// A single key press or release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeystrokeEvent {
    pub kind: KeyKind,
    /// Platform key code (0 when unknown)
    pub code: u32,
    /// Glyph produced by the key, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub char: Option<char>,
    /// Capture-clock timestamp in milliseconds
    pub timestamp: f64,
    #[serde(default)]
    pub origin: Origin,
}

impl KeystrokeEvent {
    pub fn press(code: u32, char: Option<char>, timestamp: f64) -> Self {
        Self {
            kind: KeyKind::Press,
            code,
            char,
            timestamp,
            origin: Origin::Genuine,
        }
    }

    pub fn release(code: u32, timestamp: f64) -> Self {
        Self {
            kind: KeyKind::Release,
            code,
            char: None,
            timestamp,
            origin: Origin::Genuine,
        }
    }

    /// Mark the event as script-generated.
    pub fn synthetic(mut self) -> Self {
        self.origin = Origin::Synthetic;
        self
    }

    pub fn is_genuine(&self) -> bool {
        self.origin == Origin::Genuine
    }

    /// A genuine press that produced a visible glyph.
    pub fn produces_char(&self) -> bool {
        self.kind == KeyKind::Press && self.is_genuine() && self.char.is_some_and(|c| !c.is_control())
    }
}

/// One explicit clipboard insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PasteEvent {
    /// Number of characters inserted
    pub length: u32,
    pub timestamp: f64,
}

/// One accepted suggestion reported by the host application's trusted channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantInsertion {
    pub length: u32,
    pub timestamp: f64,
}

/// Characters that reached the document through an input-change listener
/// without a matching key event (IME commits, on-screen keyboards).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputChange {
    pub inserted: u32,
    pub timestamp: f64,
}

/// Which capture strategy produced a raw event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureSource {
    /// Direct key listeners
    KeyListener,
    /// Input-change listeners on the editable surface
    InputChange,
    /// Clipboard paste listeners
    PasteListener,
    /// DOM-mutation observers
    MutationObserver,
    /// The authenticated in-page signal for accepted suggestions
    AssistantChannel,
}

/// Payload of a raw event before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawPayload {
    Key {
        kind: KeyKind,
        code: u32,
        #[serde(default)]
        char: Option<char>,
        timestamp: f64,
        /// False when the platform flags the event as script-dispatched
        #[serde(default = "default_trusted")]
        trusted: bool,
    },
    Input {
        inserted: u32,
        timestamp: f64,
    },
    Paste {
        length: u32,
        timestamp: f64,
    },
    Assistant {
        length: u32,
        timestamp: f64,
        #[serde(default)]
        token: Option<String>,
    },
}

fn default_trusted() -> bool {
    true
}

impl RawPayload {
    pub fn timestamp(&self) -> f64 {
        match self {
            RawPayload::Key { timestamp, .. }
            | RawPayload::Input { timestamp, .. }
            | RawPayload::Paste { timestamp, .. }
            | RawPayload::Assistant { timestamp, .. } => *timestamp,
        }
    }
}

/// An event as delivered by one capture strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub source: CaptureSource,
    #[serde(flatten)]
    pub payload: RawPayload,
}

impl RawEvent {
    pub fn new(source: CaptureSource, payload: RawPayload) -> Self {
        Self { source, payload }
    }

    pub fn key_press(code: u32, char: Option<char>, timestamp: f64) -> Self {
        Self::new(
            CaptureSource::KeyListener,
            RawPayload::Key {
                kind: KeyKind::Press,
                code,
                char,
                timestamp,
                trusted: true,
            },
        )
    }

    pub fn key_release(code: u32, timestamp: f64) -> Self {
        Self::new(
            CaptureSource::KeyListener,
            RawPayload::Key {
                kind: KeyKind::Release,
                code,
                char: None,
                timestamp,
                trusted: true,
            },
        )
    }

    pub fn paste(length: u32, timestamp: f64) -> Self {
        Self::new(
            CaptureSource::PasteListener,
            RawPayload::Paste { length, timestamp },
        )
    }

    pub fn assistant(length: u32, timestamp: f64, token: Option<String>) -> Self {
        Self::new(
            CaptureSource::AssistantChannel,
            RawPayload::Assistant {
                length,
                timestamp,
                token,
            },
        )
    }

    pub fn input_change(inserted: u32, timestamp: f64) -> Self {
        Self::new(
            CaptureSource::InputChange,
            RawPayload::Input {
                inserted,
                timestamp,
            },
        )
    }

    pub fn timestamp(&self) -> f64 {
        self.payload.timestamp()
    }
}

/// Ledger category of an accepted event. Each accepted event has exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputCategory {
    Typed,
    Pasted,
    Assistant,
    /// Releases, non-glyph keys and synthetic keys: timing only
    Untracked,
}

/// A normalized, accepted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CapturedEvent {
    Keystroke(KeystrokeEvent),
    Paste(PasteEvent),
    Assistant(AssistantInsertion),
    Input(InputChange),
}

impl CapturedEvent {
    pub fn timestamp(&self) -> f64 {
        match self {
            CapturedEvent::Keystroke(e) => e.timestamp,
            CapturedEvent::Paste(e) => e.timestamp,
            CapturedEvent::Assistant(e) => e.timestamp,
            CapturedEvent::Input(e) => e.timestamp,
        }
    }

    pub fn category(&self) -> InputCategory {
        match self {
            CapturedEvent::Keystroke(e) if e.produces_char() => InputCategory::Typed,
            CapturedEvent::Keystroke(_) => InputCategory::Untracked,
            CapturedEvent::Paste(_) => InputCategory::Pasted,
            CapturedEvent::Assistant(_) => InputCategory::Assistant,
            CapturedEvent::Input(_) => InputCategory::Typed,
        }
    }

    /// Number of characters this event contributes to its ledger category.
    pub fn char_count(&self) -> u64 {
        match self {
            CapturedEvent::Keystroke(e) if e.produces_char() => 1,
            CapturedEvent::Keystroke(_) => 0,
            CapturedEvent::Paste(e) => e.length as u64,
            CapturedEvent::Assistant(e) => e.length as u64,
            CapturedEvent::Input(e) => e.inserted as u64,
        }
    }

    pub fn as_keystroke(&self) -> Option<&KeystrokeEvent> {
        match self {
            CapturedEvent::Keystroke(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keystroke_categories() {
        let typed = CapturedEvent::Keystroke(KeystrokeEvent::press(65, Some('a'), 1.0));
        assert_eq!(typed.category(), InputCategory::Typed);
        assert_eq!(typed.char_count(), 1);

        let shift = CapturedEvent::Keystroke(KeystrokeEvent::press(16, None, 1.0));
        assert_eq!(shift.category(), InputCategory::Untracked);
        assert_eq!(shift.char_count(), 0);

        let release = CapturedEvent::Keystroke(KeystrokeEvent::release(65, 2.0));
        assert_eq!(release.category(), InputCategory::Untracked);

        let scripted =
            CapturedEvent::Keystroke(KeystrokeEvent::press(65, Some('a'), 3.0).synthetic());
        assert_eq!(scripted.category(), InputCategory::Untracked);
        assert_eq!(scripted.char_count(), 0);
    }

    #[test]
    fn test_insertion_categories() {
        let paste = CapturedEvent::Paste(PasteEvent {
            length: 42,
            timestamp: 5.0,
        });
        assert_eq!(paste.category(), InputCategory::Pasted);
        assert_eq!(paste.char_count(), 42);

        let suggestion = CapturedEvent::Assistant(AssistantInsertion {
            length: 7,
            timestamp: 6.0,
        });
        assert_eq!(suggestion.category(), InputCategory::Assistant);
        assert_eq!(suggestion.char_count(), 7);
    }

    #[test]
    fn test_raw_event_wire_format() {
        let json = r#"{"source":"key_listener","type":"key","kind":"press","code":72,"char":"h","timestamp":12.5}"#;
        let event: RawEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.source, CaptureSource::KeyListener);
        match event.payload {
            RawPayload::Key { trusted, char, .. } => {
                assert!(trusted);
                assert_eq!(char, Some('h'));
            }
            other => panic!("unexpected payload {other:?}"),
        }
        assert_eq!(event.timestamp(), 12.5);
    }

    #[test]
    fn test_control_glyph_is_not_typed() {
        let enter = KeystrokeEvent::press(13, Some('\n'), 1.0);
        assert!(!enter.produces_char());
    }
}
