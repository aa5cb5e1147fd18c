//! Exclusive per-session character counters.

use crate::collector::types::{CapturedEvent, InputCategory};
use serde::{Deserialize, Serialize};

/// Typed vs pasted vs assistant-inserted character counts.
///
/// The three counters are mutually exclusive and only ever grow. Every
/// accepted event lands in at most one of them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterLedger {
    pub typed: u64,
    pub pasted: u64,
    pub assistant: u64,
}

/// Share of each category in the classified total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeRatios {
    pub human: f64,
    pub paste: f64,
    pub assistant: f64,
}

impl CharacterLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an accepted event. Returns the category it was counted under.
    pub fn apply(&mut self, event: &CapturedEvent) -> InputCategory {
        let category = event.category();
        let chars = event.char_count();
        match category {
            InputCategory::Typed => self.typed += chars,
            InputCategory::Pasted => self.pasted += chars,
            InputCategory::Assistant => self.assistant += chars,
            InputCategory::Untracked => {}
        }
        category
    }

    /// Total classified characters.
    pub fn total(&self) -> u64 {
        self.typed + self.pasted + self.assistant
    }

    pub fn ratios(&self) -> VolumeRatios {
        let total = self.total();
        if total == 0 {
            return VolumeRatios::default();
        }
        let total = total as f64;
        VolumeRatios {
            human: self.typed as f64 / total,
            paste: self.pasted as f64 / total,
            assistant: self.assistant as f64 / total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::types::{AssistantInsertion, KeystrokeEvent, PasteEvent};

    #[test]
    fn test_each_event_counts_once() {
        let mut ledger = CharacterLedger::new();
        let events = vec![
            CapturedEvent::Keystroke(KeystrokeEvent::press(72, Some('h'), 0.0)),
            CapturedEvent::Keystroke(KeystrokeEvent::release(72, 80.0)),
            CapturedEvent::Keystroke(KeystrokeEvent::press(16, None, 100.0)),
            CapturedEvent::Paste(PasteEvent {
                length: 12,
                timestamp: 200.0,
            }),
            CapturedEvent::Assistant(AssistantInsertion {
                length: 5,
                timestamp: 900.0,
            }),
        ];

        let mut expected_total = 0;
        for event in &events {
            ledger.apply(event);
            expected_total += event.char_count();
            assert_eq!(ledger.typed + ledger.pasted + ledger.assistant, expected_total);
        }

        assert_eq!(ledger.typed, 1);
        assert_eq!(ledger.pasted, 12);
        assert_eq!(ledger.assistant, 5);
        assert_eq!(ledger.total(), 18);
    }

    #[test]
    fn test_ratios() {
        let ledger = CharacterLedger {
            typed: 91,
            pasted: 0,
            assistant: 9,
        };
        let ratios = ledger.ratios();
        assert!((ratios.human - 0.91).abs() < 1e-12);
        assert!((ratios.assistant - 0.09).abs() < 1e-12);
        assert_eq!(ratios.paste, 0.0);
    }

    #[test]
    fn test_empty_ratios() {
        assert_eq!(CharacterLedger::new().ratios(), VolumeRatios::default());
    }
}
