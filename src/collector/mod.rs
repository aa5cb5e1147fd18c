//! Event capture for the HumanSign agent.
//!
//! This module normalizes raw press/release/paste/insertion events arriving
//! from several redundant listener paths into one duplicate-free stream.

pub mod bus;
pub mod filter;
pub mod types;

// Re-export commonly used types
pub use bus::{CaptureTap, EventBus};
pub use filter::{CaptureError, CaptureFilter, FilterConfig, FilterStats, SubmitOutcome};
pub use types::{
    AssistantInsertion, CaptureSource, CapturedEvent, InputCategory, InputChange, KeyKind,
    KeystrokeEvent, Origin, PasteEvent, RawEvent, RawPayload,
};
