//! HumanSign agent - keystroke-dynamics capture, classification and signed
//! typing reports.
//!
//! The agent judges *how* text was produced, not what it says: it counts
//! typed, pasted and assistant-inserted characters, derives dwell/flight
//! timing from key events, combines volume, burst and model signals into
//! one verdict, and signs a report that binds the verdict to a hash of the
//! final text.
//!
//! # Privacy Guarantees
//!
//! - **No text in reports**: only a SHA-256 of the final text is signed
//! - **Counts, not content**: paste and assistant events carry lengths only
//! - **Local keys**: the signing key never leaves the machine
//! - **Transparency**: every accepted, dropped and shipped event is counted
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        HumanSign Agent                         │
//! ├───────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐   ┌────────────┐   ┌────────────┐              │
//! │  │ Capture    │──▶│ Session    │──▶│ Features   │              │
//! │  │ taps + bus │   │ aggregate  │   │ + cascade  │              │
//! │  └────────────┘   └────────────┘   └────────────┘              │
//! │        │                │                 │                    │
//! │        ▼                ▼                 ▼                    │
//! │  ┌────────────┐   ┌────────────┐   ┌────────────┐              │
//! │  │Transparency│   │ Batches to │   │  Signed    │              │
//! │  │    Log     │   │ aggregate  │   │  report    │              │
//! │  └────────────┘   └────────────┘   └────────────┘              │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use humansign_agent::collector::{CaptureSource, KeyKind};
//! use humansign_agent::core::NoModel;
//! use humansign_agent::session::{CaptureContext, DiscardSink, PipelineConfig};
//!
//! let mut context = CaptureContext::new(PipelineConfig::default());
//! context.start_session("docs.example.com", 0.0).unwrap();
//!
//! let keys = context.tap(CaptureSource::KeyListener);
//! keys.key(KeyKind::Press, 72, Some('h'), 10.0).unwrap();
//! keys.key(KeyKind::Release, 72, None, 95.0).unwrap();
//!
//! context.stop(&mut DiscardSink, 200.0).unwrap();
//! let result = context.aggregate_mut().unwrap().classify(&NoModel);
//! println!("{}", result.verdict);
//! ```

pub mod collector;
pub mod config;
pub mod core;
pub mod protocol;
pub mod service;
pub mod session;
pub mod signing;
pub mod transparency;

#[cfg(feature = "gateway")]
pub mod gateway;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use collector::{CaptureError, CaptureSource, CaptureTap, RawEvent, SubmitOutcome};
pub use config::{Config, ConfigError};
pub use core::{ClassificationResult, FeatureSet, Predictor, SignedReport, Verdict};
pub use service::{ServiceError, SessionService};
pub use session::{CaptureContext, PipelineConfig, SessionAggregate, SessionError, TransportError};
pub use signing::{verify_report, KeyStore, ReportSigner, VerificationReport};
pub use transparency::{SharedTransparencyLog, TransparencyLog, TransparencyStats};

// Gateway re-exports (when enabled)
#[cfg(feature = "gateway")]
pub use gateway::{BlockingGatewayClient, GatewayClient, GatewayConfig, VerdictSource};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
