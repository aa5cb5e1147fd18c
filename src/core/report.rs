//! Typing report construction.
//!
//! A report carries the session metrics, the verdict, timing histograms and
//! the SHA-256 of the produced text. It leaves this module unsigned; the
//! signing module fills in [`ReportSignature`].

use crate::core::classifier::ClassificationResult;
use crate::core::features::{FeatureSet, TimingHistograms};
use crate::session::ledger::CharacterLedger;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// The current report format version.
pub const REPORT_VERSION: &str = "1.0";

/// The name of this producer.
pub const PRODUCER_NAME: &str = "humansign-agent";

/// Session metrics covered by the signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetrics {
    pub keystrokes: u64,
    pub dwell_avg: f64,
    pub flight_avg: f64,
    pub wpm: f64,
    /// Characters in the final text
    pub text_length: u64,
    pub ledger: CharacterLedger,
}

/// Detached signature material embedded in a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSignature {
    pub algorithm: String,
    /// Base64 SEC1 public key
    pub public_key: String,
    /// Base64 signature bytes
    pub value: String,
    pub signed_at: DateTime<Utc>,
}

/// The exported report. Immutable once signed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedReport {
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub session_id: Uuid,
    pub metrics: ReportMetrics,
    pub classification: ClassificationResult,
    pub timing_histograms: TimingHistograms,
    /// Lowercase hex SHA-256 of the text bytes
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<ReportSignature>,
}

impl SignedReport {
    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Hex SHA-256 of raw text bytes.
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Builder for unsigned reports.
#[derive(Debug, Clone, Default)]
pub struct ReportBuilder {
    generated_at: Option<DateTime<Utc>>,
}

impl ReportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the generation time (reports are otherwise stamped with now).
    pub fn generated_at(mut self, at: DateTime<Utc>) -> Self {
        self.generated_at = Some(at);
        self
    }

    pub fn build(
        &self,
        session_id: Uuid,
        features: &FeatureSet,
        ledger: &CharacterLedger,
        classification: &ClassificationResult,
        text: &str,
    ) -> SignedReport {
        SignedReport {
            version: REPORT_VERSION.to_string(),
            generated_at: self.generated_at.unwrap_or_else(Utc::now),
            session_id,
            metrics: ReportMetrics {
                keystrokes: features.keystrokes as u64,
                dwell_avg: features.dwell_avg,
                flight_avg: features.flight_avg,
                wpm: features.wpm,
                text_length: text.chars().count() as u64,
                ledger: *ledger,
            },
            classification: classification.clone(),
            timing_histograms: features.histograms(),
            content_hash: content_hash(text),
            signature: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::{ClassifierInput, HybridClassifier};

    #[test]
    fn test_content_hash() {
        assert_eq!(
            content_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_build_report() {
        let ledger = CharacterLedger {
            typed: 30,
            pasted: 0,
            assistant: 0,
        };
        let features = FeatureSet::default();
        let classification = HybridClassifier::default()
            .classify(&ClassifierInput::from_ledger(&ledger, &features.burst));
        let session_id = Uuid::new_v4();

        let report = ReportBuilder::new().build(session_id, &features, &ledger, &classification, "héllo");

        assert_eq!(report.version, REPORT_VERSION);
        assert_eq!(report.session_id, session_id);
        assert_eq!(report.metrics.text_length, 5);
        assert_eq!(report.timing_histograms.dwell.len(), 10);
        assert!(!report.is_signed());

        let json = report.to_json().unwrap();
        assert!(!json.contains("\"signature\""));
        let parsed = SignedReport::from_json(&json).unwrap();
        assert_eq!(parsed, report);
    }
}
