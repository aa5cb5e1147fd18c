//! Report verification.
//!
//! Stateless: everything needed is in the report itself, plus optionally the
//! text artifact that travelled with it. The signature check and the content
//! check are reported separately and never folded into one flag.

use crate::core::report::{content_hash, SignedReport};
use crate::signing::keys::decode_public_key;
use crate::signing::signer::{canonical_payload, SIGNATURE_ALGORITHM};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use p256::ecdsa::{signature::Verifier, Signature, VerifyingKey};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SignatureStatus {
    Valid,
    Invalid { reason: String },
    /// The report carries no signature block
    NotPresent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ContentStatus {
    Match,
    /// The text was altered after signing
    Mismatch { expected: String, actual: String },
    NotChecked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub signature: SignatureStatus,
    pub content: ContentStatus,
}

impl VerificationReport {
    /// Signature valid and no evidence of content tampering.
    pub fn is_trusted(&self) -> bool {
        self.signature == SignatureStatus::Valid && !self.is_tampered()
    }

    pub fn is_tampered(&self) -> bool {
        matches!(self.content, ContentStatus::Mismatch { .. })
    }
}

/// Verify against the public key embedded in the report.
pub fn verify_report(report: &SignedReport, text: Option<&str>) -> VerificationReport {
    VerificationReport {
        signature: verify_signature(report, None),
        content: check_content(report, text),
    }
}

/// Verify against a detached public key. The embedded key is ignored.
pub fn verify_report_with_key(
    report: &SignedReport,
    key: &VerifyingKey,
    text: Option<&str>,
) -> VerificationReport {
    VerificationReport {
        signature: verify_signature(report, Some(key)),
        content: check_content(report, text),
    }
}

pub fn verify_signature(report: &SignedReport, pinned: Option<&VerifyingKey>) -> SignatureStatus {
    let Some(block) = &report.signature else {
        return SignatureStatus::NotPresent;
    };
    if block.public_key.is_empty() || block.value.is_empty() {
        return SignatureStatus::NotPresent;
    }
    match check(report, block.algorithm.as_str(), &block.public_key, &block.value, pinned) {
        Ok(()) => SignatureStatus::Valid,
        Err(reason) => {
            tracing::warn!(session = %report.session_id, "signature invalid: {reason}");
            SignatureStatus::Invalid { reason }
        }
    }
}

fn check(
    report: &SignedReport,
    algorithm: &str,
    public_key: &str,
    value: &str,
    pinned: Option<&VerifyingKey>,
) -> Result<(), String> {
    if algorithm != SIGNATURE_ALGORITHM {
        return Err(format!("unsupported algorithm {algorithm}"));
    }
    let embedded;
    let key = match pinned {
        Some(key) => key,
        None => {
            embedded = decode_public_key(public_key).map_err(|e| e.to_string())?;
            &embedded
        }
    };
    let bytes = STANDARD
        .decode(value)
        .map_err(|e| format!("signature encoding: {e}"))?;
    let signature = Signature::from_slice(&bytes).map_err(|e| format!("signature bytes: {e}"))?;
    let payload = canonical_payload(report).map_err(|e| format!("canonicalization: {e}"))?;
    key.verify(&payload, &signature)
        .map_err(|_| "signature does not match report contents".to_string())
}

fn check_content(report: &SignedReport, text: Option<&str>) -> ContentStatus {
    let Some(text) = text else {
        return ContentStatus::NotChecked;
    };
    let actual = content_hash(text);
    if actual == report.content_hash {
        ContentStatus::Match
    } else {
        ContentStatus::Mismatch {
            expected: report.content_hash.clone(),
            actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::{ClassifierInput, HybridClassifier};
    use crate::core::features::FeatureSet;
    use crate::core::report::ReportBuilder;
    use crate::session::ledger::CharacterLedger;
    use crate::signing::keys::SigningIdentity;
    use crate::signing::signer::ReportSigner;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    const TEXT: &str = "The quick brown fox jumps over the lazy dog.";

    fn signed() -> (SignedReport, SigningIdentity) {
        let ledger = CharacterLedger {
            typed: 44,
            pasted: 0,
            assistant: 0,
        };
        let features = FeatureSet::default();
        let result = HybridClassifier::default().classify(&ClassifierInput::from_ledger(&ledger, &features.burst));
        let report = ReportBuilder::new().build(Uuid::new_v4(), &features, &ledger, &result, TEXT);
        let identity = SigningIdentity::generate();
        let signed = ReportSigner::new(identity.clone()).sign(report).unwrap();
        (signed, identity)
    }

    #[test]
    fn test_round_trip_is_valid() {
        let (report, _) = signed();
        let json = report.to_json().unwrap();
        let parsed = SignedReport::from_json(&json).unwrap();
        assert_eq!(
            verify_report(&parsed, Some(TEXT)),
            VerificationReport {
                signature: SignatureStatus::Valid,
                content: ContentStatus::Match,
            }
        );
    }

    #[test]
    fn test_single_byte_change_in_hash_is_invalid() {
        let (mut report, _) = signed();
        let mut bytes = report.content_hash.into_bytes();
        bytes[0] = if bytes[0] == b'0' { b'1' } else { b'0' };
        report.content_hash = String::from_utf8(bytes).unwrap();

        let result = verify_report(&report, None);
        assert!(matches!(result.signature, SignatureStatus::Invalid { .. }));
        assert_eq!(result.content, ContentStatus::NotChecked);
    }

    #[test]
    fn test_metrics_change_is_invalid() {
        let (mut report, _) = signed();
        report.metrics.ledger.pasted += 1;
        assert!(matches!(
            verify_signature(&report, None),
            SignatureStatus::Invalid { .. }
        ));
    }

    #[test]
    fn test_missing_signature_is_not_valid() {
        let (mut report, _) = signed();
        report.signature = None;
        let result = verify_report(&report, Some(TEXT));
        assert_eq!(result.signature, SignatureStatus::NotPresent);
        assert!(!result.is_trusted());
    }

    #[test]
    fn test_tampered_text_reported_separately() {
        let (report, _) = signed();
        let result = verify_report(&report, Some("The quick brown fox jumps over the lazy cat."));
        assert_eq!(result.signature, SignatureStatus::Valid);
        assert!(result.is_tampered());
        assert!(!result.is_trusted());
    }

    #[test]
    fn test_malformed_material_is_invalid_not_panic() {
        let (mut report, _) = signed();
        if let Some(block) = report.signature.as_mut() {
            block.value = "@@@".to_string();
        }
        assert!(matches!(
            verify_signature(&report, None),
            SignatureStatus::Invalid { .. }
        ));

        let (mut report, _) = signed();
        if let Some(block) = report.signature.as_mut() {
            block.public_key = STANDARD.encode([4u8; 10]);
        }
        assert!(matches!(
            verify_signature(&report, None),
            SignatureStatus::Invalid { .. }
        ));
    }

    #[test]
    fn test_detached_key() {
        let (report, identity) = signed();
        assert!(verify_report_with_key(&report, identity.verifying_key(), None)
            .signature
            .eq(&SignatureStatus::Valid));

        let other = SigningIdentity::generate();
        assert!(matches!(
            verify_report_with_key(&report, other.verifying_key(), None).signature,
            SignatureStatus::Invalid { .. }
        ));
    }
}
