//! Report signing.

use crate::core::report::{ReportSignature, SignedReport};
use crate::signing::keys::{encode_public_key, SigningIdentity};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use p256::ecdsa::{signature::Signer, Signature};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Algorithm identifier embedded in every signature block.
pub const SIGNATURE_ALGORITHM: &str = "ECDSA-P256-SHA256";

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("report {0} is already signed")]
    AlreadySigned(Uuid),
    #[error("could not canonicalize report: {0}")]
    Canonicalization(#[from] serde_json::Error),
}

/// The exact bytes a signature covers: `{content_hash, metrics, session_id}`
/// as compact JSON with keys sorted at every level.
pub fn canonical_payload(report: &SignedReport) -> Result<Vec<u8>, serde_json::Error> {
    let mut root = Map::new();
    root.insert("content_hash".into(), Value::String(report.content_hash.clone()));
    root.insert("metrics".into(), serde_json::to_value(&report.metrics)?);
    root.insert("session_id".into(), serde_json::to_value(report.session_id)?);
    serde_json::to_vec(&Value::Object(root))
}

/// Signs reports with one identity's private key.
#[derive(Debug, Clone)]
pub struct ReportSigner {
    identity: SigningIdentity,
}

impl ReportSigner {
    pub fn new(identity: SigningIdentity) -> Self {
        Self { identity }
    }

    pub fn identity(&self) -> &SigningIdentity {
        &self.identity
    }

    /// Attach a signature to an unsigned report.
    pub fn sign(&self, mut report: SignedReport) -> Result<SignedReport, SignatureError> {
        if report.is_signed() {
            return Err(SignatureError::AlreadySigned(report.session_id));
        }
        let payload = canonical_payload(&report)?;
        let signature: Signature = self.identity.signing_key().sign(&payload);

        report.signature = Some(ReportSignature {
            algorithm: SIGNATURE_ALGORITHM.to_string(),
            public_key: encode_public_key(self.identity.verifying_key()),
            value: STANDARD.encode(signature.to_bytes()),
            signed_at: Utc::now(),
        });
        tracing::info!(
            session = %report.session_id,
            key_id = %self.identity.info().key_id,
            "report signed"
        );
        Ok(report)
    }
}
