//! Report signing and verification.
//!
//! ```text
//! signing/
//!     |-- keys.rs     - P-256 key pair persistence and identity record
//!     |-- signer.rs   - canonical payload and ReportSigner
//!     `-- verifier.rs - stateless signature + content-hash checks
//! ```

pub mod keys;
pub mod signer;
pub mod verifier;

pub use keys::{decode_public_key, encode_public_key, KeyError, KeyInfo, KeyStore, SigningIdentity};
pub use signer::{canonical_payload, ReportSigner, SignatureError, SIGNATURE_ALGORITHM};
pub use verifier::{
    verify_report, verify_report_with_key, verify_signature, ContentStatus, SignatureStatus,
    VerificationReport,
};
