//! Capture-to-aggregate message contract.
//!
//! Every request is safe to retry: starting a known session returns it,
//! re-sending a batch sequence is acknowledged without being re-applied, and
//! a repeated paste report is recognized as a duplicate.

use crate::collector::types::{CapturedEvent, PasteEvent};
use crate::core::classifier::ClassificationResult;
use crate::core::content::ContentAnalysis;
use crate::core::report::SignedReport;
use crate::session::buffer::EventBatch;
use crate::signing::verifier::VerificationReport;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartSessionRequest {
    pub domain: String,
    /// Reuse the id the capture side already allocated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartSessionResponse {
    pub session_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeystrokeBatchRequest {
    pub session_id: Uuid,
    pub events: Vec<CapturedEvent>,
    pub batch_sequence: u64,
}

impl From<EventBatch> for KeystrokeBatchRequest {
    fn from(batch: EventBatch) -> Self {
        Self {
            session_id: batch.session_id,
            events: batch.events,
            batch_sequence: batch.batch_sequence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PasteEventRequest {
    pub session_id: Uuid,
    pub event: PasteEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedResponse {
    pub accepted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifySessionRequest {
    pub session_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
}

/// Verdict for a session, plus a statistical read of the submitted text.
///
/// `content_analysis` is diagnostic only; the verdict never depends on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifySessionResponse {
    #[serde(flatten)]
    pub result: ClassificationResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_analysis: Option<ContentAnalysis>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndSessionRequest {
    pub session_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndSessionResponse {
    pub ended: bool,
}

/// Produce a signed report for a session's final text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignReportRequest {
    pub session_id: Uuid,
    /// Falls back to the text last sent with a verify request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyReportRequest {
    pub report: SignedReport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
}

/// All requests, for transports that carry one message type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    StartSession(StartSessionRequest),
    KeystrokeBatch(KeystrokeBatchRequest),
    PasteEvent(PasteEventRequest),
    VerifySession(VerifySessionRequest),
    EndSession(EndSessionRequest),
    SignReport(SignReportRequest),
    VerifyReport(Box<VerifyReportRequest>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Response {
    SessionStarted(StartSessionResponse),
    Accepted(AcceptedResponse),
    Classification(Box<VerifySessionResponse>),
    Ended(EndSessionResponse),
    Report(Box<SignedReport>),
    Verification(VerificationReport),
}

/// Error body returned by the HTTP surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::types::KeystrokeEvent;

    #[test]
    fn test_request_envelope() {
        let request = Request::EndSession(EndSessionRequest {
            session_id: Uuid::nil(),
        });
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["type"], "END_SESSION");
        assert_eq!(json["body"]["session_id"], Uuid::nil().to_string());
    }

    #[test]
    fn test_optional_fields_default() {
        let request: StartSessionRequest = serde_json::from_str(r#"{"domain":"example.org"}"#).unwrap();
        assert_eq!(request.session_id, None);
        let request: VerifySessionRequest =
            serde_json::from_str(&format!(r#"{{"session_id":"{}"}}"#, Uuid::nil())).unwrap();
        assert_eq!(request.text_content, None);
    }

    #[test]
    fn test_batch_conversion_keeps_sequence() {
        let batch = EventBatch {
            session_id: Uuid::new_v4(),
            batch_sequence: 7,
            events: vec![CapturedEvent::Keystroke(KeystrokeEvent::press(65, Some('a'), 1.0))],
        };
        let request = KeystrokeBatchRequest::from(batch.clone());
        assert_eq!(request.batch_sequence, 7);
        assert_eq!(request.events, batch.events);
    }
}
