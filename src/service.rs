//! Aggregate-side handler for the capture-to-aggregate contract.
//!
//! Holds one [`SessionAggregate`] per session id in memory. Sessions idle
//! longer than the configured timeout are evicted.

use crate::core::anomaly::{detect_anomalies, risk_score, Anomaly};
use crate::core::classifier::ClassificationResult;
use crate::core::content::analyze_text;
use crate::core::features::ModelFeatures;
use crate::core::model::{NoModel, Predictor};
use crate::core::report::{ReportBuilder, SignedReport};
use crate::protocol::{
    AcceptedResponse, EndSessionRequest, EndSessionResponse, KeystrokeBatchRequest,
    PasteEventRequest, Request, Response, SignReportRequest, StartSessionRequest,
    StartSessionResponse, VerifyReportRequest, VerifySessionRequest, VerifySessionResponse,
};
use crate::session::aggregate::{IngestOutcome, PipelineConfig, SessionAggregate, SessionError};
use crate::signing::signer::{ReportSigner, SignatureError};
use crate::signing::verifier::{verify_report, VerificationReport};
use crate::transparency::SharedTransparencyLog;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("unknown session {0}")]
    UnknownSession(Uuid),
    #[error("no signing key configured")]
    SigningDisabled,
    #[error("no text available to sign for session {0}")]
    MissingText(Uuid),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Signature(#[from] SignatureError),
}

impl ServiceError {
    /// Stable machine-readable code for error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::UnknownSession(_) => "UNKNOWN_SESSION",
            ServiceError::SigningDisabled => "SIGNING_DISABLED",
            ServiceError::MissingText(_) => "MISSING_TEXT",
            ServiceError::Session(_) => "SESSION_ERROR",
            ServiceError::Signature(_) => "SIGNATURE_ERROR",
        }
    }
}

/// Anomalies and risk for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionAnalysis {
    pub session_id: Uuid,
    pub result: ClassificationResult,
    pub features: ModelFeatures,
    pub anomalies: Vec<Anomaly>,
    pub risk_score: u8,
}

struct SessionEntry {
    aggregate: SessionAggregate,
    /// Last text sent with a verify request
    text: Option<String>,
    last_seen: Instant,
}

impl SessionEntry {
    fn touch(&mut self) {
        self.last_seen = Instant::now();
    }
}

pub struct SessionService {
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
    pipeline: PipelineConfig,
    predictor: Arc<dyn Predictor>,
    signer: Option<ReportSigner>,
    session_timeout: Duration,
    transparency: Option<SharedTransparencyLog>,
}

impl SessionService {
    pub fn new(pipeline: PipelineConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            pipeline,
            predictor: Arc::new(NoModel),
            signer: None,
            session_timeout: Duration::from_secs(30 * 60),
            transparency: None,
        }
    }

    pub fn with_predictor(mut self, predictor: Arc<dyn Predictor>) -> Self {
        self.predictor = predictor;
        self
    }

    pub fn with_signer(mut self, signer: ReportSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn with_transparency(mut self, log: SharedTransparencyLog) -> Self {
        self.transparency = Some(log);
        self
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Dispatch a request envelope.
    pub async fn handle(&self, request: Request) -> Result<Response, ServiceError> {
        Ok(match request {
            Request::StartSession(r) => Response::SessionStarted(self.start_session(r).await?),
            Request::KeystrokeBatch(r) => Response::Accepted(self.keystroke_batch(r).await?),
            Request::PasteEvent(r) => Response::Accepted(self.paste_event(r).await?),
            Request::VerifySession(r) => Response::Classification(Box::new(self.verify_session(r).await?)),
            Request::EndSession(r) => Response::Ended(self.end_session(r).await?),
            Request::SignReport(r) => Response::Report(Box::new(self.sign_report(r).await?)),
            Request::VerifyReport(r) => Response::Verification(self.verify_report(&r)),
        })
    }

    pub async fn start_session(&self, request: StartSessionRequest) -> Result<StartSessionResponse, ServiceError> {
        self.evict_idle().await;
        let mut sessions = self.sessions.write().await;
        if let Some(id) = request.session_id {
            if let Some(entry) = sessions.get_mut(&id) {
                entry.touch();
                return Ok(StartSessionResponse { session_id: id });
            }
        }

        let id = request.session_id.unwrap_or_else(Uuid::new_v4);
        let mut aggregate = SessionAggregate::with_id(id, request.domain, self.pipeline.clone());
        aggregate.start(None)?;
        sessions.insert(
            id,
            SessionEntry {
                aggregate,
                text: None,
                last_seen: Instant::now(),
            },
        );
        if let Some(log) = &self.transparency {
            log.record_session_started();
        }
        Ok(StartSessionResponse { session_id: id })
    }

    /// Apply a batch. Invalid batches and batches for ended sessions are
    /// answered with `accepted: false`.
    pub async fn keystroke_batch(&self, request: KeystrokeBatchRequest) -> Result<AcceptedResponse, ServiceError> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(&request.session_id)
            .ok_or(ServiceError::UnknownSession(request.session_id))?;
        entry.touch();

        let accepted = match entry
            .aggregate
            .ingest_batch(request.batch_sequence, request.events)
        {
            Ok(IngestOutcome::Applied { events }) => {
                if let Some(log) = &self.transparency {
                    log.record_accepted(events as u64);
                    log.record_batch_flushed();
                }
                true
            }
            Ok(IngestOutcome::AlreadyApplied) => true,
            Err(e @ (SessionError::InvalidBatch { .. } | SessionError::Ended(_))) => {
                tracing::warn!(session = %request.session_id, "batch refused: {e}");
                false
            }
            Err(e) => return Err(e.into()),
        };
        Ok(AcceptedResponse { accepted })
    }

    pub async fn paste_event(&self, request: PasteEventRequest) -> Result<AcceptedResponse, ServiceError> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(&request.session_id)
            .ok_or(ServiceError::UnknownSession(request.session_id))?;
        entry.touch();
        let accepted = match entry.aggregate.ingest_paste(&request.event) {
            Ok(accepted) => accepted,
            Err(SessionError::Ended(_)) => false,
            Err(e) => return Err(e.into()),
        };
        Ok(AcceptedResponse { accepted })
    }

    /// Run the cascade over everything the session has received.
    ///
    /// The text does not influence the verdict. It is analyzed on its own
    /// for the response and kept as the default text for a later signing
    /// request.
    pub async fn verify_session(&self, request: VerifySessionRequest) -> Result<VerifySessionResponse, ServiceError> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(&request.session_id)
            .ok_or(ServiceError::UnknownSession(request.session_id))?;
        entry.touch();
        if let Some(text) = request.text_content {
            entry.text = Some(text);
        }
        let result = entry.aggregate.classify(self.predictor.as_ref());
        let content_analysis = entry.text.as_deref().and_then(analyze_text);
        if let Some(content) = &content_analysis {
            tracing::debug!(
                session = %request.session_id,
                verdict = %result.verdict,
                content = ?content.verdict,
                human_score = content.human_score,
                "content analyzed"
            );
        }
        Ok(VerifySessionResponse {
            result,
            content_analysis,
        })
    }

    pub async fn end_session(&self, request: EndSessionRequest) -> Result<EndSessionResponse, ServiceError> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(&request.session_id)
            .ok_or(ServiceError::UnknownSession(request.session_id))?;
        entry.touch();
        entry.aggregate.end()?;
        Ok(EndSessionResponse { ended: true })
    }

    /// Classify the session and sign a report over its final text.
    pub async fn sign_report(&self, request: SignReportRequest) -> Result<SignedReport, ServiceError> {
        let signer = self.signer.as_ref().ok_or(ServiceError::SigningDisabled)?;
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(&request.session_id)
            .ok_or(ServiceError::UnknownSession(request.session_id))?;
        entry.touch();

        let text = request
            .text_content
            .or_else(|| entry.text.clone())
            .ok_or(ServiceError::MissingText(request.session_id))?;
        let analysis = entry.aggregate.analyze(self.predictor.as_ref());
        let report = ReportBuilder::new().build(
            request.session_id,
            &analysis.features,
            entry.aggregate.ledger(),
            &analysis.result,
            &text,
        );
        let signed = signer.sign(report)?;
        if let Some(log) = &self.transparency {
            log.record_report_signed();
        }
        Ok(signed)
    }

    pub fn verify_report(&self, request: &VerifyReportRequest) -> VerificationReport {
        verify_report(&request.report, request.text_content.as_deref())
    }

    pub async fn analysis(&self, session_id: Uuid) -> Result<SessionAnalysis, ServiceError> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(&session_id)
            .ok_or(ServiceError::UnknownSession(session_id))?;
        entry.touch();
        let analysis = entry.aggregate.analyze(self.predictor.as_ref());
        let anomalies = detect_anomalies(&analysis.model_features, &analysis.features.burst);
        let risk = risk_score(&analysis.result, &anomalies);
        Ok(SessionAnalysis {
            session_id,
            result: analysis.result,
            features: analysis.model_features,
            anomalies,
            risk_score: risk,
        })
    }

    /// Drop sessions idle longer than the timeout. Returns how many went.
    pub async fn evict_idle(&self) -> usize {
        let timeout = self.session_timeout;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|id, entry| {
            let keep = entry.last_seen.elapsed() < timeout;
            if !keep {
                tracing::info!(session = %id, "idle session evicted");
            }
            keep
        });
        before - sessions.len()
    }
}
