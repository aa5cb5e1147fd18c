//! HTTP client for a remote session aggregate.
//!
//! Speaks the capture-to-aggregate contract against a `humansign serve`
//! instance (or anything else exposing the same routes). The blocking
//! wrapper implements [`BatchSink`] so a capture context can flush straight
//! to the remote side.

use crate::core::classifier::ClassificationResult;
use crate::core::model::Predictor;
use crate::core::report::SignedReport;
use crate::protocol::{
    AcceptedResponse, EndSessionRequest, EndSessionResponse, KeystrokeBatchRequest,
    PasteEventRequest, SignReportRequest, StartSessionRequest, StartSessionResponse,
    VerifyReportRequest, VerifySessionRequest, VerifySessionResponse,
};
use crate::session::aggregate::SessionAggregate;
use crate::session::buffer::{BatchSink, EventBatch, TransportError};
use crate::signing::verifier::VerificationReport;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL, e.g. `http://127.0.0.1:8787`
    pub base_url: String,
    /// Bearer authentication token
    pub token: Option<String>,
    pub timeout: Duration,
}

impl GatewayConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn health_url(&self) -> String {
        self.endpoint("/health")
    }
}

/// Where a verdict came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictSource {
    Remote,
    /// The remote verify failed; the cascade ran on local data
    LocalFallback,
}

fn transport_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Unavailable(e.to_string())
    } else {
        TransportError::Http(e)
    }
}

/// Async gateway client.
pub struct GatewayClient {
    config: GatewayConfig,
    client: reqwest::Client,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub async fn test_connection(&self) -> Result<bool, TransportError> {
        let response = self
            .client
            .get(self.config.health_url())
            .send()
            .await
            .map_err(transport_error)?;
        Ok(response.status().is_success())
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, TransportError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let mut request = self.client.post(self.config.endpoint(path)).json(body);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TransportError::Status {
                status: status.as_u16(),
                message,
            });
        }
        response.json().await.map_err(transport_error)
    }

    pub async fn start_session(&self, domain: &str, session_id: Option<Uuid>) -> Result<Uuid, TransportError> {
        let response: StartSessionResponse = self
            .post(
                "/v1/sessions/start",
                &StartSessionRequest {
                    domain: domain.to_string(),
                    session_id,
                },
            )
            .await?;
        Ok(response.session_id)
    }

    pub async fn keystroke_batch(&self, request: &KeystrokeBatchRequest) -> Result<bool, TransportError> {
        let response: AcceptedResponse = self.post("/v1/keystrokes", request).await?;
        Ok(response.accepted)
    }

    pub async fn paste_event(&self, request: &PasteEventRequest) -> Result<bool, TransportError> {
        let response: AcceptedResponse = self.post("/v1/paste", request).await?;
        Ok(response.accepted)
    }

    pub async fn verify_session(&self, request: &VerifySessionRequest) -> Result<VerifySessionResponse, TransportError> {
        self.post("/v1/verify", request).await
    }

    pub async fn end_session(&self, session_id: Uuid) -> Result<bool, TransportError> {
        let response: EndSessionResponse = self
            .post("/v1/sessions/end", &EndSessionRequest { session_id })
            .await?;
        Ok(response.ended)
    }

    pub async fn sign_report(&self, request: &SignReportRequest) -> Result<SignedReport, TransportError> {
        self.post("/v1/reports/sign", request).await
    }

    pub async fn verify_report(&self, request: &VerifyReportRequest) -> Result<VerificationReport, TransportError> {
        self.post("/v1/reports/verify", request).await
    }
}

/// Blocking gateway client for use in synchronous contexts.
pub struct BlockingGatewayClient {
    inner: GatewayClient,
    runtime: tokio::runtime::Runtime,
}

impl BlockingGatewayClient {
    pub fn new(config: GatewayConfig) -> Result<Self, TransportError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            inner: GatewayClient::new(config)?,
            runtime,
        })
    }

    pub fn test_connection(&self) -> Result<bool, TransportError> {
        self.runtime.block_on(self.inner.test_connection())
    }

    pub fn start_session(&self, domain: &str, session_id: Option<Uuid>) -> Result<Uuid, TransportError> {
        self.runtime.block_on(self.inner.start_session(domain, session_id))
    }

    pub fn end_session(&self, session_id: Uuid) -> Result<bool, TransportError> {
        self.runtime.block_on(self.inner.end_session(session_id))
    }

    pub fn verify_session(&self, request: &VerifySessionRequest) -> Result<VerifySessionResponse, TransportError> {
        self.runtime.block_on(self.inner.verify_session(request))
    }

    /// Ask the remote side for a verdict; on any transport failure run the
    /// cascade locally instead of waiting on the remote classifier.
    pub fn verify_with_fallback(
        &self,
        aggregate: &mut SessionAggregate,
        predictor: &dyn Predictor,
        text: Option<&str>,
    ) -> (ClassificationResult, VerdictSource) {
        let request = VerifySessionRequest {
            session_id: aggregate.id(),
            text_content: text.map(str::to_string),
        };
        match self.verify_session(&request) {
            Ok(response) => (response.result, VerdictSource::Remote),
            Err(e) => {
                tracing::warn!(session = %aggregate.id(), "remote verify failed, classifying locally: {e}");
                (aggregate.classify(predictor), VerdictSource::LocalFallback)
            }
        }
    }
}

impl BatchSink for BlockingGatewayClient {
    fn send_batch(&mut self, batch: &EventBatch) -> Result<(), TransportError> {
        let request = KeystrokeBatchRequest::from(batch.clone());
        if self.runtime.block_on(self.inner.keystroke_batch(&request))? {
            Ok(())
        } else {
            Err(TransportError::Rejected(batch.batch_sequence))
        }
    }
}
