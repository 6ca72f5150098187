//! `reqwest` implementation of [`AnalysisTransport`].

use super::protocol::{AnalyzeRequest, AnalyzeResponse};
use super::sse::event_channel;
use super::transport::{AnalysisTransport, EventChannel};
use crate::config::AnalysisServiceConfig;
use crate::errors::{NicheflowError, StreamTransportError};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

/// Talks to the analysis service over HTTP.
///
/// The push channel is a long-lived response body, so the client carries
/// only a connect timeout; the whole-request timeout is applied per request
/// to the trigger, fallback and export calls.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: AnalysisServiceConfig,
}

impl HttpTransport {
    /// Creates a transport for the configured service.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the HTTP client cannot be built.
    pub fn new(config: AnalysisServiceConfig) -> Result<Self, NicheflowError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| NicheflowError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Returns the service configuration.
    #[must_use]
    pub fn config(&self) -> &AnalysisServiceConfig {
        &self.config
    }

    async fn post(&self, url: &str, body: &impl serde::Serialize) -> Result<reqwest::Response, StreamTransportError> {
        self.client
            .post(url)
            .timeout(self.config.timeout())
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(url, &e))
    }
}

fn transport_error(url: &str, err: &reqwest::Error) -> StreamTransportError {
    StreamTransportError::new(format!("{url}: {err}"))
}

#[async_trait]
impl AnalysisTransport for HttpTransport {
    async fn subscribe(&self, request: &AnalyzeRequest) -> Result<EventChannel, StreamTransportError> {
        let url = self.config.stream_url();
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| transport_error(&url, &e))?;

        let is_event_stream = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        if !is_event_stream {
            return Err(StreamTransportError::new(format!("{url}: response is not an event stream")));
        }

        debug!(url = %url, "Push channel acknowledged");
        Ok(event_channel(response.bytes_stream()))
    }

    async fn trigger(&self, request: &AnalyzeRequest) -> Result<(), StreamTransportError> {
        let url = self.config.analyze_url();
        self.post(&url, request)
            .await?
            .error_for_status()
            .map_err(|e| transport_error(&url, &e))?;
        Ok(())
    }

    async fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalyzeResponse, StreamTransportError> {
        let url = self.config.analyze_url();
        // Error statuses still carry a `{success: false, error}` body.
        self.post(&url, request)
            .await?
            .json::<AnalyzeResponse>()
            .await
            .map_err(|e| transport_error(&url, &e))
    }

    async fn export_csv(&self, results: &Value) -> Result<Vec<u8>, StreamTransportError> {
        let url = self.config.export_url();
        let bytes = self
            .post(&url, &json!({ "results": results }))
            .await?
            .error_for_status()
            .map_err(|e| transport_error(&url, &e))?
            .bytes()
            .await
            .map_err(|e| transport_error(&url, &e))?;
        Ok(bytes.to_vec())
    }
}
