//! The progress stream state machine.

use super::protocol::{
    derive_selected_niche, suggested_export_filename, AnalyzeRequest, AnalyzeResponse, ProgressEvent,
    ProgressUpdate,
};
use super::transport::AnalysisTransport;
use crate::cancellation::CancellationToken;
use crate::config::StreamConfig;
use crate::core::{PipelineEvent, StreamState};
use crate::errors::{NicheflowError, StreamFailure, StreamTransportError};
use crate::events::{noop_sink, EventSink};
use crate::project::{ProjectData, ProjectMap};
use futures::StreamExt;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Key receiving the niche derived from stream results.
const SELECTED_NICHE_KEY: &str = "selectedNiche";

#[derive(Debug)]
struct StreamRecord {
    state: StreamState,
    progress: ProgressUpdate,
    results: Option<Value>,
    error: Option<String>,
}

/// Why observation of the push channel ended without results.
enum Interrupted {
    Transport(StreamTransportError),
    Server(String),
    Cancelled,
}

/// Client side of one long-running analysis.
///
/// States move `idle -> streaming -> completed | errored`. A run prefers
/// the push channel and falls back to exactly one blocking request if the
/// channel fails. Results reach [`ProjectData`] only on completion, in a
/// single merge.
pub struct ProgressStream {
    stage: String,
    output_key: String,
    transport: Arc<dyn AnalysisTransport>,
    config: StreamConfig,
    record: RwLock<StreamRecord>,
    token: RwLock<Arc<CancellationToken>>,
    sink: Arc<dyn EventSink>,
}

impl ProgressStream {
    /// Creates an idle stream writing results under `output_key`.
    #[must_use]
    pub fn new(
        stage: impl Into<String>,
        output_key: impl Into<String>,
        transport: Arc<dyn AnalysisTransport>,
    ) -> Self {
        Self {
            stage: stage.into(),
            output_key: output_key.into(),
            transport,
            config: StreamConfig::default(),
            record: RwLock::new(StreamRecord {
                state: StreamState::Idle,
                progress: ProgressUpdate::default(),
                results: None,
                error: None,
            }),
            token: RwLock::new(Arc::new(CancellationToken::new())),
            sink: noop_sink(),
        }
    }

    /// Sets the stream configuration.
    #[must_use]
    pub fn with_config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Returns the owning stage id.
    #[must_use]
    pub fn stage_id(&self) -> &str {
        &self.stage
    }

    /// Returns the project key results are written under.
    #[must_use]
    pub fn output_key(&self) -> &str {
        &self.output_key
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> StreamState {
        self.record.read().state
    }

    /// Returns the latest `{step, message}`.
    #[must_use]
    pub fn progress(&self) -> ProgressUpdate {
        self.record.read().progress.clone()
    }

    /// Returns the stored results once completed.
    #[must_use]
    pub fn results(&self) -> Option<Value> {
        self.record.read().results.clone()
    }

    /// Returns the failure message once errored.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.record.read().error.clone()
    }

    /// Runs one analysis to a terminal state.
    ///
    /// Starting again after `completed` or `errored` is the explicit re-run.
    ///
    /// # Errors
    ///
    /// - `StageBusy` if a run is in flight.
    /// - `Stream` if the server reported an error (with fallback disabled) or
    ///   the fallback request failed.
    /// - `Cancelled` if the stream was closed first.
    pub async fn start(&self, request: AnalyzeRequest, project: &Arc<ProjectData>) -> Result<Value, NicheflowError> {
        let token = {
            let mut record = self.record.write();
            if record.state == StreamState::Streaming {
                return Err(NicheflowError::StageBusy(self.stage.clone()));
            }
            *record = StreamRecord {
                state: StreamState::Streaming,
                progress: ProgressUpdate::initial(),
                results: None,
                error: None,
            };
            let token = Arc::new(CancellationToken::new());
            *self.token.write() = token.clone();
            token
        };

        let span = info_span!("progress_stream", stage = %self.stage, query = %request.query);
        let guard = AbandonGuard {
            stream: self,
            token: token.clone(),
        };
        let outcome = self.drive(&request, project, &token).instrument(span).await;
        drop(guard);
        outcome
    }

    async fn drive(
        &self,
        request: &AnalyzeRequest,
        project: &Arc<ProjectData>,
        token: &CancellationToken,
    ) -> Result<Value, NicheflowError> {
        info!(location = %request.location, "Stream started");
        self.sink.emit(
            PipelineEvent::new("stream.started")
                .add_data("stage", json!(self.stage))
                .add_data("query", json!(request.query))
                .add_data("location", json!(request.location)),
        );

        let observed = tokio::select! {
            () = token.cancelled() => Err(Interrupted::Cancelled),
            observed = self.observe(request) => observed,
        };

        let results = match observed {
            Ok(results) => results,
            Err(Interrupted::Cancelled) => return Err(self.cancelled(token)),
            Err(Interrupted::Server(message)) if !self.config.fallback_on_server_error => {
                return Err(self.fail(StreamFailure::Server(message)));
            }
            Err(Interrupted::Server(message)) => self.fallback(request, token, &message).await?,
            Err(Interrupted::Transport(err)) => self.fallback(request, token, &err.message).await?,
        };

        self.complete(results, project, token)
    }

    /// Reads the push channel while the trigger request runs alongside it.
    async fn observe(&self, request: &AnalyzeRequest) -> Result<Value, Interrupted> {
        // The channel is dropped, and therefore closed, on every return path.
        let mut channel = self.transport.subscribe(request).await.map_err(Interrupted::Transport)?;
        let mut trigger = self.transport.trigger(request);
        let mut triggered = false;

        loop {
            tokio::select! {
                result = &mut trigger, if !triggered => {
                    triggered = true;
                    result.map_err(Interrupted::Transport)?;
                    debug!("Trigger request accepted");
                }
                next = channel.next() => match next {
                    None => {
                        return Err(Interrupted::Transport(StreamTransportError::new(
                            "push channel ended before a terminal event",
                        )));
                    }
                    Some(Err(err)) => return Err(Interrupted::Transport(err)),
                    Some(Ok(ProgressEvent::Completed { results })) => return Ok(results),
                    Some(Ok(ProgressEvent::Error { error })) => {
                        return Err(Interrupted::Server(error.unwrap_or_else(|| "unknown error".to_string())));
                    }
                    Some(Ok(ProgressEvent::Started { message })) => {
                        self.set_progress(ProgressUpdate::new(
                            "started",
                            message.unwrap_or_else(|| "Analysis started".to_string()),
                        ));
                    }
                    Some(Ok(ProgressEvent::Processing { step, message })) => {
                        self.set_progress(ProgressUpdate::new(
                            step.unwrap_or_default(),
                            message.unwrap_or_default(),
                        ));
                    }
                    Some(Ok(ProgressEvent::Unknown)) => debug!("Ignoring event with unknown status"),
                },
            }
        }
    }

    async fn fallback(&self, request: &AnalyzeRequest, token: &CancellationToken, reason: &str) -> Result<Value, NicheflowError> {
        warn!(reason, "Push channel failed, issuing fallback request");
        self.sink.emit(
            PipelineEvent::new("stream.fallback")
                .add_data("stage", json!(self.stage))
                .add_data("reason", json!(reason)),
        );

        let response = tokio::select! {
            () = token.cancelled() => return Err(self.cancelled(token)),
            response = self.transport.analyze(request) => response,
        };

        response
            .map_err(|err| StreamFailure::Fallback(err.message))
            .and_then(AnalyzeResponse::into_results)
            .map_err(|failure| self.fail(failure))
    }

    fn complete(&self, results: Value, project: &Arc<ProjectData>, token: &CancellationToken) -> Result<Value, NicheflowError> {
        {
            // Hold the record lock so a concurrent close() cannot interleave
            // with the write.
            let mut record = self.record.write();
            if token.is_cancelled() || record.state != StreamState::Streaming {
                drop(record);
                return Err(self.cancelled(token));
            }

            let mut partial = ProjectMap::new();
            partial.insert(SELECTED_NICHE_KEY.to_string(), derive_selected_niche(&results));
            partial.insert(self.output_key.clone(), results.clone());
            project.merge(partial);

            record.state = StreamState::Completed;
            record.results = Some(results.clone());
        }

        info!(output_key = %self.output_key, "Stream completed");
        self.sink.emit(
            PipelineEvent::new("stream.completed")
                .add_data("stage", json!(self.stage))
                .add_data("output_key", json!(self.output_key)),
        );
        Ok(results)
    }

    fn fail(&self, failure: StreamFailure) -> NicheflowError {
        let message = failure.to_string();
        {
            let mut record = self.record.write();
            if record.state == StreamState::Streaming {
                record.state = StreamState::Errored;
                record.error = Some(message.clone());
            }
        }
        error!(error = %message, "Stream failed");
        self.sink.emit(
            PipelineEvent::new("stream.errored")
                .add_data("stage", json!(self.stage))
                .add_data("error", json!(message)),
        );
        failure.into()
    }

    fn cancelled(&self, token: &CancellationToken) -> NicheflowError {
        NicheflowError::Cancelled(token.reason().unwrap_or_else(|| format!("stream '{}' closed", self.stage)))
    }

    fn set_progress(&self, update: ProgressUpdate) {
        {
            let mut record = self.record.write();
            if record.state != StreamState::Streaming {
                return;
            }
            record.progress = update.clone();
        }
        debug!(step = %update.step, message = %update.message, "Stream progress");
        self.sink.emit(
            PipelineEvent::new("stream.progress")
                .add_data("stage", json!(self.stage))
                .add_data("step", json!(update.step))
                .add_data("message", json!(update.message)),
        );
    }

    /// Closes an in-flight run. The stream becomes `errored` and nothing is
    /// written to project data. Returns false if nothing was streaming.
    pub fn close(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        {
            let mut record = self.record.write();
            if record.state != StreamState::Streaming {
                return false;
            }
            self.token.read().cancel(reason.clone());
            record.state = StreamState::Errored;
            record.error = Some(format!("Cancelled: {reason}"));
        }
        info!(stage = %self.stage, reason = %reason, "Stream closed");
        self.sink.emit(
            PipelineEvent::new("stream.errored")
                .add_data("stage", json!(self.stage))
                .add_data("error", json!(format!("Cancelled: {reason}"))),
        );
        true
    }

    /// Exports the stored results as CSV.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless the stream is `completed`, and
    /// `StreamTransport` if the export request fails.
    pub async fn export_csv(&self) -> Result<Vec<u8>, NicheflowError> {
        let results = {
            let record = self.record.read();
            match (&record.state, &record.results) {
                (StreamState::Completed, Some(results)) => results.clone(),
                (state, _) => {
                    return Err(NicheflowError::InvalidState(format!(
                        "export requires a completed stream, '{}' is {state}",
                        self.stage
                    )));
                }
            }
        };
        Ok(self.transport.export_csv(&results).await?)
    }

    /// File name for the CSV export, once completed.
    #[must_use]
    pub fn suggested_export_filename(&self) -> Option<String> {
        self.record.read().results.as_ref().map(suggested_export_filename)
    }
}

impl Drop for ProgressStream {
    fn drop(&mut self) {
        self.token.read().cancel("stream dropped");
    }
}

impl std::fmt::Debug for ProgressStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressStream")
            .field("stage", &self.stage)
            .field("output_key", &self.output_key)
            .field("state", &self.state())
            .finish()
    }
}

/// Settles a run whose future was dropped before reaching a terminal state.
struct AbandonGuard<'a> {
    stream: &'a ProgressStream,
    token: Arc<CancellationToken>,
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        let current = Arc::ptr_eq(&self.token, &self.stream.token.read());
        if current && self.stream.state() == StreamState::Streaming {
            self.stream.close("run abandoned");
        }
    }
}
