//! The transport seam between a progress stream and the analysis service.

use super::protocol::{AnalyzeRequest, AnalyzeResponse, ProgressEvent};
use crate::errors::StreamTransportError;
use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use std::pin::Pin;

/// An open push channel. Dropping it closes the connection.
pub type EventChannel = Pin<Box<dyn Stream<Item = Result<ProgressEvent, StreamTransportError>> + Send>>;

/// Access to the analysis service.
///
/// The push channel and the trigger are separate calls: the channel only
/// observes, the trigger starts the work.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AnalysisTransport: Send + Sync {
    /// Opens the push channel for `request`. Resolves once the server has
    /// acknowledged the subscription.
    async fn subscribe(&self, request: &AnalyzeRequest) -> Result<EventChannel, StreamTransportError>;

    /// Issues the request that makes the server start producing events.
    async fn trigger(&self, request: &AnalyzeRequest) -> Result<(), StreamTransportError>;

    /// The single blocking fallback request.
    async fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalyzeResponse, StreamTransportError>;

    /// Renders stored results as CSV.
    async fn export_csv(&self, results: &Value) -> Result<Vec<u8>, StreamTransportError>;
}
