//! A scripted analysis transport.

use async_trait::async_trait;
use futures::{stream, Stream, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use crate::errors::StreamTransportError;
use crate::stream::{decode_event, AnalysisTransport, AnalyzeRequest, AnalyzeResponse, EventChannel, ProgressEvent};

type ScriptItem = Result<ProgressEvent, StreamTransportError>;

/// Plays back a fixed push-channel script and records every call.
///
/// The channel handed to the client reports when it is dropped and how many
/// items were pulled from it, so tests can prove the channel was closed and
/// nothing was read after a failure.
#[derive(Debug)]
pub struct ScriptedTransport {
    script: Vec<ScriptItem>,
    hold_open: bool,
    event_delay: Duration,
    subscribe_error: Option<String>,
    trigger_error: Option<String>,
    fallback: Mutex<Result<AnalyzeResponse, StreamTransportError>>,
    fallback_delay: Duration,
    export: Vec<u8>,
    counters: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    subscribes: AtomicUsize,
    triggers: AtomicUsize,
    analyze_calls: AtomicUsize,
    exports: AtomicUsize,
    delivered: AtomicUsize,
    channel_closed: AtomicBool,
    requests: Mutex<Vec<AnalyzeRequest>>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    /// An empty script whose fallback fails.
    #[must_use]
    pub fn new() -> Self {
        Self {
            script: Vec::new(),
            hold_open: false,
            event_delay: Duration::ZERO,
            subscribe_error: None,
            trigger_error: None,
            fallback: Mutex::new(Err(StreamTransportError::new("no fallback scripted"))),
            fallback_delay: Duration::ZERO,
            export: Vec::new(),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Appends a raw JSON event to the channel.
    #[must_use]
    pub fn event(mut self, event: &Value) -> Self {
        self.script.push(decode_event(&event.to_string()));
        self
    }

    /// Appends a channel failure.
    #[must_use]
    pub fn transport_error(mut self, message: impl Into<String>) -> Self {
        self.script.push(Err(StreamTransportError::new(message)));
        self
    }

    /// Keeps the channel open after the script instead of ending it.
    #[must_use]
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Delays every scripted item.
    #[must_use]
    pub fn event_delay(mut self, delay: Duration) -> Self {
        self.event_delay = delay;
        self
    }

    /// Makes `subscribe` fail.
    #[must_use]
    pub fn subscribe_error(mut self, message: impl Into<String>) -> Self {
        self.subscribe_error = Some(message.into());
        self
    }

    /// Makes `trigger` fail.
    #[must_use]
    pub fn trigger_error(mut self, message: impl Into<String>) -> Self {
        self.trigger_error = Some(message.into());
        self
    }

    /// Sets the fallback response.
    #[must_use]
    pub fn fallback(self, response: AnalyzeResponse) -> Self {
        *self.fallback.lock() = Ok(response);
        self
    }

    /// Makes the fallback request itself fail.
    #[must_use]
    pub fn fallback_error(self, message: impl Into<String>) -> Self {
        *self.fallback.lock() = Err(StreamTransportError::new(message));
        self
    }

    /// Delays the fallback response.
    #[must_use]
    pub fn fallback_delay(mut self, delay: Duration) -> Self {
        self.fallback_delay = delay;
        self
    }

    /// Sets the CSV export payload.
    #[must_use]
    pub fn export_bytes(mut self, bytes: &[u8]) -> Self {
        self.export = bytes.to_vec();
        self
    }

    /// Number of `subscribe` calls.
    #[must_use]
    pub fn subscribes(&self) -> usize {
        self.counters.subscribes.load(Ordering::SeqCst)
    }

    /// Number of `trigger` calls.
    #[must_use]
    pub fn triggers(&self) -> usize {
        self.counters.triggers.load(Ordering::SeqCst)
    }

    /// Number of fallback requests.
    #[must_use]
    pub fn analyze_calls(&self) -> usize {
        self.counters.analyze_calls.load(Ordering::SeqCst)
    }

    /// Number of export requests.
    #[must_use]
    pub fn exports(&self) -> usize {
        self.counters.exports.load(Ordering::SeqCst)
    }

    /// Items pulled from the channel.
    #[must_use]
    pub fn delivered(&self) -> usize {
        self.counters.delivered.load(Ordering::SeqCst)
    }

    /// True once the client dropped the channel.
    #[must_use]
    pub fn channel_closed(&self) -> bool {
        self.counters.channel_closed.load(Ordering::SeqCst)
    }

    /// Every request seen by `subscribe`, `trigger` and `analyze`.
    #[must_use]
    pub fn requests(&self) -> Vec<AnalyzeRequest> {
        self.counters.requests.lock().clone()
    }

    fn record(&self, request: &AnalyzeRequest) {
        self.counters.requests.lock().push(request.clone());
    }
}

#[async_trait]
impl AnalysisTransport for ScriptedTransport {
    async fn subscribe(&self, request: &AnalyzeRequest) -> Result<EventChannel, StreamTransportError> {
        self.counters.subscribes.fetch_add(1, Ordering::SeqCst);
        self.record(request);
        if let Some(message) = &self.subscribe_error {
            return Err(StreamTransportError::new(message.clone()));
        }

        let delay = self.event_delay;
        let items = stream::iter(self.script.clone()).then(move |item| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            item
        });
        let inner: EventChannel = if self.hold_open {
            Box::pin(items.chain(stream::pending()))
        } else {
            Box::pin(items)
        };

        self.counters.channel_closed.store(false, Ordering::SeqCst);
        Ok(Box::pin(TrackedChannel {
            inner,
            counters: self.counters.clone(),
        }))
    }

    async fn trigger(&self, request: &AnalyzeRequest) -> Result<(), StreamTransportError> {
        self.counters.triggers.fetch_add(1, Ordering::SeqCst);
        self.record(request);
        match &self.trigger_error {
            Some(message) => Err(StreamTransportError::new(message.clone())),
            None => Ok(()),
        }
    }

    async fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalyzeResponse, StreamTransportError> {
        self.counters.analyze_calls.fetch_add(1, Ordering::SeqCst);
        self.record(request);
        if !self.fallback_delay.is_zero() {
            tokio::time::sleep(self.fallback_delay).await;
        }
        self.fallback.lock().clone()
    }

    async fn export_csv(&self, _results: &Value) -> Result<Vec<u8>, StreamTransportError> {
        self.counters.exports.fetch_add(1, Ordering::SeqCst);
        Ok(self.export.clone())
    }
}

struct TrackedChannel {
    inner: EventChannel,
    counters: Arc<Counters>,
}

impl Stream for TrackedChannel {
    type Item = ScriptItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.inner.as_mut().poll_next(cx);
        if let Poll::Ready(Some(_)) = &polled {
            self.counters.delivered.fetch_add(1, Ordering::SeqCst);
        }
        polled
    }
}

impl Drop for TrackedChannel {
    fn drop(&mut self) {
        self.counters.channel_closed.store(true, Ordering::SeqCst);
    }
}
