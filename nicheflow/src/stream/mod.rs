//! Progress streams for long-running analyses.
//!
//! A [`ProgressStream`] observes one analysis over a push channel
//! (server-sent events) and falls back to a single blocking request when the
//! channel fails. Transports plug in through [`AnalysisTransport`]; the
//! `http` feature provides a `reqwest` implementation.

mod client;
mod client_tests;
#[cfg(feature = "http")]
mod http;
mod protocol;
mod sse;
mod transport;

pub use client::ProgressStream;
#[cfg(feature = "http")]
pub use http::HttpTransport;
pub use protocol::{
    derive_selected_niche, suggested_export_filename, AnalyzeOptions, AnalyzeRequest, AnalyzeResponse,
    ProgressEvent, ProgressUpdate,
};
pub use sse::{decode_event, event_channel, SseDecoder};
pub use transport::{AnalysisTransport, EventChannel};
#[cfg(test)]
pub(crate) use transport::MockAnalysisTransport;
