//! Event sink system for observability.
//!
//! Runners, the scheduler and progress streams report every transition to an
//! injected `EventSink`. The default sink discards events.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use std::sync::Arc;

/// Returns the default (no-op) sink.
#[must_use]
pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpEventSink)
}
