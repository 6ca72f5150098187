//! Cooperative cancellation for task runs and progress streams.
//!
//! A `CancellationToken` is created per run. `stop()` on a runner or `close()`
//! on a stream cancels it; task bodies observe it at their own suspension
//! points and stream reads race against it.

mod token;

pub use token::CancellationToken;
