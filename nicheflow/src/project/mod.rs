//! Shared project data accumulated across pipeline stages.
//!
//! Every stage reads keys written by earlier stages and merges its own results
//! in. Writes never remove keys; the last writer wins per key.

mod store;
mod view;

pub use store::{ProjectData, ProjectMap};
pub use view::ScopedProjectView;
