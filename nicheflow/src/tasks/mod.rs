//! Tasks and the sequential task runner.
//!
//! A task is a named unit of work with an opaque asynchronous body. Bodies
//! declare the project keys they may write; the runner merges those writes
//! into the shared project data as each task completes, so later tasks in
//! the same run can read them.

mod context;
mod runner;

pub use context::TaskContext;
pub use runner::{RunReport, TaskRunner, TaskState};

use crate::errors::TaskFailure;
use crate::project::ProjectMap;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

/// Trait for task bodies.
///
/// Bodies report progress and observe cancellation through the context.
/// Returning `Err` halts the run that owns the task.
#[async_trait]
pub trait TaskBody: Send + Sync {
    /// Executes the task.
    async fn execute(&self, ctx: &TaskContext) -> Result<TaskOutput, TaskFailure>;
}

/// Project writes produced by a task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskOutput {
    values: ProjectMap,
}

impl TaskOutput {
    /// An output that writes nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// An output writing a single key.
    #[must_use]
    pub fn value(key: impl Into<String>, value: Value) -> Self {
        Self::empty().with(key, value)
    }

    /// Adds a key to the output.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    /// Gets a written value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Returns the written keys.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    /// Returns true if nothing is written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the writes as a project map.
    #[must_use]
    pub fn to_map(&self) -> ProjectMap {
        self.values.clone()
    }
}

impl From<ProjectMap> for TaskOutput {
    fn from(values: ProjectMap) -> Self {
        Self { values }
    }
}

/// A task definition: identity, output contract and body.
#[derive(Clone)]
pub struct TaskSpec {
    /// Task id, unique within its stage.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Display description.
    pub description: String,
    /// Project keys the task may write.
    pub produces: Vec<String>,
    /// The body.
    pub body: Arc<dyn TaskBody>,
}

impl TaskSpec {
    /// Creates a new task spec.
    pub fn new(id: impl Into<String>, name: impl Into<String>, body: Arc<dyn TaskBody>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            produces: Vec::new(),
            body,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Declares project keys the task writes.
    #[must_use]
    pub fn produces<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.produces.extend(keys.into_iter().map(Into::into));
        self
    }
}

impl Debug for TaskSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSpec")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("produces", &self.produces)
            .finish()
    }
}

/// An async closure task body.
pub struct FnTask<F, Fut>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TaskOutput, TaskFailure>> + Send,
{
    func: F,
    _phantom: std::marker::PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnTask<F, Fut>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TaskOutput, TaskFailure>> + Send,
{
    /// Wraps an async closure.
    pub fn new(func: F) -> Self {
        Self {
            func,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<F, Fut> FnTask<F, Fut>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TaskOutput, TaskFailure>> + Send + 'static,
{
    /// Wraps an async closure into a shareable body.
    pub fn arc(func: F) -> Arc<dyn TaskBody> {
        Arc::new(Self::new(func))
    }
}

#[async_trait]
impl<F, Fut> TaskBody for FnTask<F, Fut>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<TaskOutput, TaskFailure>> + Send,
{
    async fn execute(&self, ctx: &TaskContext) -> Result<TaskOutput, TaskFailure> {
        (self.func)(ctx.clone()).await
    }
}
