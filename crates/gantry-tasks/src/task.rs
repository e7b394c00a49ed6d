//! Task capability consumed by the executor

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Output produced by a successful task run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    /// Primary textual output (hashed into the cache entry)
    pub output: String,
    /// Optional structured result stored alongside the cache entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl TaskOutput {
    /// Create an output from text
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            data: None,
        }
    }

    /// Attach structured result data
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A named unit of work.
///
/// The executor never looks past this trait: it reads the name and declared
/// dependencies for scheduling and calls [`Task::run`] to execute.
#[async_trait]
pub trait Task: Send + Sync {
    /// Unique task name
    fn name(&self) -> &str;

    /// Names of tasks that must reach a terminal state before this one starts
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Serialized task input, part of the cache key
    fn input(&self) -> String {
        String::new()
    }

    /// Files whose modification invalidates a cached result
    fn file_dependencies(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    /// Ordering hint within a level (higher first)
    fn priority(&self) -> i32 {
        0
    }

    /// Retry attempts after the first failure
    fn max_retries(&self) -> Option<u32> {
        None
    }

    /// Per-attempt timeout
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Execute the task
    async fn run(&self, params: &[String]) -> Result<TaskOutput, TaskError>;
}

/// Errors raised by a task run
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The task reported a failure
    #[error("{0}")]
    Failed(String),

    /// The attempt exceeded its timeout
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The task could not be started
    #[error("Failed to spawn: {0}")]
    Spawn(String),
}

impl TaskError {
    /// Create a failure with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}
