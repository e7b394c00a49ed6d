//! Scheduling wrapper around a task

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::task::Task;

/// Lifecycle of a job.
///
/// `Pending → DependenciesResolved → Dispatched → Running → Succeeded`, or
/// `Running → Failed → RetryScheduled → Running ...` until `FinalFailed`.
/// A stop during backoff ends `RetryScheduled` in `FinalFailed`. A cache hit
/// goes straight from `Dispatched` to `Succeeded`. Jobs that
/// never run end in `DependencyFailed` or `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Pending,
    DependenciesResolved,
    Dispatched,
    Running,
    Succeeded,
    Failed,
    RetryScheduled,
    FinalFailed,
    DependencyFailed,
    Cancelled,
}

impl JobState {
    /// Whether no further transitions are possible
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::FinalFailed | Self::DependencyFailed | Self::Cancelled
        )
    }

    /// Whether this state represents success
    pub fn is_success(self) -> bool {
        self == Self::Succeeded
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, DependenciesResolved)
                | (Pending, DependencyFailed)
                | (Pending, Cancelled)
                | (DependenciesResolved, Dispatched)
                | (DependenciesResolved, DependencyFailed)
                | (DependenciesResolved, Cancelled)
                | (Dispatched, Running)
                | (Dispatched, Succeeded)
                | (Dispatched, Cancelled)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Failed, RetryScheduled)
                | (Failed, FinalFailed)
                | (RetryScheduled, Running)
                | (RetryScheduled, FinalFailed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::DependenciesResolved => "dependencies-resolved",
            Self::Dispatched => "dispatched",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::RetryScheduled => "retry-scheduled",
            Self::FinalFailed => "final-failed",
            Self::DependencyFailed => "dependency-failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A task plus its scheduling metadata for one execution request
#[derive(Clone)]
pub struct Job {
    pub task: Arc<dyn Task>,
    pub priority: i32,
    pub max_retries: u32,
    pub retry_count: u32,
    pub timeout: Option<Duration>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub dependencies_resolved: bool,
    state: JobState,
}

impl Job {
    /// Wrap a task, taking priority, retries and timeout from the task itself
    pub fn new(task: Arc<dyn Task>) -> Self {
        Self {
            priority: task.priority(),
            max_retries: task.max_retries().unwrap_or(0),
            timeout: task.timeout(),
            task,
            retry_count: 0,
            started_at: None,
            completed_at: None,
            dependencies_resolved: false,
            state: JobState::Pending,
        }
    }

    /// Set the retry limit
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the per-attempt timeout
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Name of the wrapped task
    pub fn name(&self) -> &str {
        self.task.name()
    }

    /// Current lifecycle state
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Whether another attempt is allowed
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Move to `next`, stamping start and completion times
    pub fn transition(&mut self, next: JobState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid job transition for {}: {} -> {}",
            self.name(),
            self.state,
            next
        );

        match next {
            JobState::DependenciesResolved => self.dependencies_resolved = true,
            JobState::Running if self.started_at.is_none() => self.started_at = Some(Utc::now()),
            _ => {}
        }
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        self.state = next;
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("task", &self.name())
            .field("priority", &self.priority)
            .field("max_retries", &self.max_retries)
            .field("retry_count", &self.retry_count)
            .field("state", &self.state)
            .finish()
    }
}
