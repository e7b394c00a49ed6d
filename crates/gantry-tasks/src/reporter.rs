//! Task execution reporting

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Events emitted during task execution
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// A task is starting execution
    Started { name: String, attempt: u32 },
    /// A task completed successfully
    Completed {
        name: String,
        duration: Duration,
        cached: bool,
    },
    /// A task failed and will be retried after `delay`
    Retrying {
        name: String,
        attempt: u32,
        max_retries: u32,
        delay: Duration,
        error: String,
    },
    /// A task failed for good
    Failed {
        name: String,
        duration: Duration,
        error: String,
    },
    /// A task was not run
    Skipped { name: String, reason: String },
    /// An execution level is starting
    LevelStarted { level: usize, task_count: usize },
    /// Periodic snapshot of the run's counters
    Progress {
        total: usize,
        completed: usize,
        failed: usize,
        cached: usize,
        in_flight: usize,
    },
    /// All tasks completed
    AllCompleted {
        total: usize,
        succeeded: usize,
        failed: usize,
        cached: usize,
        skipped: usize,
        duration: Duration,
    },
}

/// Trait for reporting task execution progress
pub trait TaskReporter: Send + Sync {
    /// Handle a task event
    fn report(&self, event: &TaskEvent);
}

/// Simple reporter that logs to tracing
#[derive(Debug, Default)]
pub struct TracingReporter;

impl TaskReporter for TracingReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Started { name, attempt } => {
                if *attempt == 0 {
                    tracing::info!("Starting {}", name);
                } else {
                    tracing::info!("Starting {} (retry {})", name, attempt);
                }
            }
            TaskEvent::Completed {
                name,
                duration,
                cached,
            } => {
                if *cached {
                    tracing::info!("{} completed (cached) in {:.1}s", name, duration.as_secs_f64());
                } else {
                    tracing::info!("{} completed in {:.1}s", name, duration.as_secs_f64());
                }
            }
            TaskEvent::Retrying {
                name,
                attempt,
                max_retries,
                delay,
                error,
            } => {
                tracing::warn!(
                    "{} failed ({}), retry {}/{} in {:.1}s",
                    name,
                    error,
                    attempt,
                    max_retries,
                    delay.as_secs_f64()
                );
            }
            TaskEvent::Failed {
                name,
                duration,
                error,
            } => {
                tracing::error!("{} failed after {:.1}s: {}", name, duration.as_secs_f64(), error);
            }
            TaskEvent::Skipped { name, reason } => {
                tracing::info!("{} skipped: {}", name, reason);
            }
            TaskEvent::LevelStarted { level, task_count } => {
                tracing::info!("Starting level {} ({} tasks)", level, task_count);
            }
            TaskEvent::Progress {
                total,
                completed,
                failed,
                cached,
                in_flight,
            } => {
                tracing::debug!(
                    total,
                    completed,
                    failed,
                    cached,
                    in_flight,
                    "execution progress"
                );
            }
            TaskEvent::AllCompleted {
                total,
                succeeded,
                failed,
                cached,
                skipped,
                duration,
            } => {
                tracing::info!(
                    "All tasks complete: {}/{} succeeded, {} failed, {} cached, {} skipped ({:.1}s)",
                    succeeded,
                    total,
                    failed,
                    cached,
                    skipped,
                    duration.as_secs_f64()
                );
            }
        }
    }
}

/// Reporter that collects events for later inspection (useful for testing)
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<TaskEvent>>,
}

impl CollectingReporter {
    /// Get all collected events
    pub fn events(&self) -> Vec<TaskEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TaskReporter for CollectingReporter {
    fn report(&self, event: &TaskEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Registry of task reporters; broadcasts every event to each one
pub struct TaskReporterRegistry {
    reporters: Vec<Arc<dyn TaskReporter>>,
}

impl TaskReporterRegistry {
    pub fn new() -> Self {
        Self {
            reporters: vec![Arc::new(TracingReporter)],
        }
    }

    pub fn empty() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    pub fn register<R: TaskReporter + 'static>(&mut self, reporter: R) {
        self.reporters.push(Arc::new(reporter));
    }

    pub fn register_shared(&mut self, reporter: Arc<dyn TaskReporter>) {
        self.reporters.push(reporter);
    }

    pub fn all(&self) -> &[Arc<dyn TaskReporter>] {
        &self.reporters
    }

    /// Broadcast an event to all registered reporters
    pub fn broadcast(&self, event: &TaskEvent) {
        for reporter in &self.reporters {
            reporter.report(event);
        }
    }
}

impl Default for TaskReporterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskReporter for TaskReporterRegistry {
    fn report(&self, event: &TaskEvent) {
        self.broadcast(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_reporter() {
        let reporter = CollectingReporter::default();

        reporter.report(&TaskEvent::Started {
            name: "build".to_string(),
            attempt: 0,
        });
        reporter.report(&TaskEvent::Completed {
            name: "build".to_string(),
            duration: Duration::from_secs(5),
            cached: false,
        });

        let events = reporter.events();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_tracing_reporter() {
        let reporter = TracingReporter;

        // Just verify it doesn't panic
        reporter.report(&TaskEvent::Retrying {
            name: "build".to_string(),
            attempt: 1,
            max_retries: 3,
            delay: Duration::from_secs(2),
            error: "exit 1".to_string(),
        });
        reporter.report(&TaskEvent::Progress {
            total: 3,
            completed: 1,
            failed: 0,
            cached: 1,
            in_flight: 2,
        });
    }

    #[test]
    fn test_empty_registry() {
        let registry = TaskReporterRegistry::empty();
        assert!(registry.all().is_empty());
    }

    #[test]
    fn test_broadcast() {
        let collecting = Arc::new(CollectingReporter::default());
        let mut registry = TaskReporterRegistry::empty();
        registry.register_shared(collecting.clone());
        registry.register_shared(collecting.clone());

        registry.report(&TaskEvent::LevelStarted {
            level: 0,
            task_count: 2,
        });

        assert_eq!(collecting.events().len(), 2);
    }

    #[test]
    fn test_register() {
        let mut registry = TaskReporterRegistry::new();
        assert_eq!(registry.all().len(), 1);

        registry.register(CollectingReporter::default());
        assert_eq!(registry.all().len(), 2);
    }
}
