//! Gantry Tasks - dependency-aware task execution engine
//!
//! This crate provides dependency graph resolution, level-based parallel
//! scheduling, a bounded worker pool with retry and backoff, and a
//! content-addressable result cache.

pub mod cache;
pub mod executor;
pub mod graph;
pub mod job;
pub mod level;
pub mod reporter;
pub mod shell;
pub mod task;

pub use cache::{CacheEntry, CacheKey, CacheOptions, CacheStats, ResultCache};
pub use executor::{ExecutionReport, ExecutionStats, Executor, ExecutorError, ExecutorOptions, FailurePolicy, TaskResult};
pub use graph::{DependencyGraph, GraphError};
pub use job::{Job, JobState};
pub use level::{LevelScheduler, SchedulingError};
pub use reporter::{TaskEvent, TaskReporter, TaskReporterRegistry};
pub use shell::ShellTask;
pub use task::{Task, TaskError, TaskOutput};
