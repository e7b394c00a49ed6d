//! Configuration types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for Gantry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Project name
    pub name: Option<String>,

    /// Executor configuration
    pub executor: ExecutorConfig,

    /// Result cache configuration
    pub cache: CacheConfig,

    /// Declared tasks, keyed by name
    #[serde(default)]
    pub tasks: HashMap<String, TaskConfig>,
}

impl Config {
    /// Resolve the cache directory against a project root
    pub fn cache_dir(&self, root: &std::path::Path) -> PathBuf {
        if self.cache.dir.is_absolute() {
            self.cache.dir.clone()
        } else {
            root.join(&self.cache.dir)
        }
    }
}

/// Executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum jobs running at once
    pub max_concurrent: usize,

    /// Whether to consult and populate the result cache
    pub use_cache: bool,

    /// Whether to emit periodic progress snapshots
    pub show_progress: bool,

    /// Interval between progress snapshots, in milliseconds
    pub progress_interval_ms: u64,

    /// Base unit for exponential retry backoff, in milliseconds
    pub backoff_unit_ms: u64,

    /// Dispatch dependents of failed tasks instead of skipping them
    pub continue_on_failure: bool,

    /// Retries applied to tasks that do not set their own
    pub default_max_retries: u32,

    /// Timeout applied to tasks that do not set their own
    pub default_timeout_secs: Option<u64>,
}

impl ExecutorConfig {
    /// Progress interval as a duration
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Backoff unit as a duration
    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }

    /// Default per-job timeout as a duration
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: super::defaults::default_concurrency(),
            use_cache: true,
            show_progress: false,
            progress_interval_ms: 500,
            backoff_unit_ms: 1000,
            continue_on_failure: false,
            default_max_retries: 0,
            default_timeout_secs: None,
        }
    }
}

/// Result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether caching is enabled
    pub enabled: bool,

    /// Cache directory (relative paths resolve against the project root)
    pub dir: PathBuf,

    /// Maximum age of a cached result, in seconds
    pub max_age_secs: u64,

    /// Maximum number of entries kept in memory before eviction
    pub max_entries: usize,
}

impl CacheConfig {
    /// Maximum entry age as a duration
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from(".gantry/cache"),
            max_age_secs: 7 * 24 * 60 * 60,
            max_entries: 1000,
        }
    }
}

/// A task declared in the configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Shell command to execute
    pub command: String,

    /// Tasks that must complete first
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Glob patterns for files that invalidate cached results when modified
    #[serde(default)]
    pub files: Vec<String>,

    /// Environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Scheduling priority within a level (higher runs first)
    pub priority: i32,

    /// Retry attempts after the first failure
    pub max_retries: Option<u32>,

    /// Per-attempt timeout in seconds
    pub timeout_secs: Option<u64>,
}
