//! Task executor: bounded worker pool over dependency levels

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use gantry_core::config::ExecutorConfig;

use crate::cache::ResultCache;
use crate::graph::{DependencyGraph, GraphError};
use crate::job::{Job, JobState};
use crate::level::{LevelScheduler, SchedulingError};
use crate::reporter::{TaskEvent, TaskReporter};
use crate::task::{Task, TaskError, TaskOutput};

/// What happens to tasks whose dependencies did not succeed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Dependents of a failed task end as `DependencyFailed` without running
    #[default]
    SkipDependents,
    /// Dependents run once their dependencies reached any terminal state
    Continue,
}

/// Options for the executor
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Number of workers, and so the maximum number of running jobs
    pub max_concurrent: usize,
    /// Whether to consult and populate the result cache
    pub use_cache: bool,
    /// Whether to emit periodic progress events
    pub show_progress: bool,
    /// Interval between progress events
    pub progress_interval: Duration,
    /// Retry `n` waits `backoff_unit * 2^n`
    pub backoff_unit: Duration,
    /// Handling of dependents of failed tasks
    pub failure_policy: FailurePolicy,
    /// Retries for tasks that do not set their own
    pub default_max_retries: u32,
    /// Timeout for tasks that do not set their own
    pub default_timeout: Option<Duration>,
    /// Parameters passed to every task run
    pub params: Vec<String>,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self::from(&ExecutorConfig::default())
    }
}

impl From<&ExecutorConfig> for ExecutorOptions {
    fn from(config: &ExecutorConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent.max(1),
            use_cache: config.use_cache,
            show_progress: config.show_progress,
            progress_interval: config.progress_interval(),
            backoff_unit: config.backoff_unit(),
            failure_policy: if config.continue_on_failure {
                FailurePolicy::Continue
            } else {
                FailurePolicy::SkipDependents
            },
            default_max_retries: config.default_max_retries,
            default_timeout: config.default_timeout(),
            params: Vec::new(),
        }
    }
}

/// Outcome of one job
#[derive(Debug, Clone)]
pub struct TaskResult {
    /// Task name
    pub name: String,
    /// Terminal job state
    pub state: JobState,
    /// Whether the result came from the cache
    pub cached: bool,
    /// Retries performed
    pub retry_count: u32,
    /// Wall-clock time spent on the job
    pub duration: Duration,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Output of the successful run
    pub output: Option<TaskOutput>,
    /// Error of the last failed attempt, or why the job did not run
    pub error: Option<String>,
}

impl TaskResult {
    fn from_job(job: &Job, duration: Duration) -> Self {
        Self {
            name: job.name().to_string(),
            state: job.state(),
            cached: false,
            retry_count: job.retry_count,
            duration,
            started_at: job.started_at,
            completed_at: job.completed_at,
            output: None,
            error: None,
        }
    }

    /// Check if this job succeeded
    pub fn is_success(&self) -> bool {
        self.state.is_success()
    }
}

/// Aggregate counters for one execution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionStats {
    pub total_tasks: usize,
    /// Successful jobs, cache hits included
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub cached_tasks: usize,
    /// Jobs that never ran (failed dependency or cancellation)
    pub skipped_tasks: usize,
    /// Summed over successfully executed jobs
    pub total_duration: Duration,
    pub average_duration: Duration,
    pub max_concurrent_observed: usize,
}

impl ExecutionStats {
    /// Percentage of tasks that completed; 0 when there were none
    pub fn success_rate(&self) -> f64 {
        if self.total_tasks == 0 {
            return 0.0;
        }
        self.completed_tasks as f64 / self.total_tasks as f64 * 100.0
    }
}

/// Statistics plus per-job results, in execution order
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub stats: ExecutionStats,
    pub results: Vec<TaskResult>,
}

impl ExecutionReport {
    /// Percentage of tasks that completed
    pub fn success_rate(&self) -> f64 {
        self.stats.success_rate()
    }

    /// Result for a task by name
    pub fn get(&self, name: &str) -> Option<&TaskResult> {
        self.results.iter().find(|r| r.name == name)
    }

    /// Results that did not succeed
    pub fn failures(&self) -> impl Iterator<Item = &TaskResult> {
        self.results.iter().filter(|r| !r.is_success())
    }
}

#[derive(Debug, Default)]
struct Counters {
    total: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    cached: AtomicUsize,
    skipped: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    success_micros: AtomicU64,
}

impl Counters {
    fn begin(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn end(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn progress(&self) -> TaskEvent {
        TaskEvent::Progress {
            total: self.total.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cached: self.cached.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }

    fn stats(&self) -> ExecutionStats {
        let completed = self.completed.load(Ordering::SeqCst);
        let total_duration = Duration::from_micros(self.success_micros.load(Ordering::SeqCst));
        let average_duration = if completed == 0 {
            Duration::ZERO
        } else {
            total_duration / completed as u32
        };

        ExecutionStats {
            total_tasks: self.total.load(Ordering::SeqCst),
            completed_tasks: completed,
            failed_tasks: self.failed.load(Ordering::SeqCst),
            cached_tasks: self.cached.load(Ordering::SeqCst),
            skipped_tasks: self.skipped.load(Ordering::SeqCst),
            total_duration,
            average_duration,
            max_concurrent_observed: self.max_in_flight.load(Ordering::SeqCst),
        }
    }
}

/// A job handed to a worker, with its resolved dependency names
struct WorkItem {
    job: Job,
    dependencies: Vec<String>,
}

/// Levels, dependency lists and jobs for one execution request
struct Plan {
    order: Vec<String>,
    levels: Vec<Vec<String>>,
    dependencies: HashMap<String, Vec<String>>,
    jobs: HashMap<String, Job>,
}

/// Shared state every worker reads
struct WorkerContext {
    cache: Option<Arc<ResultCache>>,
    reporter: Arc<dyn TaskReporter>,
    counters: Arc<Counters>,
    backoff_unit: Duration,
    params: Arc<Vec<String>>,
    shutdown: CancellationToken,
}

/// Executes tasks level by level on a fixed pool of workers
pub struct Executor {
    options: ExecutorOptions,
    graph: RwLock<DependencyGraph>,
    cache: Option<Arc<ResultCache>>,
    reporter: Arc<dyn TaskReporter>,
    shutdown: CancellationToken,
}

impl Executor {
    /// Create a new executor
    pub fn new(
        options: ExecutorOptions,
        cache: Option<Arc<ResultCache>>,
        reporter: Arc<dyn TaskReporter>,
    ) -> Self {
        Self::with_graph(options, DependencyGraph::new(), cache, reporter)
    }

    /// Create an executor over an existing dependency graph
    pub fn with_graph(
        options: ExecutorOptions,
        graph: DependencyGraph,
        cache: Option<Arc<ResultCache>>,
        reporter: Arc<dyn TaskReporter>,
    ) -> Self {
        Self {
            options,
            graph: RwLock::new(graph),
            cache,
            reporter,
            shutdown: CancellationToken::new(),
        }
    }

    /// Declare dependencies for a task ahead of execution
    pub fn add_dependency<S: AsRef<str>>(&self, task: &str, deps: &[S]) -> Result<(), GraphError> {
        self.graph_mut().add_dependency(task, deps)
    }

    /// Read access to the dependency graph
    pub fn graph(&self) -> RwLockReadGuard<'_, DependencyGraph> {
        self.graph.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn graph_mut(&self) -> RwLockWriteGuard<'_, DependencyGraph> {
        self.graph.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop accepting new jobs. Running jobs finish; the rest end as
    /// `Cancelled`. The executor stays stopped.
    pub fn stop(&self) {
        info!("executor stop requested");
        self.shutdown.cancel();
    }

    /// Whether `stop` has been called
    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Get the executor options
    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// Register, validate and group `tasks` into levels with their jobs
    #[instrument(skip_all, fields(tasks = tasks.len()))]
    fn prepare(&self, tasks: Vec<Arc<dyn Task>>) -> Result<Plan, ExecutorError> {
        let mut names: Vec<String> = Vec::with_capacity(tasks.len());
        let mut seen = HashSet::with_capacity(tasks.len());
        for task in &tasks {
            if !seen.insert(task.name().to_string()) {
                return Err(ExecutorError::DuplicateTask(task.name().to_string()));
            }
            names.push(task.name().to_string());
        }

        let mut graph = self.graph_mut();
        for task in &tasks {
            let deps = task.dependencies();
            if !deps.is_empty() {
                graph.add_dependency(task.name(), &deps)?;
            }
        }

        let mut run_graph = DependencyGraph::new();
        for name in &names {
            run_graph.add_dependency(name.as_str(), graph.dependencies(name))?;
        }
        drop(graph);

        run_graph.validate_dependencies(&names)?;
        let order = run_graph.resolve_execution_order(&names)?;

        let jobs: HashMap<String, Job> = tasks
            .into_iter()
            .map(|task| {
                let job = Job::new(task.clone())
                    .with_max_retries(task.max_retries().unwrap_or(self.options.default_max_retries))
                    .with_timeout(task.timeout().or(self.options.default_timeout));
                (job.name().to_string(), job)
            })
            .collect();

        let priorities = jobs
            .iter()
            .map(|(name, job)| (name.clone(), job.priority))
            .collect();
        let levels = LevelScheduler::new(&run_graph)
            .with_priorities(priorities)
            .group_by_level(&order)?;

        let dependencies = names
            .iter()
            .map(|name| (name.clone(), run_graph.dependencies(name).to_vec()))
            .collect();

        Ok(Plan {
            order,
            levels,
            dependencies,
            jobs,
        })
    }

    fn worker_context(&self, use_cache: bool, counters: Arc<Counters>) -> Arc<WorkerContext> {
        Arc::new(WorkerContext {
            cache: if use_cache { self.cache.clone() } else { None },
            reporter: self.reporter.clone(),
            counters,
            backoff_unit: self.options.backoff_unit,
            params: Arc::new(self.options.params.clone()),
            shutdown: self.shutdown.clone(),
        })
    }

    /// Execute `tasks` and everything they need, level by level.
    ///
    /// Graph errors abort before any task runs. Individual task failures do
    /// not raise; they are recorded in the report.
    #[instrument(skip_all, fields(tasks = tasks.len(), max_concurrent = self.options.max_concurrent))]
    pub async fn execute_concurrent(
        &self,
        tasks: Vec<Arc<dyn Task>>,
    ) -> Result<ExecutionReport, ExecutorError> {
        let start = Instant::now();
        let Plan {
            order,
            levels,
            dependencies,
            mut jobs,
        } = self.prepare(tasks)?;

        let counters = Arc::new(Counters::default());
        counters.total.store(order.len(), Ordering::SeqCst);
        let ctx = self.worker_context(self.options.use_cache, counters.clone());

        let worker_count = self.options.max_concurrent.max(1);
        let (job_tx, job_rx) = mpsc::channel::<WorkItem>(worker_count);
        let job_rx = Arc::new(AsyncMutex::new(job_rx));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<TaskResult>();

        let workers: Vec<JoinHandle<()>> = (0..worker_count)
            .map(|id| tokio::spawn(worker_loop(id, job_rx.clone(), result_tx.clone(), ctx.clone())))
            .collect();
        drop(result_tx);

        let progress_done = CancellationToken::new();
        let progress = self
            .options
            .show_progress
            .then(|| self.spawn_progress(counters.clone(), progress_done.clone()));

        let mut results: HashMap<String, TaskResult> = HashMap::with_capacity(order.len());
        let mut unsuccessful: HashSet<String> = HashSet::new();

        for (level_idx, level) in levels.iter().enumerate() {
            let mut batch = Vec::with_capacity(level.len());

            for name in level {
                let Some(mut job) = jobs.remove(name) else {
                    continue;
                };
                let deps = dependencies.get(name).cloned().unwrap_or_default();

                if self.shutdown.is_cancelled() {
                    job.transition(JobState::Cancelled);
                    results.insert(name.clone(), self.skip(&job, &counters, "executor stopped"));
                    unsuccessful.insert(name.clone());
                    continue;
                }

                if self.options.failure_policy == FailurePolicy::SkipDependents {
                    if let Some(failed_dep) = deps.iter().find(|d| unsuccessful.contains(*d)) {
                        let reason = format!("dependency '{}' did not succeed", failed_dep);
                        job.transition(JobState::DependencyFailed);
                        results.insert(name.clone(), self.skip(&job, &counters, &reason));
                        unsuccessful.insert(name.clone());
                        continue;
                    }
                }

                job.transition(JobState::DependenciesResolved);
                batch.push(WorkItem {
                    job,
                    dependencies: deps,
                });
            }

            if batch.is_empty() {
                continue;
            }

            self.reporter.report(&TaskEvent::LevelStarted {
                level: level_idx,
                task_count: batch.len(),
            });

            let mut submitted = 0usize;
            for mut item in batch {
                item.job.transition(JobState::Dispatched);
                if job_tx.send(item).await.is_err() {
                    warn!("worker pool closed before level was submitted");
                    break;
                }
                submitted += 1;
            }

            // Level barrier: every submitted job reports before the next level starts
            for _ in 0..submitted {
                match result_rx.recv().await {
                    Some(result) => {
                        if !result.is_success() {
                            unsuccessful.insert(result.name.clone());
                        }
                        results.insert(result.name.clone(), result);
                    }
                    None => {
                        warn!("result channel closed before level completed");
                        break;
                    }
                }
            }
            debug!(level = level_idx, submitted, "level complete");
        }

        drop(job_tx);
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "worker terminated abnormally");
            }
        }

        progress_done.cancel();
        if let Some(handle) = progress {
            let _ = handle.await;
        }

        let stats = counters.stats();
        self.reporter.report(&TaskEvent::AllCompleted {
            total: stats.total_tasks,
            succeeded: stats.completed_tasks,
            failed: stats.failed_tasks,
            cached: stats.cached_tasks,
            skipped: stats.skipped_tasks,
            duration: start.elapsed(),
        });
        info!(
            total = stats.total_tasks,
            completed = stats.completed_tasks,
            failed = stats.failed_tasks,
            cached = stats.cached_tasks,
            skipped = stats.skipped_tasks,
            "execution finished"
        );

        let results = order
            .iter()
            .filter_map(|name| results.remove(name))
            .collect();

        Ok(ExecutionReport { stats, results })
    }

    /// Run one task outside of any level, honoring the cache. Returns
    /// whether it succeeded.
    pub async fn execute_single_cached(&self, task: Arc<dyn Task>, use_cache: bool) -> bool {
        let mut dependencies = task.dependencies();
        if dependencies.is_empty() {
            dependencies = self.graph().dependencies(task.name()).to_vec();
        }

        let mut job = Job::new(task.clone())
            .with_max_retries(task.max_retries().unwrap_or(self.options.default_max_retries))
            .with_timeout(task.timeout().or(self.options.default_timeout));
        job.transition(JobState::DependenciesResolved);
        job.transition(JobState::Dispatched);

        let counters = Arc::new(Counters::default());
        counters.total.store(1, Ordering::SeqCst);
        let ctx = self.worker_context(use_cache && self.options.use_cache, counters);

        ctx.run_job(WorkItem { job, dependencies }).await.is_success()
    }

    fn skip(&self, job: &Job, counters: &Counters, reason: &str) -> TaskResult {
        counters.skipped.fetch_add(1, Ordering::SeqCst);
        self.reporter.report(&TaskEvent::Skipped {
            name: job.name().to_string(),
            reason: reason.to_string(),
        });

        let mut result = TaskResult::from_job(job, Duration::ZERO);
        result.error = Some(reason.to_string());
        result
    }

    fn spawn_progress(&self, counters: Arc<Counters>, done: CancellationToken) -> JoinHandle<()> {
        let reporter = self.reporter.clone();
        let interval = self.options.progress_interval.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = done.cancelled() => break,
                    _ = ticker.tick() => reporter.report(&counters.progress()),
                }
            }
        })
    }
}

async fn worker_loop(
    id: usize,
    queue: Arc<AsyncMutex<mpsc::Receiver<WorkItem>>>,
    results: mpsc::UnboundedSender<TaskResult>,
    ctx: Arc<WorkerContext>,
) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(item) = next else {
            break;
        };

        let result = if ctx.shutdown.is_cancelled() {
            ctx.cancel(item.job)
        } else {
            ctx.run_job(item).await
        };

        if results.send(result).is_err() {
            break;
        }
    }
    debug!(worker = id, "worker stopped");
}

impl WorkerContext {
    fn cancel(&self, mut job: Job) -> TaskResult {
        job.transition(JobState::Cancelled);
        self.counters.skipped.fetch_add(1, Ordering::SeqCst);
        self.reporter.report(&TaskEvent::Skipped {
            name: job.name().to_string(),
            reason: "executor stopped".to_string(),
        });

        let mut result = TaskResult::from_job(&job, Duration::ZERO);
        result.error = Some("executor stopped".to_string());
        result
    }

    fn backoff(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        self.backoff_unit.saturating_mul(factor)
    }

    /// Cache input for a job: the task's own input plus the run params,
    /// which reach the task and can change its output.
    fn cache_input(&self, job: &Job) -> String {
        let mut input = job.task.input();
        for param in self.params.iter() {
            input.push('\0');
            input.push_str(param);
        }
        input
    }

    async fn run_job(&self, item: WorkItem) -> TaskResult {
        let WorkItem {
            mut job,
            dependencies,
        } = item;
        let name = job.name().to_string();
        let input = self.cache_input(&job);

        if let Some(cache) = &self.cache {
            if let Some(entry) = cache.get(&name, &input, &dependencies) {
                if entry.success {
                    job.transition(JobState::Succeeded);
                    self.counters.completed.fetch_add(1, Ordering::SeqCst);
                    self.counters.cached.fetch_add(1, Ordering::SeqCst);
                    self.reporter.report(&TaskEvent::Completed {
                        name,
                        duration: Duration::ZERO,
                        cached: true,
                    });

                    let mut result = TaskResult::from_job(&job, Duration::ZERO);
                    result.cached = true;
                    result.output = Some(TaskOutput {
                        output: String::new(),
                        data: entry.result_data,
                    });
                    return result;
                }
                debug!(task = %name, "cached result was a failure, re-running");
            }
        }

        self.counters.begin();
        let started = Instant::now();

        let outcome = loop {
            job.transition(JobState::Running);
            self.reporter.report(&TaskEvent::Started {
                name: name.clone(),
                attempt: job.retry_count,
            });

            match self.attempt(&job).await {
                Ok(output) => break Ok(output),
                Err(error) => {
                    job.transition(JobState::Failed);
                    if !job.can_retry() || self.shutdown.is_cancelled() {
                        break Err(error);
                    }

                    let next = job.retry_count + 1;
                    let delay = self.backoff(next);
                    self.reporter.report(&TaskEvent::Retrying {
                        name: name.clone(),
                        attempt: next,
                        max_retries: job.max_retries,
                        delay,
                        error: error.to_string(),
                    });
                    job.transition(JobState::RetryScheduled);

                    tokio::select! {
                        _ = self.shutdown.cancelled() => {
                            debug!(task = %name, "stopped during retry backoff");
                            break Err(error);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    job.retry_count = next;
                }
            }
        };

        let duration = started.elapsed();
        self.counters.end();

        match outcome {
            Ok(output) => {
                job.transition(JobState::Succeeded);
                self.counters.completed.fetch_add(1, Ordering::SeqCst);
                self.counters
                    .success_micros
                    .fetch_add(duration.as_micros() as u64, Ordering::SeqCst);
                self.store(&job, &input, &output.output, &dependencies, true, output.data.clone());
                self.reporter.report(&TaskEvent::Completed {
                    name,
                    duration,
                    cached: false,
                });

                let mut result = TaskResult::from_job(&job, duration);
                result.output = Some(output);
                result
            }
            Err(error) => {
                job.transition(JobState::FinalFailed);
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                let message = error.to_string();
                self.store(&job, &input, &message, &dependencies, false, None);
                self.reporter.report(&TaskEvent::Failed {
                    name,
                    duration,
                    error: message.clone(),
                });

                let mut result = TaskResult::from_job(&job, duration);
                result.error = Some(message);
                result
            }
        }
    }

    /// One run of the task, isolated in its own tokio task so a panic or a
    /// timeout cannot take the worker down with it.
    async fn attempt(&self, job: &Job) -> Result<TaskOutput, TaskError> {
        let task = job.task.clone();
        let params = self.params.clone();
        let mut handle = tokio::spawn(async move { task.run(&params).await });

        let joined = match job.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    handle.abort();
                    return Err(TaskError::Timeout(limit));
                }
            },
            None => handle.await,
        };

        joined.unwrap_or_else(|e| Err(TaskError::failed(format!("Task panicked: {}", e))))
    }

    /// Record a fresh outcome, dropping results that depended on the old one
    fn store(
        &self,
        job: &Job,
        input: &str,
        output: &str,
        dependencies: &[String],
        success: bool,
        data: Option<serde_json::Value>,
    ) {
        let Some(cache) = &self.cache else {
            return;
        };

        cache.invalidate(job.name());
        let files: Vec<PathBuf> = job.task.file_dependencies();
        if let Err(e) = cache.put(job.name(), input, output, dependencies, &files, success, data) {
            warn!(task = job.name(), error = %e, "failed to store result in cache");
        }
    }
}

/// Errors that abort an execution before any task runs
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Dependency graph is invalid
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Level grouping could not make progress
    #[error(transparent)]
    Scheduling(#[from] SchedulingError),

    /// Two tasks share a name
    #[error("Task '{0}' was supplied more than once")]
    DuplicateTask(String),
}
