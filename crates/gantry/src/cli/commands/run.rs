//! Run command: execute configured tasks and everything they depend on

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use gantry_core::Config;
use gantry_tasks::level::execution_plan;
use gantry_tasks::{
    CacheOptions, DependencyGraph, ExecutionReport, Executor, ExecutorOptions, FailurePolicy,
    LevelScheduler, ResultCache, ShellTask, Task, TaskEvent, TaskReporter, TaskReporterRegistry,
};

use super::load_project;
use crate::cli::{Cli, OutputFormat};

/// Run tasks and their dependencies
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Tasks to run (e.g., build test lint)
    #[arg(required = true)]
    pub tasks: Vec<String>,

    /// Maximum concurrent tasks
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Disable the result cache
    #[arg(long)]
    pub no_cache: bool,

    /// Run dependents of failed tasks anyway
    #[arg(long)]
    pub continue_on_failure: bool,

    /// Show execution plan without running
    #[arg(long)]
    pub dry_run: bool,

    /// Show a progress bar
    #[arg(long)]
    pub progress: bool,

    /// Arguments passed to every task command
    #[arg(last = true)]
    pub params: Vec<String>,
}

impl RunCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.execute_async(cli))
    }

    async fn execute_async(&self, cli: &Cli) -> anyhow::Result<()> {
        let cwd = std::env::current_dir()?;
        let (config, root) = load_project(&cwd)?;

        let names = collect_task_names(&config, &self.tasks)?;
        let tasks: Vec<Arc<dyn Task>> = names
            .iter()
            .filter_map(|name| {
                config
                    .tasks
                    .get(name)
                    .map(|cfg| Arc::new(ShellTask::from_config(name, cfg, &root)) as Arc<dyn Task>)
            })
            .collect();

        if self.dry_run {
            return self.print_plan(cli, &tasks);
        }

        let use_cache = !self.no_cache && config.executor.use_cache && config.cache.enabled;
        let cache = if use_cache {
            let options = CacheOptions::from_config(&config.cache, config.cache_dir(&root));
            Some(Arc::new(
                ResultCache::open(options).context("Failed to open result cache")?,
            ))
        } else {
            None
        };

        let mut options = ExecutorOptions::from(&config.executor);
        if let Some(concurrency) = self.concurrency {
            options.max_concurrent = concurrency.max(1);
        }
        if self.continue_on_failure {
            options.failure_policy = FailurePolicy::Continue;
        }
        options.use_cache = use_cache;
        options.show_progress |= self.progress;
        options.params = self.params.clone();

        let console_output = !cli.quiet && cli.format == OutputFormat::Text;
        if console_output {
            println!(
                "{} {} task{}",
                style("→").blue(),
                tasks.len(),
                if tasks.len() == 1 { "" } else { "s" }
            );
            println!();
        }

        let mut reporters = TaskReporterRegistry::new();
        if console_output {
            let bar = options.show_progress.then(|| progress_bar(tasks.len()));
            reporters.register(ConsoleReporter::new(cli.verbose, bar));
        }
        let reporter: Arc<dyn TaskReporter> = Arc::new(reporters);

        let executor = Arc::new(Executor::new(options, cache, reporter));
        let stopper = executor.clone();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                stopper.stop();
            }
        });

        let report = executor.execute_concurrent(tasks).await;
        interrupt.abort();
        let report = report?;

        if cli.format == OutputFormat::Json {
            println!("{}", serde_json::to_string_pretty(&report_json(&report))?);
        }

        let failures: Vec<_> = report.failures().collect();
        if !failures.is_empty() {
            if console_output {
                println!();
                println!(
                    "  {} {}/{} tasks did not succeed:",
                    style("✗").red().bold(),
                    failures.len(),
                    report.results.len()
                );
                for result in &failures {
                    println!(
                        "    {} {} [{}]: {}",
                        style("✗").red(),
                        result.name,
                        result.state,
                        result.error.as_deref().unwrap_or("unknown error")
                    );
                }
            }
            anyhow::bail!(
                "{} task{} did not succeed",
                failures.len(),
                if failures.len() == 1 { "" } else { "s" }
            );
        }

        Ok(())
    }

    fn print_plan(&self, cli: &Cli, tasks: &[Arc<dyn Task>]) -> anyhow::Result<()> {
        let mut graph = DependencyGraph::new();
        for task in tasks {
            graph.add_dependency(task.name(), &task.dependencies())?;
        }
        let names: Vec<&str> = tasks.iter().map(|t| t.name()).collect();
        graph.validate_dependencies(&names)?;

        let priorities = tasks
            .iter()
            .map(|t| (t.name().to_string(), t.priority()))
            .collect();
        let levels = LevelScheduler::new(&graph)
            .with_priorities(priorities)
            .plan(&names)?;

        if cli.format == OutputFormat::Json {
            let plan: Vec<serde_json::Value> = levels
                .iter()
                .enumerate()
                .map(|(i, level)| serde_json::json!({ "level": i, "tasks": level }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&plan)?);
        } else if !cli.quiet {
            println!();
            print!("{}", execution_plan(&graph, &levels));
            println!();
            println!("{}", style("[DRY RUN - no tasks will be executed]").yellow().bold());
        }

        Ok(())
    }
}

/// Names of `roots` plus every configured task they reach through
/// `depends_on`, in discovery order.
///
/// Dependencies with no `[tasks.<name>]` entry are left out here; the
/// executor reports them as missing.
fn collect_task_names(config: &Config, roots: &[String]) -> anyhow::Result<Vec<String>> {
    for root in roots {
        if !config.tasks.contains_key(root) {
            let mut known: Vec<&str> = config.tasks.keys().map(String::as_str).collect();
            known.sort_unstable();
            anyhow::bail!(
                "Unknown task '{}' (configured: {})",
                root,
                if known.is_empty() {
                    "none".to_string()
                } else {
                    known.join(", ")
                }
            );
        }
    }

    let mut selected = Vec::new();
    let mut seen = HashSet::new();
    let mut stack: Vec<&str> = roots.iter().rev().map(String::as_str).collect();

    while let Some(name) = stack.pop() {
        if !seen.insert(name) {
            continue;
        }
        let Some(task) = config.tasks.get(name) else {
            continue;
        };
        selected.push(name.to_string());
        stack.extend(task.depends_on.iter().rev().map(String::as_str));
    }

    Ok(selected)
}

fn report_json(report: &ExecutionReport) -> serde_json::Value {
    let stats = &report.stats;
    serde_json::json!({
        "total": stats.total_tasks,
        "completed": stats.completed_tasks,
        "failed": stats.failed_tasks,
        "cached": stats.cached_tasks,
        "skipped": stats.skipped_tasks,
        "success_rate": stats.success_rate(),
        "total_duration_ms": stats.total_duration.as_millis() as u64,
        "average_duration_ms": stats.average_duration.as_millis() as u64,
        "max_concurrent": stats.max_concurrent_observed,
        "tasks": report.results.iter().map(|r| {
            serde_json::json!({
                "name": r.name,
                "state": r.state.to_string(),
                "cached": r.cached,
                "retries": r.retry_count,
                "duration_ms": r.duration.as_millis() as u64,
                "error": r.error,
            })
        }).collect::<Vec<_>>(),
    })
}

fn progress_bar(total: usize) -> ProgressBar {
    let bar = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("  [{elapsed_precise}] {bar:30.cyan/blue} {pos}/{len} {msg}")
        .map(|s| s.progress_chars("█▓░"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    bar
}

/// Console reporter with optional progress bar
struct ConsoleReporter {
    verbose: bool,
    progress: Option<ProgressBar>,
}

impl ConsoleReporter {
    fn new(verbose: bool, progress: Option<ProgressBar>) -> Self {
        Self { verbose, progress }
    }

    fn line(&self, text: String) {
        match &self.progress {
            Some(bar) => bar.println(text),
            None => println!("{}", text),
        }
    }
}

impl TaskReporter for ConsoleReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Started { name, attempt } => {
                if *attempt == 0 || self.verbose {
                    self.line(format!("  {} {}", style("▸").dim(), style(name).bold()));
                }
            }
            TaskEvent::Completed {
                name,
                duration,
                cached,
            } => {
                let cached = if *cached {
                    format!(" {}", style("(cached)").cyan())
                } else {
                    String::new()
                };
                self.line(format!(
                    "  {} {}{} {}",
                    style("✓").green(),
                    style(name).green(),
                    cached,
                    style(format!("{:.1}s", duration.as_secs_f64())).dim()
                ));
            }
            TaskEvent::Retrying {
                name,
                attempt,
                max_retries,
                delay,
                error,
            } => {
                self.line(format!(
                    "  {} {} retry {}/{} in {:.1}s {}",
                    style("↻").yellow(),
                    style(name).yellow(),
                    attempt,
                    max_retries,
                    delay.as_secs_f64(),
                    style(error).dim()
                ));
            }
            TaskEvent::Failed {
                name,
                duration,
                error,
            } => {
                self.line(format!(
                    "  {} {} {} {}",
                    style("✗").red(),
                    style(name).red(),
                    style(format!("{:.1}s", duration.as_secs_f64())).dim(),
                    style(error).red().dim()
                ));
            }
            TaskEvent::Skipped { name, reason } => {
                self.line(format!(
                    "  {} {} {}",
                    style("○").yellow(),
                    style(name).yellow(),
                    style(format!("({})", reason)).dim()
                ));
            }
            TaskEvent::LevelStarted { level, task_count } => {
                if self.verbose {
                    self.line(format!(
                        "  {} Level {} ({} tasks)",
                        style("─").dim(),
                        level,
                        task_count
                    ));
                }
            }
            TaskEvent::Progress {
                completed,
                failed,
                cached,
                in_flight,
                ..
            } => {
                if let Some(bar) = &self.progress {
                    bar.set_position((completed + failed) as u64);
                    bar.set_message(format!("{} running, {} cached", in_flight, cached));
                }
            }
            TaskEvent::AllCompleted {
                total,
                succeeded,
                failed,
                cached,
                skipped,
                duration,
            } => {
                if let Some(bar) = &self.progress {
                    bar.finish_and_clear();
                }
                println!();
                println!(
                    "  {} {}/{} succeeded, {} failed, {} cached, {} skipped ({:.1}s)",
                    if *failed == 0 && *skipped == 0 {
                        style("✓").green().bold()
                    } else {
                        style("✗").red().bold()
                    },
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

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::TaskConfig;

    fn task(command: &str, deps: &[&str]) -> TaskConfig {
        TaskConfig {
            command: command.to_string(),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            ..Default::default()
        }
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.tasks.insert("build".to_string(), task("make", &[]));
        config.tasks.insert("test".to_string(), task("make test", &["build"]));
        config.tasks.insert("lint".to_string(), task("make lint", &[]));
        config
            .tasks
            .insert("release".to_string(), task("make dist", &["test", "lint"]));
        config
    }

    #[test]
    fn test_collects_transitive_dependencies() {
        let names = collect_task_names(&config(), &["release".to_string()]).unwrap();
        assert_eq!(names, vec!["release", "test", "build", "lint"]);
    }

    #[test]
    fn test_collect_only_requested_subtree() {
        let names = collect_task_names(&config(), &["test".to_string()]).unwrap();
        assert_eq!(names, vec!["test", "build"]);
    }

    #[test]
    fn test_unknown_task_rejected() {
        let err = collect_task_names(&config(), &["deploy".to_string()]).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("deploy"));
        assert!(message.contains("build, lint, release, test"));
    }

    #[test]
    fn test_undefined_dependency_left_to_executor() {
        let mut config = Config::default();
        config
            .tasks
            .insert("build".to_string(), task("make", &["codegen"]));

        let names = collect_task_names(&config, &["build".to_string()]).unwrap();
        assert_eq!(names, vec!["build"]);
    }
}
