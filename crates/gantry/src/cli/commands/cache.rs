//! Cache management command

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Subcommand};
use console::style;

use gantry_tasks::{CacheOptions, ResultCache};

use super::load_project_lenient;
use crate::cli::{Cli, OutputFormat};

/// Result cache management
#[derive(Debug, Args)]
pub struct CacheCommand {
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Show cache statistics
    Status(CacheStatusCommand),
    /// Remove old cache entries
    Prune(CachePruneCommand),
    /// Clear all cached entries
    Clean(CacheCleanCommand),
    /// Drop cached results of a task and of everything depending on it
    Invalidate(CacheInvalidateCommand),
}

/// Show cache statistics
#[derive(Debug, Args)]
pub struct CacheStatusCommand;

/// Prune old cache entries
#[derive(Debug, Args)]
pub struct CachePruneCommand {
    /// Maximum age in days (default: 7)
    #[arg(long, default_value = "7")]
    pub max_age_days: u64,
}

/// Clear all cached entries
#[derive(Debug, Args)]
pub struct CacheCleanCommand {
    /// Skip confirmation
    #[arg(short = 'y', long)]
    pub yes: bool,
}

/// Invalidate one task's results
#[derive(Debug, Args)]
pub struct CacheInvalidateCommand {
    /// Task name
    pub task: String,
}

impl CacheCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        match &self.action {
            CacheAction::Status(cmd) => cmd.execute(cli),
            CacheAction::Prune(cmd) => cmd.execute(cli),
            CacheAction::Clean(cmd) => cmd.execute(cli),
            CacheAction::Invalidate(cmd) => cmd.execute(cli),
        }
    }
}

fn open_cache(cwd: &Path) -> anyhow::Result<ResultCache> {
    let (config, root) = load_project_lenient(cwd);
    let options = CacheOptions::from_config(&config.cache, config.cache_dir(&root));
    ResultCache::open(options).context("Failed to open result cache")
}

impl CacheStatusCommand {
    fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let cache = open_cache(&std::env::current_dir()?)?;
        let stats = cache.stats()?;

        if cli.format == OutputFormat::Json {
            let result = serde_json::json!({
                "entries": stats.entries,
                "size_on_disk": stats.size_on_disk,
                "size_formatted": stats.formatted_size(),
                "hit_rate": stats.hit_rate,
                "cache_dir": cache.cache_dir().display().to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else if !cli.quiet {
            println!("{}", style("Result Cache Status").bold());
            println!();
            println!("  Location: {}", style(cache.cache_dir().display()).cyan());
            println!("  Entries:  {}", stats.entries);
            println!("  Size:     {}", style(stats.formatted_size()).yellow());
        }

        Ok(())
    }
}

impl CachePruneCommand {
    fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let cache = open_cache(&std::env::current_dir()?)?;
        let max_age = Duration::from_secs(self.max_age_days * 24 * 60 * 60);

        if !cli.quiet && cli.format == OutputFormat::Text {
            println!(
                "{} Pruning cache entries older than {} days...",
                style("→").blue(),
                self.max_age_days
            );
        }

        let stats = cache.prune(max_age);

        if cli.format == OutputFormat::Json {
            let result = serde_json::json!({
                "total": stats.total,
                "removed": stats.removed,
                "kept": stats.kept,
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else if !cli.quiet {
            println!(
                "  {} Removed {} of {} entries ({} kept)",
                style("✓").green(),
                stats.removed,
                stats.total,
                stats.kept
            );
        }

        Ok(())
    }
}

impl CacheCleanCommand {
    fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let cwd = std::env::current_dir()?;
        let (config, root) = load_project_lenient(&cwd);
        let cache_dir = config.cache_dir(&root);

        if !cache_dir.exists() {
            if !cli.quiet {
                println!("{} Cache directory does not exist.", style("✓").green());
            }
            return Ok(());
        }

        if !self.yes {
            let confirmed = dialoguer::Confirm::new()
                .with_prompt(format!(
                    "Remove all cached entries at {}?",
                    cache_dir.display()
                ))
                .default(false)
                .interact()?;

            if !confirmed {
                println!("{}", style("Aborted.").yellow());
                return Ok(());
            }
        }

        let cache = ResultCache::open(CacheOptions::from_config(&config.cache, &cache_dir))
            .context("Failed to open result cache")?;
        let removed = cache.len();
        cache.clear()?;

        if cli.format == OutputFormat::Json {
            let result = serde_json::json!({
                "removed": removed,
                "cache_dir": cache_dir.display().to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else if !cli.quiet {
            println!(
                "{} Cache cleared at {} ({} entries)",
                style("✓").green(),
                style(cache_dir.display()).cyan(),
                removed
            );
        }

        Ok(())
    }
}

impl CacheInvalidateCommand {
    fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let cache = open_cache(&std::env::current_dir()?)?;
        let removed = cache.invalidate(&self.task);

        if cli.format == OutputFormat::Json {
            let result = serde_json::json!({
                "task": self.task,
                "removed": removed,
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else if !cli.quiet {
            println!(
                "{} Invalidated {} entr{} for {}",
                style("✓").green(),
                removed,
                if removed == 1 { "y" } else { "ies" },
                style(&self.task).bold()
            );
        }

        Ok(())
    }
}
