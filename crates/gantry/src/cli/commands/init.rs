//! Init command

use clap::Args;
use console::style;

use gantry_core::config::{DEFAULT_CONFIG_FILE, DEFAULT_CONFIG_TEMPLATE};

use crate::cli::{Cli, OutputFormat};

/// Write a starter configuration into the working directory
#[derive(Debug, Args)]
pub struct InitCommand {
    /// Overwrite an existing config file
    #[arg(long)]
    pub force: bool,
}

impl InitCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let path = std::env::current_dir()?.join(DEFAULT_CONFIG_FILE);

        if path.exists() && !self.force {
            anyhow::bail!(
                "{} already exists (use --force to overwrite)",
                path.display()
            );
        }

        std::fs::write(&path, DEFAULT_CONFIG_TEMPLATE)?;
        tracing::info!(path = %path.display(), "config written");

        if cli.format == OutputFormat::Json {
            let result = serde_json::json!({ "path": path.display().to_string() });
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else if !cli.quiet {
            println!(
                "{} Created {}",
                style("✓").green(),
                style(path.display()).cyan()
            );
        }

        Ok(())
    }
}
