//! Configuration validation

use tracing::debug;

use crate::error::{ConfigError, Result};

use super::types::Config;

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    debug!("validating configuration");
    validate_executor(config)?;
    validate_cache(config)?;
    validate_tasks(config)?;
    debug!("configuration validation passed");
    Ok(())
}

fn validate_executor(config: &Config) -> Result<()> {
    if config.executor.max_concurrent == 0 {
        return Err(ConfigError::invalid("executor.max_concurrent", "must be at least 1").into());
    }

    if config.executor.show_progress && config.executor.progress_interval_ms == 0 {
        return Err(ConfigError::invalid(
            "executor.progress_interval_ms",
            "must be greater than zero when progress is enabled",
        )
        .into());
    }

    if config.executor.default_timeout_secs == Some(0) {
        return Err(ConfigError::invalid(
            "executor.default_timeout_secs",
            "must be greater than zero",
        )
        .into());
    }

    Ok(())
}

fn validate_cache(config: &Config) -> Result<()> {
    if config.cache.enabled && config.cache.max_entries == 0 {
        return Err(ConfigError::invalid("cache.max_entries", "must be at least 1").into());
    }

    Ok(())
}

fn validate_tasks(config: &Config) -> Result<()> {
    if !config.tasks.is_empty() {
        debug!(count = config.tasks.len(), "validating tasks");
    }

    for (name, task) in &config.tasks {
        if task.command.trim().is_empty() {
            return Err(ConfigError::invalid(
                format!("tasks.{}.command", name),
                "command cannot be empty",
            )
            .into());
        }

        if task.depends_on.iter().any(|dep| dep == name) {
            return Err(ConfigError::invalid(
                format!("tasks.{}.depends_on", name),
                "a task cannot depend on itself",
            )
            .into());
        }

        if task.timeout_secs == Some(0) {
            return Err(ConfigError::invalid(
                format!("tasks.{}.timeout_secs", name),
                "must be greater than zero",
            )
            .into());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaskConfig;

    fn task(command: &str) -> TaskConfig {
        TaskConfig {
            command: command.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_default_config() {
        let config = Config::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_zero_concurrency() {
        let mut config = Config::default();
        config.executor.max_concurrent = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_max_entries() {
        let mut config = Config::default();
        config.cache.max_entries = 0;
        assert!(validate_config(&config).is_err());

        config.cache.enabled = false;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_empty_command() {
        let mut config = Config::default();
        config.tasks.insert("build".to_string(), task("  "));
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("tasks.build.command"));
    }

    #[test]
    fn test_validate_self_dependency() {
        let mut config = Config::default();
        let mut build = task("make");
        build.depends_on.push("build".to_string());
        config.tasks.insert("build".to_string(), build);
        assert!(validate_config(&config).is_err());
    }
}
