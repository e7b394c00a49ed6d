//! Default configuration values

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "gantry.toml";

/// Alternative configuration file name
pub const ALT_CONFIG_FILE: &str = ".gantry.toml";

/// Get list of config file names to search for
pub fn config_file_names() -> Vec<&'static str> {
    vec![DEFAULT_CONFIG_FILE, ALT_CONFIG_FILE]
}

/// Default worker count: the machine's available parallelism
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Default configuration template
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Gantry Configuration

[executor]
max_concurrent = 4
use_cache = true
backoff_unit_ms = 1000
continue_on_failure = false

[cache]
enabled = true
dir = ".gantry/cache"
max_age_secs = 604800
max_entries = 1000

[tasks.build]
command = "cargo build"
files = ["src/**/*.rs", "Cargo.toml"]

[tasks.test]
command = "cargo test"
depends_on = ["build"]
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_template_parses() {
        let config: Config = toml::from_str(DEFAULT_CONFIG_TEMPLATE).unwrap();
        assert_eq!(config.executor.max_concurrent, 4);
        assert_eq!(config.tasks["test"].depends_on, vec!["build"]);
    }
}
