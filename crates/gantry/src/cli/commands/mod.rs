//! CLI commands

mod cache;
mod init;
mod run;

pub use cache::CacheCommand;
pub use init::InitCommand;
pub use run::RunCommand;

use std::path::{Path, PathBuf};

use gantry_core::config::{load_config_from_dir, load_config_or_default};
use gantry_core::{Config, ConfigError, GantryError};

/// Directory tasks run from: the one holding the config file, or `cwd`
/// when there is none. A config under `.config/` belongs to its parent.
fn project_root(config_path: Option<&Path>, cwd: &Path) -> PathBuf {
    let Some(dir) = config_path.and_then(Path::parent) else {
        return cwd.to_path_buf();
    };

    if dir.file_name().is_some_and(|name| name == ".config") {
        dir.parent().unwrap_or(dir).to_path_buf()
    } else {
        dir.to_path_buf()
    }
}

/// Load the project config, falling back to defaults only when no config
/// file exists. A config that fails to parse or validate is an error.
fn load_project(cwd: &Path) -> anyhow::Result<(Config, PathBuf)> {
    match load_config_from_dir(cwd) {
        Ok((config, path)) => {
            let root = project_root(Some(&path), cwd);
            Ok((config, root))
        }
        Err(GantryError::Config(ConfigError::NotFound(_))) => {
            tracing::debug!(dir = %cwd.display(), "no config file, using defaults");
            Ok((Config::default(), cwd.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Load the project config, warning and using defaults on any failure
fn load_project_lenient(cwd: &Path) -> (Config, PathBuf) {
    let (config, path) = load_config_or_default(cwd);
    let root = project_root(path.as_deref(), cwd);
    (config, root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_project_root() {
        let cwd = Path::new("/work/app/src");
        assert_eq!(project_root(None, cwd), cwd);
        assert_eq!(
            project_root(Some(Path::new("/work/app/gantry.toml")), cwd),
            Path::new("/work/app")
        );
        assert_eq!(
            project_root(Some(Path::new("/work/app/.config/gantry.toml")), cwd),
            Path::new("/work/app")
        );
    }

    #[test]
    fn test_load_project_finds_config() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("isolated");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(nested.join("gantry.toml"), "[tasks.build]\ncommand = \"make\"\n").unwrap();

        let (config, root) = load_project(&nested).unwrap();
        assert_eq!(root, nested);
        assert!(config.tasks.contains_key("build"));
    }

    #[test]
    fn test_load_project_rejects_invalid_config() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("gantry.toml"),
            "[executor]\nmax_concurrent = 0\n",
        )
        .unwrap();

        assert!(load_project(temp.path()).is_err());
    }
}
