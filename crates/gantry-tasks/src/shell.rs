//! Shell command tasks declared in configuration

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use gantry_core::config::TaskConfig;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::task::{Task, TaskError, TaskOutput};

/// A task that runs a command through `sh -c` in a working directory
#[derive(Debug, Clone)]
pub struct ShellTask {
    name: String,
    command: String,
    dependencies: Vec<String>,
    env: BTreeMap<String, String>,
    file_patterns: Vec<String>,
    priority: i32,
    max_retries: Option<u32>,
    timeout: Option<Duration>,
    root_dir: PathBuf,
}

impl ShellTask {
    /// Create a task running `command` from `root_dir`
    pub fn new(name: impl Into<String>, command: impl Into<String>, root_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            dependencies: Vec::new(),
            env: BTreeMap::new(),
            file_patterns: Vec::new(),
            priority: 0,
            max_retries: None,
            timeout: None,
            root_dir: root_dir.into(),
        }
    }

    /// Build a task from its `[tasks.<name>]` table
    pub fn from_config(name: &str, config: &TaskConfig, root_dir: &Path) -> Self {
        Self {
            name: name.to_string(),
            command: config.command.clone(),
            dependencies: config.depends_on.clone(),
            env: config.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            file_patterns: config.files.clone(),
            priority: config.priority,
            max_retries: config.max_retries,
            timeout: config.timeout_secs.map(Duration::from_secs),
            root_dir: root_dir.to_path_buf(),
        }
    }

    pub fn with_dependencies<S: Into<String>>(mut self, deps: impl IntoIterator<Item = S>) -> Self {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add a glob pattern, relative to the root directory, of input files
    pub fn with_files(mut self, pattern: impl Into<String>) -> Self {
        self.file_patterns.push(pattern.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// The command line passed to the shell
    pub fn command(&self) -> &str {
        &self.command
    }
}

#[async_trait]
impl Task for ShellTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> Vec<String> {
        self.dependencies.clone()
    }

    /// Command plus environment, so either change produces a new cache key
    fn input(&self) -> String {
        let mut input = self.command.clone();
        for (key, value) in &self.env {
            input.push('\n');
            input.push_str(key);
            input.push('=');
            input.push_str(value);
        }
        input
    }

    fn file_dependencies(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();

        for pattern in &self.file_patterns {
            let full = self.root_dir.join(pattern);
            let Some(full) = full.to_str() else {
                warn!(task = %self.name, pattern = %pattern, "non UTF-8 file pattern ignored");
                continue;
            };

            match glob::glob(full) {
                Ok(paths) => files.extend(paths.flatten().filter(|p| p.is_file())),
                Err(e) => warn!(task = %self.name, pattern = %pattern, error = %e, "invalid file pattern"),
            }
        }

        files.sort();
        files.dedup();
        files
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run the command. Extra params become the shell's positional arguments.
    async fn run(&self, params: &[String]) -> Result<TaskOutput, TaskError> {
        debug!(task = %self.name, command = %self.command, "running shell command");

        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .arg("sh")
            .args(params)
            .envs(&self.env)
            .current_dir(&self.root_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| TaskError::Spawn(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();

        if output.status.success() {
            Ok(TaskOutput::new(stdout))
        } else {
            let code = output.status.code().unwrap_or(-1);
            Err(TaskError::failed(format!(
                "Command exited with code {}: {}",
                code, stderr
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let temp = TempDir::new().unwrap();
        let task = ShellTask::new("hello", "echo hello", temp.path());

        let output = task.run(&[]).await.unwrap();
        assert_eq!(output.output, "hello");
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails() {
        let temp = TempDir::new().unwrap();
        let task = ShellTask::new("fail", "echo broken >&2; exit 3", temp.path());

        let err = task.run(&[]).await.unwrap_err();
        assert_eq!(
            err,
            TaskError::Failed("Command exited with code 3: broken".to_string())
        );
    }

    #[tokio::test]
    async fn test_env_and_params() {
        let temp = TempDir::new().unwrap();
        let task = ShellTask::new("greet", "echo \"$GREETING $1\"", temp.path())
            .with_env("GREETING", "hi");

        let output = task.run(&["there".to_string()]).await.unwrap();
        assert_eq!(output.output, "hi there");
    }

    #[tokio::test]
    async fn test_runs_in_root_dir() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("marker.txt"), "found").unwrap();
        let task = ShellTask::new("cat", "cat marker.txt", temp.path());

        assert_eq!(task.run(&[]).await.unwrap().output, "found");
    }

    #[test]
    fn test_input_tracks_command_and_env() {
        let base = ShellTask::new("build", "make", ".");
        let with_env = base.clone().with_env("PROFILE", "release");

        assert_eq!(base.input(), "make");
        assert_ne!(base.input(), with_env.input());
    }

    #[test]
    fn test_file_dependencies_expand_globs() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("src")).unwrap();
        std::fs::write(temp.path().join("src/b.rs"), "").unwrap();
        std::fs::write(temp.path().join("src/a.rs"), "").unwrap();
        std::fs::write(temp.path().join("src/notes.md"), "").unwrap();

        let task = ShellTask::new("build", "true", temp.path())
            .with_files("src/*.rs")
            .with_files("src/a.rs");

        let files = task.file_dependencies();
        assert_eq!(
            files,
            vec![temp.path().join("src/a.rs"), temp.path().join("src/b.rs")]
        );
    }

    #[test]
    fn test_from_config() {
        let config = TaskConfig {
            command: "cargo test".to_string(),
            depends_on: vec!["build".to_string()],
            env: HashMap::from([("RUST_LOG".to_string(), "debug".to_string())]),
            priority: 2,
            max_retries: Some(1),
            timeout_secs: Some(30),
            ..Default::default()
        };

        let task = ShellTask::from_config("test", &config, Path::new("/tmp"));
        assert_eq!(task.name(), "test");
        assert_eq!(task.command(), "cargo test");
        assert_eq!(task.dependencies(), vec!["build"]);
        assert_eq!(task.priority(), 2);
        assert_eq!(task.max_retries(), Some(1));
        assert_eq!(task.timeout(), Some(Duration::from_secs(30)));
        assert!(task.input().contains("RUST_LOG=debug"));
    }
}
