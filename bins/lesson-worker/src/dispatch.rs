/// Runner Dispatch - maps runner ids to execution backends
///
/// **Core Responsibility:**
/// Execute a code fragment with the backend selected by a runner id and
/// report pass/fail.
///
/// **Boundary:**
/// - Backends know HOW code runs (container, interpreter subprocess)
/// - Backends never run code inside the orchestrator's own process
/// - The orchestrator only sees `TestOutcome`

use crate::config::RunnerConfigManager;
use crate::engine::DockerBackend;
use crate::error::RunError;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use lesson_common::runners::{RunnerConfig, RunnerKind};
use lesson_common::types::TestOutcome;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Code larger than this never reaches a backend
pub const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024;

#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Run `code` to completion. `Err` means the backend itself failed;
    /// a failing test is `Ok` with `passed == false`.
    async fn execute(&self, code: &str) -> Result<TestOutcome>;
}

pub(crate) fn check_source_size(code: &str) -> Result<()> {
    if code.len() > MAX_SOURCE_CODE_BYTES {
        bail!("Source code exceeds maximum size of {} bytes", MAX_SOURCE_CODE_BYTES);
    }
    Ok(())
}

/// Last non-empty stderr line, which is where interpreters put the assertion message
pub(crate) fn error_line(stderr: &str) -> Option<String> {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

#[derive(Default, Clone)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn ExecutionBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one backend per configured runner. A runner whose backend can't
    /// be set up is skipped; lessons using it fail as unsupported.
    pub fn from_config(config: &RunnerConfigManager) -> Self {
        let mut registry = Self::new();
        for runner in config.runners() {
            let backend: Arc<dyn ExecutionBackend> = match runner.kind {
                RunnerKind::Docker => match DockerBackend::new(runner) {
                    Ok(backend) => Arc::new(backend),
                    Err(e) => {
                        warn!(runner = %runner.id, error = %format!("{:#}", e), "Skipping runner");
                        continue;
                    }
                },
                RunnerKind::Process => Arc::new(ProcessBackend::from_config(runner)),
            };
            registry.register(runner.id.clone(), backend);
        }
        registry
    }

    pub fn runner_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.backends.keys().map(String::as_str).collect();
        ids.sort();
        ids
    }

    pub fn register(&mut self, runner_id: impl Into<String>, backend: Arc<dyn ExecutionBackend>) {
        self.backends.insert(runner_id.into(), backend);
    }

    pub fn get(&self, runner_id: &str) -> Result<Arc<dyn ExecutionBackend>, RunError> {
        self.backends
            .get(runner_id)
            .cloned()
            .ok_or_else(|| RunError::UnsupportedRunner(runner_id.to_string()))
    }
}

/// Interpreter subprocess backend: code is written to stdin, exit 0 passes
pub struct ProcessBackend {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessBackend {
    pub fn new(command: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(runner: &RunnerConfig) -> Self {
        Self::new(
            runner.command.clone(),
            runner.args.clone(),
            Duration::from_millis(runner.timeout_ms),
        )
    }
}

#[async_trait]
impl ExecutionBackend for ProcessBackend {
    #[tracing::instrument(skip(self, code), fields(command = %self.command))]
    async fn execute(&self, code: &str) -> Result<TestOutcome> {
        check_source_size(code)?;

        let start = Instant::now();
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn '{}'", self.command))?;

        // Feed stdin from its own task so a chatty child can't deadlock us
        if let Some(mut stdin) = child.stdin.take() {
            let source = code.to_string();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(source.as_bytes()).await {
                    debug!(error = %e, "Child closed stdin early");
                }
            });
        }

        // Dropping the future on timeout drops the child, which kills it
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output.context("Failed to collect interpreter output")?,
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Execution timed out");
                return Ok(TestOutcome::failed(format!(
                    "Timed out after {}ms",
                    self.timeout.as_millis()
                )));
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(
            execution_ms = start.elapsed().as_millis() as u64,
            exit_code = ?output.status.code(),
            "Interpreter exited"
        );

        if output.status.success() {
            Ok(TestOutcome::passed())
        } else {
            let message = error_line(&stderr).unwrap_or_else(|| match output.status.code() {
                Some(code) => format!("Exited with code {}", code),
                None => "Terminated by signal".to_string(),
            });
            Ok(TestOutcome::failed(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(timeout_ms: u64) -> ProcessBackend {
        ProcessBackend::new("sh", vec![], Duration::from_millis(timeout_ms))
    }

    #[test]
    fn test_error_line() {
        assert_eq!(error_line("trace\nAssertionError: 2 != 3\n\n"), Some("AssertionError: 2 != 3".to_string()));
        assert_eq!(error_line("  \n"), None);
    }

    #[test]
    fn test_source_size_guard() {
        assert!(check_source_size("x").is_ok());
        assert!(check_source_size(&"x".repeat(MAX_SOURCE_CODE_BYTES + 1)).is_err());
    }

    #[test]
    fn test_unknown_runner_is_unsupported() {
        let registry = BackendRegistry::new();
        assert!(matches!(registry.get("ruby"), Err(RunError::UnsupportedRunner(id)) if id == "ruby"));
    }

    #[tokio::test]
    async fn test_registry_from_config_keeps_process_runners() {
        let runners = vec![
            RunnerConfig {
                id: "node".to_string(),
                kind: RunnerKind::Process,
                command: "node".to_string(),
                args: vec!["-".to_string()],
                file_extension: ".js".to_string(),
                image: None,
                memory_limit_mb: 128,
                cpu_limit: 0.5,
                timeout_ms: 5000,
            },
            RunnerConfig {
                id: "python".to_string(),
                kind: RunnerKind::Docker,
                command: "python3".to_string(),
                args: vec![],
                file_extension: ".py".to_string(),
                image: Some("python:3.12-slim".to_string()),
                memory_limit_mb: 128,
                cpu_limit: 0.5,
                timeout_ms: 5000,
            },
        ];
        let config = RunnerConfigManager::from_configs(runners).unwrap();

        // Builds whether or not a Docker daemon is reachable
        let registry = BackendRegistry::from_config(&config);
        assert!(registry.get("node").is_ok());
        assert!(registry.runner_ids().contains(&"node"));
        assert!(matches!(registry.get("ruby"), Err(RunError::UnsupportedRunner(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_backend_pass() {
        let outcome = sh(5000).execute("exit 0").await.unwrap();
        assert_eq!(outcome, TestOutcome::passed());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_backend_failure_reports_stderr() {
        let outcome = sh(5000)
            .execute("echo 'expected 3, got 2' >&2\nexit 3")
            .await
            .unwrap();
        assert!(!outcome.passed);
        assert_eq!(outcome.error.as_deref(), Some("expected 3, got 2"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_backend_failure_without_stderr() {
        let outcome = sh(5000).execute("exit 4").await.unwrap();
        assert_eq!(outcome.error.as_deref(), Some("Exited with code 4"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_backend_timeout() {
        let outcome = sh(100).execute("sleep 5").await.unwrap();
        assert!(!outcome.passed);
        assert!(outcome.error.unwrap().starts_with("Timed out"));
    }

    #[tokio::test]
    async fn test_process_backend_missing_binary() {
        let backend = ProcessBackend::new("definitely-not-an-interpreter", vec![], Duration::from_secs(1));
        assert!(backend.execute("1").await.is_err());
    }
}
