/// Docker Execution Backend
///
/// **Core Responsibility:**
/// Run one code fragment in a throwaway container and report pass/fail.
///
/// **Docker Execution Rules:**
/// 1. Pulls the runner's image if not present
/// 2. Creates the container with network disabled and CPU/memory limits
/// 3. Passes the code base64-encoded in `SOURCE_CODE`
/// 4. Exit code 0 passes; otherwise the last stderr line is the error
/// 5. Hard timeout per execution
/// 6. Container removed on drop, including when the worker is terminated

use crate::dispatch::{check_source_size, error_line, ExecutionBackend};
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use lesson_common::runners::RunnerConfig;
use lesson_common::types::TestOutcome;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Container cleanup guard - removes the container even if the execution
/// future is dropped mid-flight (timeout or worker termination)
struct ContainerGuard<'a> {
    docker: &'a Docker,
    container_id: String,
}

impl<'a> ContainerGuard<'a> {
    fn new(docker: &'a Docker, container_id: String) -> Self {
        Self { docker, container_id }
    }
}

impl<'a> Drop for ContainerGuard<'a> {
    fn drop(&mut self) {
        // Drop can't be async; hand removal to the runtime
        let container_id = self.container_id.clone();
        let docker = self.docker.clone();

        tokio::spawn(async move {
            let remove_options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };

            if let Err(e) = docker.remove_container(&container_id, Some(remove_options)).await {
                warn!(container_id = %container_id, error = %e, "Failed to clean up container");
            }
        });
    }
}

fn image_name(runner: &RunnerConfig) -> String {
    runner
        .image
        .clone()
        .unwrap_or_else(|| format!("lessonrun-{}:latest", runner.id))
}

fn memory_limit(runner: &RunnerConfig) -> i64 {
    (runner.memory_limit_mb as i64) * 1024 * 1024
}

fn cpu_limit(runner: &RunnerConfig) -> i64 {
    (runner.cpu_limit as f64 * 1_000_000_000.0) as i64
}

/// Decode SOURCE_CODE into a file and hand it to the runner's command
fn container_command(runner: &RunnerConfig) -> Vec<String> {
    let file = format!("/tmp/lesson{}", runner.file_extension);
    let mut invocation = vec![runner.command.clone()];
    invocation.extend(runner.args.iter().cloned());
    invocation.push(file.clone());
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("echo \"$SOURCE_CODE\" | base64 -d > {} && exec {}", file, invocation.join(" ")),
    ]
}

pub struct DockerBackend {
    docker: Docker,
    runner: RunnerConfig,
}

impl DockerBackend {
    pub fn new(runner: &RunnerConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon")?;

        Ok(Self {
            docker,
            runner: runner.clone(),
        })
    }

    /// Pull the image if it is not cached locally
    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image = %image, "Image cache hit");
            return Ok(());
        }

        warn!(image = %image, "Image cache miss, pulling");

        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.context("Failed to pull Docker image")?;
        }

        info!(image = %image, "Image pulled");
        Ok(())
    }

    async fn run_container(&self, container_id: &str) -> (String, Option<i64>) {
        let mut stderr = String::new();

        let logs_options = Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: true,
            ..Default::default()
        });

        let mut logs_stream = self.docker.logs(container_id, logs_options);
        while let Some(output) = logs_stream.next().await {
            match output {
                Ok(LogOutput::StdErr { message }) => {
                    stderr.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Error reading container logs");
                    break;
                }
            }
        }

        let wait_options = WaitContainerOptions {
            condition: "not-running",
        };

        let mut wait_stream = self.docker.wait_container(container_id, Some(wait_options));
        let exit_code = match wait_stream.next().await {
            Some(Ok(response)) => Some(response.status_code),
            // bollard reports non-zero exits as an error carrying the code
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Some(code),
            Some(Err(e)) => {
                warn!(error = %e, "Failed to get container exit code");
                None
            }
            None => None,
        };

        (stderr, exit_code)
    }
}

#[async_trait]
impl ExecutionBackend for DockerBackend {
    #[tracing::instrument(skip(self, code), fields(runner = %self.runner.id))]
    async fn execute(&self, code: &str) -> Result<TestOutcome> {
        check_source_size(code)?;

        let image = image_name(&self.runner);
        self.ensure_image(&image)
            .await
            .with_context(|| format!("Failed to ensure Docker image '{}' is available", image))?;

        let config = Config {
            image: Some(image.clone()),
            cmd: Some(container_command(&self.runner)),
            entrypoint: Some(vec![]),
            env: Some(vec![format!(
                "SOURCE_CODE={}",
                general_purpose::STANDARD.encode(code)
            )]),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true),
            host_config: Some(bollard::models::HostConfig {
                memory: Some(memory_limit(&self.runner)),
                nano_cpus: Some(cpu_limit(&self.runner)),
                ..Default::default()
            }),
            ..Default::default()
        };

        let container_name = format!("lessonrun-{}", uuid::Uuid::new_v4());
        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .context("Failed to create Docker container")?;

        let container_id = container.id.clone();
        let _guard = ContainerGuard::new(&self.docker, container_id.clone());

        let start = Instant::now();
        self.docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
            .context("Failed to start Docker container")?;

        let timeout = Duration::from_millis(self.runner.timeout_ms);
        let outcome = match tokio::time::timeout(timeout, self.run_container(&container_id)).await {
            Ok((_, Some(0))) => TestOutcome::passed(),
            Ok((stderr, code)) => TestOutcome::failed(error_line(&stderr).unwrap_or_else(|| {
                match code {
                    Some(code) => format!("Exited with code {}", code),
                    None => "Container exited without a status".to_string(),
                }
            })),
            Err(_) => {
                warn!(timeout_ms = self.runner.timeout_ms, "Container execution timed out");
                TestOutcome::failed(format!("Timed out after {}ms", self.runner.timeout_ms))
            }
        };

        debug!(
            execution_ms = start.elapsed().as_millis() as u64,
            passed = outcome.passed,
            "Container execution finished"
        );

        Ok(outcome)
    }
}
