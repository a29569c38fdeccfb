use serde::{Deserialize, Serialize};
use std::fmt;

/// Runner registry schema shared by the worker and the CLI (config/runners.json)

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerKind {
    /// Throwaway container per execution
    Docker,
    /// Interpreter subprocess fed through stdin
    Process,
}

impl fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerKind::Docker => write!(f, "docker"),
            RunnerKind::Process => write!(f, "process"),
        }
    }
}

impl std::str::FromStr for RunnerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "docker" => Ok(RunnerKind::Docker),
            "process" => Ok(RunnerKind::Process),
            other => Err(format!("unknown runner kind '{}' (expected docker or process)", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    pub id: String,
    pub kind: RunnerKind,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub file_extension: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u32,
    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: f32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RunnersFile {
    pub runners: Vec<RunnerConfig>,
}

pub const DEFAULT_RUNNERS_PATH: &str = "config/runners.json";

fn default_memory_limit_mb() -> u32 {
    256
}

fn default_cpu_limit() -> f32 {
    0.5
}

fn default_timeout_ms() -> u64 {
    5000
}
