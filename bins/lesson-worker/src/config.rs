// Runner configuration management for the lesson worker
use anyhow::{bail, Context, Result};
use lesson_common::runners::{RunnerConfig, RunnersFile};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Runner configuration manager, keyed by runner id
#[derive(Debug, Clone, Default)]
pub struct RunnerConfigManager {
    configs: HashMap<String, RunnerConfig>,
}

impl RunnerConfigManager {
    /// Load runner configurations from runners.json
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Runner config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let runners_file: RunnersFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        Self::from_configs(runners_file.runners)
    }

    pub fn from_configs(runners: Vec<RunnerConfig>) -> Result<Self> {
        let mut configs = HashMap::new();
        for runner in runners {
            if configs.contains_key(&runner.id) {
                bail!("Runner '{}' is configured twice", runner.id);
            }
            configs.insert(runner.id.clone(), runner);
        }
        Ok(Self { configs })
    }

    /// Get configuration for a specific runner
    pub fn get_config(&self, runner_id: &str) -> Result<&RunnerConfig> {
        self.configs
            .get(runner_id)
            .ok_or_else(|| anyhow::anyhow!("No configuration found for runner: {}", runner_id))
    }

    pub fn runners(&self) -> impl Iterator<Item = &RunnerConfig> {
        self.configs.values()
    }

    /// List all configured runner ids, sorted
    pub fn list_runners(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.configs.keys().cloned().collect();
        ids.sort();
        ids
    }
}
