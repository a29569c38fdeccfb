/// Hook Runner - executes one lifecycle hook against its runner's backend.
///
/// Hooks are best-effort: failures are logged and never abort a run.

use crate::dispatch::BackendRegistry;
use anyhow::{bail, Context, Result};
use lesson_common::types::{Hook, HookPhase};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct HookRunner {
    backends: Arc<BackendRegistry>,
}

impl HookRunner {
    pub fn new(backends: Arc<BackendRegistry>) -> Self {
        Self { backends }
    }

    /// Execute a hook, surfacing every failure
    pub async fn try_run(&self, hook: &Hook, phase: HookPhase) -> Result<()> {
        let backend = self.backends.get(&hook.runner)?;
        let outcome = backend
            .execute(&hook.code)
            .await
            .with_context(|| format!("{} hook could not be executed", phase))?;

        if !outcome.passed {
            bail!(
                "{} hook failed: {}",
                phase,
                outcome.error.as_deref().unwrap_or("no error message")
            );
        }
        Ok(())
    }

    /// Execute a hook if present. Returns whether it ran cleanly; absent hooks count as clean.
    #[tracing::instrument(skip(self, hook), fields(phase = %phase))]
    pub async fn run(&self, hook: Option<&Hook>, phase: HookPhase) -> bool {
        let Some(hook) = hook else {
            return true;
        };

        match self.try_run(hook, phase).await {
            Ok(()) => {
                debug!(runner = %hook.runner, "Hook completed");
                true
            }
            Err(e) => {
                warn!(runner = %hook.runner, error = %format!("{:#}", e), "Hook failed, continuing run");
                false
            }
        }
    }
}
