use lesson_common::types::RunnerMismatch;
use thiserror::Error;

/// Run-level failures. Everything below this level is contained in test state
/// or logged by the hook runner.
#[derive(Debug, Error)]
pub enum RunError {
    /// A hook or test names a runner other than the one the run resolved.
    /// Raised before any worker spawns.
    #[error("runner mismatch: {location} uses '{found}' but the run uses '{expected}'")]
    RunnerMismatch {
        expected: String,
        found: String,
        location: String,
    },

    #[error("unsupported runner '{0}'")]
    UnsupportedRunner(String),

    /// Content, state store or plugin collaborator failure
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

impl From<RunnerMismatch> for RunError {
    fn from(mismatch: RunnerMismatch) -> Self {
        RunError::RunnerMismatch {
            expected: mismatch.expected,
            found: mismatch.found,
            location: mismatch.location,
        }
    }
}
