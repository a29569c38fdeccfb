// Worker bodies: what runs inside a spawned worker for each run mode

use crate::dispatch::ExecutionBackend;
use crate::hooks::HookRunner;
use crate::pool::{WorkerEvent, WorkerId};
use lesson_common::types::{Hook, HookPhase, Test, TestOutcome};
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// Everything a worker needs to execute tests, cloned into each worker
#[derive(Clone)]
pub struct WorkerKit {
    pub backend: Arc<dyn ExecutionBackend>,
    pub hooks: HookRunner,
    pub before_each: Option<Hook>,
}

impl WorkerKit {
    /// `beforeEach`, then the test itself. Backend failures fail the test.
    async fn run_test(&self, test: &Test) -> TestOutcome {
        self.hooks.run(self.before_each.as_ref(), HookPhase::BeforeEach).await;

        match self.backend.execute(&test.code).await {
            Ok(outcome) => outcome,
            Err(e) => TestOutcome::failed(format!("{:#}", e)),
        }
    }
}

/// Blocking mode: one worker consumes posted tests strictly in submission order
/// and exits once the orchestrator stops posting.
pub async fn blocking_worker(
    kit: WorkerKit,
    worker_id: WorkerId,
    mut posted: UnboundedReceiver<(usize, Test)>,
    events: UnboundedSender<WorkerEvent>,
) {
    while let Some((test_index, test)) = posted.recv().await {
        let outcome = kit.run_test(&test).await;
        debug!(worker_id = %worker_id, test_index, passed = outcome.passed, "Test finished");
        if events
            .send(WorkerEvent::Message {
                worker_id,
                test_index,
                outcome,
            })
            .is_err()
        {
            break;
        }
    }
}

/// Parallel mode: one worker per test
pub async fn parallel_worker(
    kit: WorkerKit,
    worker_id: WorkerId,
    test_index: usize,
    test: Test,
    events: UnboundedSender<WorkerEvent>,
) {
    let outcome = kit.run_test(&test).await;
    debug!(worker_id = %worker_id, test_index, passed = outcome.passed, "Test finished");
    let _ = events.send(WorkerEvent::Message {
        worker_id,
        test_index,
        outcome,
    });
}
