//! Worker pool and run context.
//!
//! Every run owns a [`RunContext`] with its own [`WorkerPool`], so cancelling
//! one run never touches the workers of another. A worker is added to the pool
//! when it is spawned and removed only when the orchestrator handles its exit
//! event; removal is the sole mutator of pool membership.

use lesson_common::types::TestOutcome;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

pub type WorkerId = Uuid;

/// Normal completion
pub const EXIT_OK: i32 = 0;
/// Worker was terminated; in-flight results must not be trusted
pub const EXIT_TERMINATED: i32 = 1;
/// Worker task panicked
pub const EXIT_CRASHED: i32 = 101;

/// Messages a worker sends back to its run's aggregation loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Message {
        worker_id: WorkerId,
        test_index: usize,
        outcome: TestOutcome,
    },
    Exit {
        worker_id: WorkerId,
        code: i32,
    },
}

#[derive(Debug)]
pub struct WorkerHandle {
    pub id: WorkerId,
    /// Test positions this worker is responsible for
    pub tests: Vec<usize>,
    token: CancellationToken,
}

#[derive(Clone, Default)]
pub struct WorkerPool {
    workers: Arc<Mutex<HashMap<WorkerId, WorkerHandle>>>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<WorkerId, WorkerHandle>> {
        // Critical sections never panic, so a poisoned lock still holds a consistent map
        self.workers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn a worker owning `tests`. `body` does the work and reports
    /// through `events`; a supervisor sends the matching `Exit` event.
    pub fn spawn<F, Fut>(
        &self,
        parent: &CancellationToken,
        tests: Vec<usize>,
        events: &UnboundedSender<WorkerEvent>,
        body: F,
    ) -> WorkerId
    where
        F: FnOnce(WorkerId, UnboundedSender<WorkerEvent>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let token = parent.child_token();

        self.lock().insert(
            id,
            WorkerHandle {
                id,
                tests,
                token: token.clone(),
            },
        );

        let work = tokio::spawn(body(id, events.clone()));
        tokio::spawn(supervise(id, work, token, events.clone()));

        debug!(worker_id = %id, "Worker spawned");
        id
    }

    /// Remove a worker on its exit event. Returns `None` if it was already removed.
    pub fn remove(&self, id: WorkerId) -> Option<WorkerHandle> {
        self.lock().remove(&id)
    }

    /// Request termination of one worker. Its exit event arrives later.
    pub fn terminate(&self, id: WorkerId) -> bool {
        match self.lock().get(&id) {
            Some(handle) => {
                handle.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Request termination of every live worker
    pub fn terminate_all(&self) -> usize {
        let workers = self.lock();
        for handle in workers.values() {
            handle.token.cancel();
        }
        workers.len()
    }

    pub fn worker_for_test(&self, test_index: usize) -> Option<WorkerId> {
        self.lock()
            .values()
            .find(|handle| handle.tests.contains(&test_index))
            .map(|handle| handle.id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Waits for the worker body to finish, crash or be terminated, then reports the exit
async fn supervise(
    id: WorkerId,
    mut work: JoinHandle<()>,
    token: CancellationToken,
    events: UnboundedSender<WorkerEvent>,
) {
    let code = tokio::select! {
        result = &mut work => match result {
            Ok(()) => EXIT_OK,
            Err(e) if e.is_panic() => {
                warn!(worker_id = %id, "Worker crashed");
                EXIT_CRASHED
            }
            Err(_) => EXIT_TERMINATED,
        },
        _ = token.cancelled() => {
            work.abort();
            EXIT_TERMINATED
        }
    };

    debug!(worker_id = %id, code, "Worker exited");
    // The run may already be gone; nothing left to tell
    let _ = events.send(WorkerEvent::Exit { worker_id: id, code });
}

/// One lesson run's cancellation scope and worker set
#[derive(Clone)]
pub struct RunContext {
    id: Uuid,
    pool: WorkerPool,
    token: CancellationToken,
}

impl RunContext {
    /// Child of `parent`: cancelling the parent cancels this run
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            pool: WorkerPool::new(),
            token: parent.child_token(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn spawn_worker<F, Fut>(
        &self,
        tests: Vec<usize>,
        events: &UnboundedSender<WorkerEvent>,
        body: F,
    ) -> WorkerId
    where
        F: FnOnce(WorkerId, UnboundedSender<WorkerEvent>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.pool.spawn(&self.token, tests, events, body)
    }

    /// Terminate every worker of this run. Asynchronous: exits are reported as events.
    pub fn cancel(&self) {
        let terminated = self.pool.terminate_all();
        self.token.cancel();
        debug!(run_id = %self.id, terminated, "Run cancelled");
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}
