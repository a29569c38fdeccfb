/// Test Run Orchestrator
///
/// **Responsibility:**
/// Run one lesson's tests and turn the outcome into a progression step.
///
/// **Run sequence:**
/// 1. Resolve the single runner of the lesson (mismatch aborts before any worker spawns)
/// 2. `beforeAll`, awaited, best-effort
/// 3. Publish the initial test list
/// 4. Dispatch: one shared worker (blocking) or one worker per test (parallel)
/// 5. Consume worker events from the run's channel until every test has
///    settled and every worker has exited
/// 6. Apply the progression decision, then tear down exactly once:
///    `afterAll`, tests-end plugin event, pool cleared
///
/// The aggregation loop is the only place test state is mutated.

use crate::collaborators::{Collaborators, PluginEvent};
use crate::dispatch::BackendRegistry;
use crate::error::RunError;
use crate::hooks::HookRunner;
use crate::pool::{RunContext, WorkerEvent, EXIT_OK};
use crate::progression::{self, Progression};
use crate::worker::{blocking_worker, parallel_worker, WorkerKit};
use chrono::Utc;
use lesson_common::types::{
    ConsoleEntry, HookPhase, Lesson, LessonEvent, Project, ProjectConfigPatch, RunMode,
    TestOutcome, TestState,
};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Error recorded for tests whose worker was terminated before reporting
pub const CANCELLED_MESSAGE: &str = "cancelled";
/// Shown to the learner when a run could not be set up
pub const RUN_FAILED_MESSAGE: &str = "Tests could not be started";

/// The one runner a lesson's hooks and tests agree on; mismatches abort the run.
pub fn resolve_runner(lesson: &Lesson) -> Result<Option<String>, RunError> {
    Ok(lesson.resolve_runner()?.map(str::to_string))
}

/// Mutable state of one lesson run, owned by the aggregation loop
struct LessonRun<'a> {
    project: &'a Project,
    lesson: &'a Lesson,
    lesson_number: u32,
    locale: String,
    states: Vec<TestState>,
    finalized: bool,
}

pub struct Orchestrator {
    collaborators: Collaborators,
    backends: Arc<BackendRegistry>,
    hooks: HookRunner,
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators, backends: Arc<BackendRegistry>) -> Self {
        let hooks = HookRunner::new(backends.clone());
        Self {
            collaborators,
            backends,
            hooks,
        }
    }

    /// Run the tests of a project's current lesson, advancing through lessons
    /// while they pass. Setup failures are logged and reported to the learner.
    pub async fn run(&self, project_id: &str, cancel: &CancellationToken) -> Option<Progression> {
        match self.run_project(project_id, cancel).await {
            Ok(progression) => Some(progression),
            Err(e) => {
                error!(project_id = %project_id, error = %format!("{:#}", e), "Test run failed");
                self.collaborators
                    .notifier
                    .notify(project_id, LessonEvent::RunFailed(RUN_FAILED_MESSAGE.to_string()))
                    .await;
                None
            }
        }
    }

    pub async fn run_project(
        &self,
        project_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Progression, RunError> {
        let project = self.collaborators.content.get_project(project_id).await?;
        let mut lesson_number = self
            .collaborators
            .store
            .get_project_config(project_id)
            .await?
            .current_lesson;

        loop {
            let ctx = RunContext::new(cancel);
            match self.run_lesson(&project, lesson_number, &ctx).await? {
                Progression::Advance { next_lesson } if !cancel.is_cancelled() => {
                    info!(project_id = %project_id, next_lesson, "Lesson passed, running next lesson");
                    lesson_number = next_lesson;
                }
                progression => return Ok(progression),
            }
        }
    }

    #[tracing::instrument(
        skip_all,
        fields(project_id = %project.id, lesson = lesson_number, run_id = %ctx.id())
    )]
    pub async fn run_lesson(
        &self,
        project: &Project,
        lesson_number: u32,
        ctx: &RunContext,
    ) -> Result<Progression, RunError> {
        let lesson = self
            .collaborators
            .content
            .get_lesson(&project.id, lesson_number)
            .await?;

        let runner = resolve_runner(&lesson)?;
        let backend = runner
            .as_deref()
            .map(|runner| self.backends.get(runner))
            .transpose()?;
        let mode = project.run_mode();
        let locale = self.collaborators.store.get_state().await?.locale;

        info!(
            runner = runner.as_deref().unwrap_or("none"),
            mode = %mode,
            tests = lesson.tests.len(),
            "Starting lesson run"
        );

        self.collaborators
            .plugins
            .on_event(PluginEvent::TestsStart {
                project_id: project.id.clone(),
                lesson: lesson_number,
            })
            .await?;

        self.hooks
            .run(lesson.hooks.before_all.as_ref(), HookPhase::BeforeAll)
            .await;

        let mut run = LessonRun {
            project,
            lesson: &lesson,
            lesson_number,
            locale,
            states: lesson.tests.iter().map(|test| TestState::new(test, mode)).collect(),
            finalized: false,
        };
        self.notify(&run, LessonEvent::TestsUpdated(run.states.clone()))
            .await;

        let (events_tx, mut events) = mpsc::unbounded_channel();
        if let Some(backend) = backend {
            let kit = WorkerKit {
                backend,
                hooks: self.hooks.clone(),
                before_each: lesson.hooks.before_each.clone(),
            };
            match mode {
                RunMode::Blocking => self.dispatch_blocking(&mut run, ctx, kit, &events_tx).await,
                RunMode::Parallel => self.dispatch_parallel(&run, ctx, kit, &events_tx),
            }
        }
        // Workers hold the remaining senders; the channel closes when the last one exits
        drop(events_tx);

        loop {
            if let Some(progression) = self.check_terminal(&mut run, ctx, false).await? {
                return Ok(progression);
            }

            match events.recv().await {
                Some(event) => self.handle_event(&mut run, ctx, event).await,
                None => {
                    warn!("Worker channel closed before the run settled");
                    self.settle_unfinished(&mut run, 0..lesson.tests.len()).await;
                    if let Some(progression) = self.check_terminal(&mut run, ctx, true).await? {
                        return Ok(progression);
                    }
                }
            }
        }
    }

    /// One shared worker; tests are marked loading and posted in order
    async fn dispatch_blocking(
        &self,
        run: &mut LessonRun<'_>,
        ctx: &RunContext,
        kit: WorkerKit,
        events: &UnboundedSender<WorkerEvent>,
    ) {
        let lesson = run.lesson;
        if lesson.tests.is_empty() {
            return;
        }

        let (post_tx, post_rx) = mpsc::unbounded_channel();
        let worker_id = ctx.spawn_worker((0..lesson.tests.len()).collect(), events, move |id, events| {
            blocking_worker(kit, id, post_rx, events)
        });
        debug!(worker_id = %worker_id, "Shared worker spawned");

        for (index, test) in lesson.tests.iter().enumerate() {
            run.states[index].is_loading = true;
            self.notify(run, LessonEvent::TestUpdated(run.states[index].clone()))
                .await;
            if post_tx.send((index, test.clone())).is_err() {
                // Worker already gone; its exit event settles this test
                debug!(test_index = index, "Shared worker exited before test was posted");
            }
        }
    }

    /// One worker per test, all spawned up front
    fn dispatch_parallel(
        &self,
        run: &LessonRun<'_>,
        ctx: &RunContext,
        kit: WorkerKit,
        events: &UnboundedSender<WorkerEvent>,
    ) {
        for (index, test) in run.lesson.tests.iter().enumerate() {
            let kit = kit.clone();
            let test = test.clone();
            ctx.spawn_worker(vec![index], events, move |id, events| {
                parallel_worker(kit, id, index, test, events)
            });
        }
        debug!(workers = ctx.pool().len(), "Parallel workers spawned");
    }

    async fn handle_event(&self, run: &mut LessonRun<'_>, ctx: &RunContext, event: WorkerEvent) {
        match event {
            WorkerEvent::Message {
                worker_id,
                test_index,
                outcome,
            } => {
                debug!(worker_id = %worker_id, test_index, passed = outcome.passed, "Test result received");
                self.settle(run, test_index, outcome).await;
            }
            WorkerEvent::Exit { worker_id, code } => {
                // Removal hands back the handle exactly once, so afterEach can't run twice per worker
                let Some(handle) = ctx.pool().remove(worker_id) else {
                    debug!(worker_id = %worker_id, "Ignoring exit of unknown worker");
                    return;
                };

                if code != EXIT_OK {
                    warn!(
                        worker_id = %worker_id,
                        code,
                        run_cancelled = ctx.is_cancelled(),
                        "Worker terminated, unsettled tests marked cancelled"
                    );
                }
                self.settle_unfinished(run, handle.tests).await;

                self.hooks
                    .run(run.lesson.hooks.after_each.as_ref(), HookPhase::AfterEach)
                    .await;
            }
        }
    }

    async fn settle_unfinished(
        &self,
        run: &mut LessonRun<'_>,
        indices: impl IntoIterator<Item = usize>,
    ) {
        for index in indices {
            if run.states.get(index).is_some_and(|state| state.is_loading) {
                self.settle(run, index, TestOutcome::failed(CANCELLED_MESSAGE))
                    .await;
            }
        }
    }

    /// Record a result for a loading test. Settled tests are never touched again.
    async fn settle(&self, run: &mut LessonRun<'_>, index: usize, outcome: TestOutcome) {
        let Some(state) = run.states.get_mut(index) else {
            warn!(test_index = index, "Result for unknown test");
            return;
        };
        if !state.is_loading {
            debug!(test_index = index, "Ignoring result for settled test");
            return;
        }

        state.is_loading = false;
        state.passed = outcome.passed;
        state.error = outcome.error.map(|message| {
            self.collaborators
                .translator
                .translate(&run.locale, &message)
                .unwrap_or(message)
        });

        let state = state.clone();
        self.notify(run, LessonEvent::Console(ConsoleEntry::from(&state)))
            .await;
        self.notify(run, LessonEvent::TestUpdated(state)).await;
    }

    /// Aggregation check. Acts only once: when every test has settled and
    /// every worker has exited (or `workers_gone` says they have).
    async fn check_terminal(
        &self,
        run: &mut LessonRun<'_>,
        ctx: &RunContext,
        workers_gone: bool,
    ) -> Result<Option<Progression>, RunError> {
        if run.finalized {
            return Ok(None);
        }
        let Some(progression) = progression::decide(run.project, run.lesson_number, &run.states)
        else {
            return Ok(None);
        };
        if !workers_gone && !ctx.pool().is_empty() {
            return Ok(None);
        }
        run.finalized = true;

        info!(progression = ?progression, "All tests settled");

        // Teardown runs even if a collaborator fails while applying the decision
        let applied = self.apply_progression(run, progression).await;
        let torn_down = self.teardown(run, ctx).await;
        applied?;
        torn_down?;

        Ok(Some(progression))
    }

    async fn apply_progression(
        &self,
        run: &LessonRun<'_>,
        progression: Progression,
    ) -> Result<(), RunError> {
        let project_id = &run.project.id;
        let lesson = run.lesson_number;
        let Collaborators {
            store, plugins, ..
        } = &self.collaborators;

        if progression == Progression::Fail {
            plugins
                .on_event(PluginEvent::LessonFailed {
                    project_id: project_id.clone(),
                    lesson,
                })
                .await?;
            self.notify(run, LessonEvent::Hints(run.lesson.hints.clone()))
                .await;
            return Ok(());
        }

        plugins
            .on_event(PluginEvent::LessonPassed {
                project_id: project_id.clone(),
                lesson,
            })
            .await?;
        self.notify(run, LessonEvent::HintsCleared).await;

        match progression {
            Progression::FinishProject => {
                plugins
                    .on_event(PluginEvent::ProjectFinished {
                        project_id: project_id.clone(),
                    })
                    .await?;
                store
                    .set_project_config(
                        project_id,
                        ProjectConfigPatch {
                            completed_date: Some(Utc::now()),
                            ..Default::default()
                        },
                    )
                    .await?;
                self.notify(run, LessonEvent::ProjectFinished).await;
            }
            Progression::Advance { next_lesson } => {
                store
                    .set_project_config(
                        project_id,
                        ProjectConfigPatch {
                            current_lesson: Some(next_lesson),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
            Progression::Fail => {}
        }

        Ok(())
    }

    async fn teardown(&self, run: &LessonRun<'_>, ctx: &RunContext) -> Result<(), RunError> {
        self.hooks
            .run(run.lesson.hooks.after_all.as_ref(), HookPhase::AfterAll)
            .await;

        let ended = self
            .collaborators
            .plugins
            .on_event(PluginEvent::TestsEnd {
                project_id: run.project.id.clone(),
                lesson: run.lesson_number,
            })
            .await;

        ctx.cancel();
        ended?;
        Ok(())
    }

    async fn notify(&self, run: &LessonRun<'_>, event: LessonEvent) {
        self.collaborators
            .notifier
            .notify(&run.project.id, event)
            .await;
    }
}
