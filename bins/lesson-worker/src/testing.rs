//! In-memory collaborators and a scripted backend for orchestrator tests.

use crate::collaborators::{
    Collaborators, ContentSource, Notifier, PluginEvent, PluginHooks, StateStore, Translator,
};
use crate::dispatch::{BackendRegistry, ExecutionBackend};
use crate::orchestrator::Orchestrator;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use lesson_common::types::{
    AppState, AppStatePatch, Hook, Lesson, LessonEvent, Project, ProjectConfig, ProjectConfigPatch,
    Test, TestOutcome, TestState,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

pub const RUNNER: &str = "node";

/// Behaviour is chosen by the code itself:
/// `fail:<msg>` fails, `error:<msg>` is a backend error, `hang` never
/// finishes, `panic` crashes the worker, anything else passes.
#[derive(Default)]
pub struct ScriptedBackend {
    executions: Mutex<Vec<String>>,
    probe: Option<UnboundedSender<String>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also report every execution as it starts
    pub fn with_probe() -> (Self, UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                executions: Mutex::default(),
                probe: Some(tx),
            },
            rx,
        )
    }

    pub fn executions(&self) -> Vec<String> {
        self.executions.lock().unwrap().clone()
    }

    pub fn count(&self, code: &str) -> usize {
        self.executions().iter().filter(|c| c.as_str() == code).count()
    }
}

#[async_trait]
impl ExecutionBackend for ScriptedBackend {
    async fn execute(&self, code: &str) -> Result<TestOutcome> {
        self.executions.lock().unwrap().push(code.to_string());
        if let Some(probe) = &self.probe {
            let _ = probe.send(code.to_string());
        }

        if let Some(message) = code.strip_prefix("fail:") {
            return Ok(TestOutcome::failed(message));
        }
        if let Some(message) = code.strip_prefix("error:") {
            bail!("{}", message);
        }
        match code {
            "hang" => std::future::pending::<Result<TestOutcome>>().await,
            "panic" => panic!("interpreter crashed"),
            _ => Ok(TestOutcome::passed()),
        }
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<LessonEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<LessonEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&LessonEvent) -> bool) -> usize {
        self.events().iter().filter(|e| predicate(e)).count()
    }

    /// Test list as a UI would show it after replaying every update
    pub fn latest_tests(&self) -> Vec<TestState> {
        let mut tests: Vec<TestState> = Vec::new();
        for event in self.events() {
            match event {
                LessonEvent::TestsUpdated(all) => tests = all,
                LessonEvent::TestUpdated(state) => {
                    if let Some(slot) = tests.iter_mut().find(|t| t.index == state.index) {
                        *slot = state;
                    }
                }
                _ => {}
            }
        }
        tests
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, _project_id: &str, event: LessonEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[derive(Default)]
pub struct MemoryStore {
    projects: Mutex<HashMap<String, ProjectConfig>>,
    state: Mutex<AppState>,
}

impl MemoryStore {
    pub fn project_config(&self, project_id: &str) -> ProjectConfig {
        self.projects
            .lock()
            .unwrap()
            .get(project_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_current_lesson(&self, project_id: &str, lesson: u32) {
        self.projects
            .lock()
            .unwrap()
            .entry(project_id.to_string())
            .or_default()
            .current_lesson = lesson;
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get_project_config(&self, project_id: &str) -> Result<ProjectConfig> {
        Ok(self.project_config(project_id))
    }

    async fn set_project_config(&self, project_id: &str, patch: ProjectConfigPatch) -> Result<()> {
        self.projects
            .lock()
            .unwrap()
            .entry(project_id.to_string())
            .or_default()
            .apply(&patch);
        Ok(())
    }

    async fn get_state(&self) -> Result<AppState> {
        Ok(self.state.lock().unwrap().clone())
    }

    async fn set_state(&self, patch: AppStatePatch) -> Result<()> {
        self.state.lock().unwrap().apply(&patch);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingPlugins {
    events: Mutex<Vec<PluginEvent>>,
}

impl RecordingPlugins {
    pub fn events(&self) -> Vec<PluginEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Count by event name, e.g. "tests-end"
    pub fn count(&self, name: &str) -> usize {
        self.events().iter().filter(|e| e.to_string() == name).count()
    }
}

#[async_trait]
impl PluginHooks for RecordingPlugins {
    async fn on_event(&self, event: PluginEvent) -> Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

pub struct MemoryContent {
    project: Project,
    lessons: Vec<Lesson>,
}

#[async_trait]
impl ContentSource for MemoryContent {
    async fn get_project(&self, project_id: &str) -> Result<Project> {
        if project_id != self.project.id {
            bail!("Unknown project '{}'", project_id);
        }
        Ok(self.project.clone())
    }

    async fn get_lesson(&self, _project_id: &str, lesson_number: u32) -> Result<Lesson> {
        self.lessons
            .iter()
            .find(|l| l.number == lesson_number)
            .cloned()
            .ok_or_else(|| anyhow!("Unknown lesson {}", lesson_number))
    }
}

#[derive(Default)]
pub struct MapTranslator {
    messages: HashMap<String, String>,
}

impl Translator for MapTranslator {
    fn translate(&self, _locale: &str, key: &str) -> Option<String> {
        self.messages.get(key).cloned()
    }
}

pub fn test_case(index: usize, code: &str) -> Test {
    Test {
        index,
        text: format!("test {}", index),
        code: code.to_string(),
        runner: RUNNER.to_string(),
    }
}

pub fn hook(code: &str) -> Hook {
    Hook {
        runner: RUNNER.to_string(),
        code: code.to_string(),
    }
}

pub fn lesson(number: u32, codes: &[&str]) -> Lesson {
    Lesson {
        number,
        title: format!("Lesson {}", number),
        tests: codes
            .iter()
            .enumerate()
            .map(|(index, code)| test_case(index, code))
            .collect(),
        hooks: Default::default(),
        hints: codes.iter().enumerate().map(|(i, _)| format!("hint {}", i)).collect(),
    }
}

pub fn project(number_of_lessons: u32, is_integrated: bool, blocking_tests: bool) -> Project {
    Project {
        id: "calculator".to_string(),
        title: "Build a Calculator".to_string(),
        number_of_lessons,
        is_integrated,
        blocking_tests,
    }
}

/// Orchestrator wired to in-memory collaborators, with one scripted runner
pub struct Harness {
    pub project: Project,
    pub backend: Arc<ScriptedBackend>,
    pub notifier: Arc<RecordingNotifier>,
    pub store: Arc<MemoryStore>,
    pub plugins: Arc<RecordingPlugins>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    pub fn new(project: Project, lessons: Vec<Lesson>) -> Self {
        Self::build(project, lessons, ScriptedBackend::new(), &[])
    }

    pub fn with_probe(project: Project, lessons: Vec<Lesson>) -> (Self, UnboundedReceiver<String>) {
        let (backend, probe) = ScriptedBackend::with_probe();
        (Self::build(project, lessons, backend, &[]), probe)
    }

    pub fn build(
        project: Project,
        lessons: Vec<Lesson>,
        backend: ScriptedBackend,
        translations: &[(&str, &str)],
    ) -> Self {
        let backend = Arc::new(backend);
        let notifier = Arc::new(RecordingNotifier::default());
        let store = Arc::new(MemoryStore::default());
        let plugins = Arc::new(RecordingPlugins::default());
        let translator = MapTranslator {
            messages: translations
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };

        let mut registry = BackendRegistry::new();
        registry.register(RUNNER, backend.clone());

        let collaborators = Collaborators {
            content: Arc::new(MemoryContent {
                project: project.clone(),
                lessons,
            }),
            store: store.clone(),
            notifier: notifier.clone(),
            plugins: plugins.clone(),
            translator: Arc::new(translator),
        };

        Self {
            project,
            backend,
            notifier,
            store,
            plugins,
            orchestrator: Arc::new(Orchestrator::new(collaborators, Arc::new(registry))),
        }
    }

    /// Wait until the backend starts executing `code`
    pub async fn wait_for(probe: &mut UnboundedReceiver<String>, code: &str) {
        let started = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(started) = probe.recv().await {
                if started == code {
                    return true;
                }
            }
            false
        })
        .await;
        assert!(matches!(started, Ok(true)), "backend never started '{}'", code);
    }
}
