use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle hook code, bound to the runner that interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hook {
    pub runner: String,
    pub code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HookPhase {
    BeforeAll,
    BeforeEach,
    AfterEach,
    AfterAll,
}

impl HookPhase {
    pub const ALL: [HookPhase; 4] = [
        HookPhase::BeforeAll,
        HookPhase::BeforeEach,
        HookPhase::AfterEach,
        HookPhase::AfterAll,
    ];
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookPhase::BeforeAll => write!(f, "beforeAll"),
            HookPhase::BeforeEach => write!(f, "beforeEach"),
            HookPhase::AfterEach => write!(f, "afterEach"),
            HookPhase::AfterAll => write!(f, "afterAll"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hooks {
    #[serde(default)]
    pub before_all: Option<Hook>,
    #[serde(default)]
    pub before_each: Option<Hook>,
    #[serde(default)]
    pub after_each: Option<Hook>,
    #[serde(default)]
    pub after_all: Option<Hook>,
}

impl Hooks {
    pub fn get(&self, phase: HookPhase) -> Option<&Hook> {
        match phase {
            HookPhase::BeforeAll => self.before_all.as_ref(),
            HookPhase::BeforeEach => self.before_each.as_ref(),
            HookPhase::AfterEach => self.after_each.as_ref(),
            HookPhase::AfterAll => self.after_all.as_ref(),
        }
    }

    /// Present hooks in lifecycle order
    pub fn iter(&self) -> impl Iterator<Item = (HookPhase, &Hook)> {
        HookPhase::ALL
            .into_iter()
            .filter_map(move |phase| self.get(phase).map(|hook| (phase, hook)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Test {
    /// Position within the lesson; normalized on load
    #[serde(default)]
    pub index: usize,
    pub text: String,
    pub code: String,
    pub runner: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub number: u32,
    #[serde(default)]
    pub title: String,
    pub tests: Vec<Test>,
    #[serde(default)]
    pub hooks: Hooks,
    /// Indexed by test position
    #[serde(default)]
    pub hints: Vec<String>,
}

/// A hook or test whose runner disagrees with the rest of its lesson
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerMismatch {
    pub expected: String,
    pub found: String,
    /// `test <index>` or the hook phase
    pub location: String,
}

impl fmt::Display for RunnerMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} uses runner '{}', expected '{}'",
            self.location, self.found, self.expected
        )
    }
}

impl std::error::Error for RunnerMismatch {}

impl Lesson {
    /// The single runner shared by every present hook and test, hooks first.
    /// `None` when the lesson has neither.
    pub fn resolve_runner(&self) -> Result<Option<&str>, RunnerMismatch> {
        let mut sites = self
            .hooks
            .iter()
            .map(|(phase, hook)| (phase.to_string(), hook.runner.as_str()))
            .chain(
                self.tests
                    .iter()
                    .map(|test| (format!("test {}", test.index), test.runner.as_str())),
            );

        let Some((_, expected)) = sites.next() else {
            return Ok(None);
        };

        for (location, found) in sites {
            if found != expected {
                return Err(RunnerMismatch {
                    expected: expected.to_string(),
                    found: found.to_string(),
                    location,
                });
            }
        }

        Ok(Some(expected))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// All tests share one worker and run in submission order
    Blocking,
    /// One worker per test
    Parallel,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Blocking => write!(f, "blocking"),
            RunMode::Parallel => write!(f, "parallel"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub number_of_lessons: u32,
    #[serde(default)]
    pub is_integrated: bool,
    #[serde(default)]
    pub blocking_tests: bool,
}

impl Project {
    pub fn run_mode(&self) -> RunMode {
        if self.blocking_tests {
            RunMode::Blocking
        } else {
            RunMode::Parallel
        }
    }

    pub fn is_last_lesson(&self, lesson_number: u32) -> bool {
        lesson_number + 1 == self.number_of_lessons
    }
}

/// Project ids end up in file paths and Redis keys
pub fn is_valid_project_id(project_id: &str) -> bool {
    !project_id.is_empty()
        && project_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// On-disk curriculum file: project metadata plus its lessons
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurriculumFile {
    pub project: Project,
    pub lessons: Vec<Lesson>,
}

impl CurriculumFile {
    /// Parse a curriculum file. Test indices are normalized to list position.
    pub fn parse(content: &str) -> serde_json::Result<Self> {
        let mut curriculum: CurriculumFile = serde_json::from_str(content)?;
        for lesson in &mut curriculum.lessons {
            for (position, test) in lesson.tests.iter_mut().enumerate() {
                test.index = position;
            }
        }
        Ok(curriculum)
    }
}

/// Persisted learner progress for one project
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    pub current_lesson: u32,
    #[serde(default)]
    pub completed_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_lesson: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_date: Option<DateTime<Utc>>,
}

impl ProjectConfig {
    pub fn apply(&mut self, patch: &ProjectConfigPatch) {
        if let Some(lesson) = patch.current_lesson {
            self.current_lesson = lesson;
        }
        if let Some(date) = patch.completed_date {
            self.completed_date = Some(date);
        }
    }
}

/// Process-wide learner state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppState {
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default)]
    pub current_project: Option<String>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            locale: default_locale(),
            current_project: None,
        }
    }
}

fn default_locale() -> String {
    "english".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStatePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_project: Option<String>,
}

impl AppState {
    pub fn apply(&mut self, patch: &AppStatePatch) {
        if let Some(locale) = &patch.locale {
            self.locale = locale.clone();
        }
        if let Some(project) = &patch.current_project {
            self.current_project = Some(project.clone());
        }
    }
}

/// Raw result of executing one piece of code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub passed: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl TestOutcome {
    pub fn passed() -> Self {
        Self {
            passed: true,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            error: Some(message.into()),
        }
    }
}

/// Per-test state published to the UI while a run is live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestState {
    pub index: usize,
    pub text: String,
    pub passed: bool,
    pub is_loading: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TestState {
    pub fn new(test: &Test, mode: RunMode) -> Self {
        Self {
            index: test.index,
            text: test.text.clone(),
            passed: false,
            is_loading: mode != RunMode::Blocking,
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleEntry {
    pub index: usize,
    pub text: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&TestState> for ConsoleEntry {
    fn from(state: &TestState) -> Self {
        Self {
            index: state.index,
            text: state.text.clone(),
            passed: state.passed,
            error: state.error.clone(),
        }
    }
}

/// Notifications sent to the UI channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum LessonEvent {
    TestsUpdated(Vec<TestState>),
    TestUpdated(TestState),
    Console(ConsoleEntry),
    HintsCleared,
    Hints(Vec<String>),
    ProjectFinished,
    RunFailed(String),
}

/// Queued request to run the tests of a project's current lesson
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub id: Uuid,
    pub project_id: String,
    pub requested_at: DateTime<Utc>,
}

impl RunRequest {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id: project_id.into(),
            requested_at: Utc::now(),
        }
    }
}
