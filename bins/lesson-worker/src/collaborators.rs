//! Interfaces to the systems the orchestrator drives but does not own.

use anyhow::Result;
use async_trait::async_trait;
use lesson_common::types::{
    AppState, AppStatePatch, Lesson, LessonEvent, Project, ProjectConfig, ProjectConfigPatch,
};
use std::fmt;
use std::sync::Arc;

/// Read-only lesson content
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn get_project(&self, project_id: &str) -> Result<Project>;
    async fn get_lesson(&self, project_id: &str, lesson_number: u32) -> Result<Lesson>;
}

/// Learner progress persistence
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_project_config(&self, project_id: &str) -> Result<ProjectConfig>;
    async fn set_project_config(&self, project_id: &str, patch: ProjectConfigPatch) -> Result<()>;
    async fn get_state(&self) -> Result<AppState>;
    async fn set_state(&self, patch: AppStatePatch) -> Result<()>;
}

/// One-way UI channel. Implementations log their own delivery failures.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, project_id: &str, event: LessonEvent);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginEvent {
    TestsStart { project_id: String, lesson: u32 },
    TestsEnd { project_id: String, lesson: u32 },
    LessonPassed { project_id: String, lesson: u32 },
    LessonFailed { project_id: String, lesson: u32 },
    ProjectFinished { project_id: String },
}

impl fmt::Display for PluginEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginEvent::TestsStart { .. } => write!(f, "tests-start"),
            PluginEvent::TestsEnd { .. } => write!(f, "tests-end"),
            PluginEvent::LessonPassed { .. } => write!(f, "lesson-passed"),
            PluginEvent::LessonFailed { .. } => write!(f, "lesson-failed"),
            PluginEvent::ProjectFinished { .. } => write!(f, "project-finished"),
        }
    }
}

/// Extension lifecycle hooks. Awaited; errors propagate to the run.
#[async_trait]
pub trait PluginHooks: Send + Sync {
    async fn on_event(&self, event: PluginEvent) -> Result<()>;
}

pub trait Translator: Send + Sync {
    fn translate(&self, locale: &str, key: &str) -> Option<String>;
}

#[derive(Clone)]
pub struct Collaborators {
    pub content: Arc<dyn ContentSource>,
    pub store: Arc<dyn StateStore>,
    pub notifier: Arc<dyn Notifier>,
    pub plugins: Arc<dyn PluginHooks>,
    pub translator: Arc<dyn Translator>,
}
