// Production collaborators: curriculum files on disk, Redis for state and
// events, tracing for plugin events, JSON locale catalogs.

use crate::collaborators::{ContentSource, Notifier, PluginEvent, PluginHooks, StateStore, Translator};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use lesson_common::redis;
use lesson_common::types::{
    is_valid_project_id, AppState, AppStatePatch, CurriculumFile, Lesson, LessonEvent, Project,
    ProjectConfig, ProjectConfigPatch,
};
use ::redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Reads `<root>/<project_id>.json` curriculum files
pub struct CurriculumDir {
    root: PathBuf,
}

impl CurriculumDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, project_id: &str) -> PathBuf {
        self.root.join(format!("{}.json", project_id))
    }

    pub async fn load(&self, project_id: &str) -> Result<CurriculumFile> {
        if !is_valid_project_id(project_id) {
            bail!("Invalid project id '{}'", project_id);
        }
        let path = self.path_for(project_id);
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read curriculum {}", path.display()))?;
        CurriculumFile::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }
}

#[async_trait]
impl ContentSource for CurriculumDir {
    async fn get_project(&self, project_id: &str) -> Result<Project> {
        Ok(self.load(project_id).await?.project)
    }

    async fn get_lesson(&self, project_id: &str, lesson_number: u32) -> Result<Lesson> {
        self.load(project_id)
            .await?
            .lessons
            .into_iter()
            .find(|lesson| lesson.number == lesson_number)
            .ok_or_else(|| anyhow!("Project '{}' has no lesson {}", project_id, lesson_number))
    }
}

/// Learner progress in Redis. Patches are read-modify-write; one worker owns a project's run.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn get_project_config(&self, project_id: &str) -> Result<ProjectConfig> {
        let mut conn = self.conn.clone();
        Ok(redis::get_project_config(&mut conn, project_id)
            .await
            .context("Failed to read project config")?
            .unwrap_or_default())
    }

    async fn set_project_config(&self, project_id: &str, patch: ProjectConfigPatch) -> Result<()> {
        let mut config = self.get_project_config(project_id).await?;
        config.apply(&patch);
        let mut conn = self.conn.clone();
        redis::set_project_config(&mut conn, project_id, &config)
            .await
            .context("Failed to write project config")
    }

    async fn get_state(&self) -> Result<AppState> {
        let mut conn = self.conn.clone();
        Ok(redis::get_app_state(&mut conn)
            .await
            .context("Failed to read app state")?
            .unwrap_or_default())
    }

    async fn set_state(&self, patch: AppStatePatch) -> Result<()> {
        let mut state = self.get_state().await?;
        state.apply(&patch);
        let mut conn = self.conn.clone();
        redis::set_app_state(&mut conn, &state)
            .await
            .context("Failed to write app state")
    }
}

/// Keeps the latest test list for polling clients and publishes every event
#[derive(Clone)]
pub struct RedisNotifier {
    conn: ConnectionManager,
}

impl RedisNotifier {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    async fn deliver(&self, project_id: &str, event: &LessonEvent) -> Result<()> {
        let mut conn = self.conn.clone();
        match event {
            LessonEvent::TestsUpdated(tests) => {
                redis::store_tests(&mut conn, project_id, tests).await?;
            }
            LessonEvent::TestUpdated(state) => {
                let mut tests = redis::get_tests(&mut conn, project_id)
                    .await?
                    .unwrap_or_default();
                if let Some(slot) = tests.iter_mut().find(|t| t.index == state.index) {
                    *slot = state.clone();
                    redis::store_tests(&mut conn, project_id, &tests).await?;
                }
            }
            _ => {}
        }
        redis::publish_event(&mut conn, project_id, event).await?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for RedisNotifier {
    async fn notify(&self, project_id: &str, event: LessonEvent) {
        if let Err(e) = self.deliver(project_id, &event).await {
            warn!(project_id = %project_id, error = %format!("{:#}", e), "Failed to deliver lesson event");
        }
    }
}

/// Plugin lifecycle events as structured log lines
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPlugins;

#[async_trait]
impl PluginHooks for LogPlugins {
    async fn on_event(&self, event: PluginEvent) -> Result<()> {
        match &event {
            PluginEvent::TestsStart { project_id, lesson }
            | PluginEvent::TestsEnd { project_id, lesson }
            | PluginEvent::LessonPassed { project_id, lesson }
            | PluginEvent::LessonFailed { project_id, lesson } => {
                info!(event = %event, project_id = %project_id, lesson, "Plugin event");
            }
            PluginEvent::ProjectFinished { project_id } => {
                info!(event = %event, project_id = %project_id, "Plugin event");
            }
        }
        Ok(())
    }
}

/// Locale catalogs, `<dir>/<locale>.json` mapping message to translation
#[derive(Debug, Default)]
pub struct LocaleCatalog {
    locales: HashMap<String, HashMap<String, String>>,
}

impl LocaleCatalog {
    /// Load every catalog in `dir`. A missing directory yields an empty catalog.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut locales = HashMap::new();
        if !dir.exists() {
            warn!(dir = %dir.display(), "Locale directory not found, errors will not be translated");
            return Ok(Self { locales });
        }

        let entries =
            fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(locale) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let messages: HashMap<String, String> = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;

            debug!(locale, messages = messages.len(), "Loaded locale");
            locales.insert(locale.to_string(), messages);
        }

        Ok(Self { locales })
    }

    pub fn locales(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.locales.keys().map(String::as_str).collect();
        names.sort();
        names
    }
}

impl Translator for LocaleCatalog {
    fn translate(&self, locale: &str, key: &str) -> Option<String> {
        self.locales.get(locale)?.get(key).cloned()
    }
}
