// CLI commands for managing runners and checking curriculum files
use anyhow::{bail, Context, Result};
use lesson_common::runners::{RunnerConfig, RunnerKind, RunnersFile, DEFAULT_RUNNERS_PATH};
use lesson_common::types::{is_valid_project_id, CurriculumFile};
use std::io::{self, Write};
use std::path::Path;
use tokio::fs;

/// Load the runner registry; a missing file is an empty registry
async fn load_runners_config(path: &Path) -> Result<RunnersFile> {
    if !path.exists() {
        return Ok(RunnersFile::default());
    }

    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Save the runner registry
async fn save_runners_config(path: &Path, config: &RunnersFile) -> Result<()> {
    // Ensure config directory exists
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let json_content =
        serde_json::to_string_pretty(config).context("Failed to serialize runner registry")?;
    fs::write(path, json_content)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    Ok(())
}

/// Add a runner to the registry
pub async fn add_runner(path: &Path, runner: RunnerConfig) -> Result<()> {
    println!("🚀 Adding runner: {}", runner.id);

    // Validate inputs
    if runner.id.is_empty() || runner.command.is_empty() {
        bail!("Runner id and command cannot be empty");
    }
    if runner.kind == RunnerKind::Docker && runner.image.is_none() {
        println!(
            "⚠️  No image given, the worker will use lessonrun-{}:latest",
            runner.id
        );
    }

    let mut runners_file = load_runners_config(path).await?;
    if runners_file.runners.iter().any(|r| r.id == runner.id) {
        bail!("Runner '{}' already exists in {}", runner.id, path.display());
    }

    let id = runner.id.clone();
    runners_file.runners.push(runner);

    println!("📝 Updating {}...", path.display());
    save_runners_config(path, &runners_file).await?;

    println!("✅ Runner '{}' added successfully!", id);
    println!("\n📋 Next steps:");
    println!("  1. Reference it from hooks and tests: \"runner\": \"{}\"", id);
    println!("  2. Restart the worker to pick up the new runner");

    Ok(())
}

/// Remove a runner from the registry
pub async fn remove_runner(path: &Path, id: &str, yes: bool) -> Result<()> {
    println!("🗑️  Removing runner: {}", id);

    let mut runners_file = load_runners_config(path).await?;
    let index = runners_file
        .runners
        .iter()
        .position(|r| r.id == id)
        .ok_or_else(|| anyhow::anyhow!("Runner '{}' not found in {}", id, path.display()))?;

    // Confirm deletion
    if !yes {
        print!("⚠️  Lessons using runner '{}' will fail to start.\n", id);
        print!("\nContinue? (y/N): ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("❌ Aborted");
            return Ok(());
        }
    }

    runners_file.runners.remove(index);
    println!("📝 Removing from {}...", path.display());
    save_runners_config(path, &runners_file).await?;

    println!("✅ Runner '{}' removed successfully!", id);
    Ok(())
}

/// List all configured runners
pub async fn list_runners(path: &Path) -> Result<()> {
    let runners_file = load_runners_config(path).await?;

    if runners_file.runners.is_empty() {
        println!("No runners configured.");
        println!("\n💡 Add a runner with: lesson-cli add-runner --id <id> --command <cmd> --ext <ext>");
        return Ok(());
    }

    println!("📋 Configured Runners:\n");
    println!(
        "{:<12} {:<8} {:<24} {:<30} {:<10}",
        "Id", "Kind", "Command", "Image", "CPU/Mem"
    );
    println!("{}", "─".repeat(90));

    for runner in &runners_file.runners {
        let command = std::iter::once(runner.command.as_str())
            .chain(runner.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        println!(
            "{:<12} {:<8} {:<24} {:<30} {:.1}/{} MB",
            runner.id,
            runner.kind,
            command,
            runner.image.as_deref().unwrap_or("-"),
            runner.cpu_limit,
            runner.memory_limit_mb
        );
    }

    println!("\n✅ Total: {} runner(s)", runners_file.runners.len());
    Ok(())
}

/// Initialize a project layout: runner registry, curriculum and locale directories
pub async fn init_project(path: &str) -> Result<()> {
    println!("🚀 Initializing lesson runner layout in: {}", path);
    let project_path = Path::new(path);

    for dir in ["config", "curriculum", "locales"] {
        fs::create_dir_all(project_path.join(dir))
            .await
            .with_context(|| format!("Failed to create {}", dir))?;
        println!("  ✅ Created: {}/", dir);
    }

    let runners_path = project_path.join(DEFAULT_RUNNERS_PATH);
    if !runners_path.exists() {
        let runners_file = RunnersFile {
            runners: vec![RunnerConfig {
                id: "node".to_string(),
                kind: RunnerKind::Process,
                command: "node".to_string(),
                args: vec!["-".to_string()],
                file_extension: ".js".to_string(),
                image: None,
                memory_limit_mb: 256,
                cpu_limit: 0.5,
                timeout_ms: 5000,
            }],
        };
        save_runners_config(&runners_path, &runners_file).await?;
        println!("  ✅ Created: {}", DEFAULT_RUNNERS_PATH);
    }

    let locale_path = project_path.join("locales/english.json");
    if !locale_path.exists() {
        fs::write(&locale_path, "{}\n").await?;
        println!("  ✅ Created: locales/english.json");
    }

    println!("✅ Layout initialized successfully!");
    println!("\n📋 Next steps:");
    println!("  1. Add a curriculum: curriculum/<project-id>.json");
    println!("  2. Check it: lesson-cli check --project <project-id>");
    println!("  3. Start Redis, lesson-worker and lesson-api");

    Ok(())
}

/// Outcome of checking one lesson
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LessonCheck {
    Runner(String),
    NoCode,
    Mismatch(String),
    Unsupported(String),
}

/// Check each lesson against the runner registry
pub fn check_lessons(curriculum: &CurriculumFile, runners: &RunnersFile) -> Vec<(u32, LessonCheck)> {
    curriculum
        .lessons
        .iter()
        .map(|lesson| {
            let check = match lesson.resolve_runner() {
                Ok(Some(runner)) if runners.runners.iter().any(|r| r.id == runner) => {
                    LessonCheck::Runner(runner.to_string())
                }
                Ok(Some(runner)) => LessonCheck::Unsupported(runner.to_string()),
                Ok(None) => LessonCheck::NoCode,
                Err(mismatch) => LessonCheck::Mismatch(mismatch.to_string()),
            };
            (lesson.number, check)
        })
        .collect()
}

/// Check a curriculum file before learners run it
pub async fn check_project(runners_path: &Path, curriculum_dir: &Path, project_id: &str) -> Result<()> {
    if !is_valid_project_id(project_id) {
        bail!("Invalid project id '{}'", project_id);
    }

    let path = curriculum_dir.join(format!("{}.json", project_id));
    println!("🔍 Checking {}...", path.display());

    let content = fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let curriculum = CurriculumFile::parse(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    let runners = load_runners_config(runners_path).await?;

    println!(
        "📋 {} ({} lessons, {})\n",
        curriculum.project.title,
        curriculum.project.number_of_lessons,
        curriculum.project.run_mode()
    );

    let checks = check_lessons(&curriculum, &runners);
    let mut problems = 0;
    for (number, check) in &checks {
        match check {
            LessonCheck::Runner(runner) => println!("  ✅ Lesson {}: runner '{}'", number, runner),
            LessonCheck::NoCode => println!("  ✅ Lesson {}: no hooks or tests", number),
            LessonCheck::Mismatch(message) => {
                problems += 1;
                println!("  ❌ Lesson {}: {}", number, message);
            }
            LessonCheck::Unsupported(runner) => {
                problems += 1;
                println!(
                    "  ❌ Lesson {}: runner '{}' is not configured in {}",
                    number,
                    runner,
                    runners_path.display()
                );
            }
        }
    }

    if checks.len() as u32 != curriculum.project.number_of_lessons {
        println!(
            "\n⚠️  Project declares {} lessons, file contains {}",
            curriculum.project.number_of_lessons,
            checks.len()
        );
    }

    if problems > 0 {
        bail!("{} lesson(s) cannot run", problems);
    }

    println!("\n✅ All lessons resolve to a configured runner");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn runner(id: &str) -> RunnerConfig {
        RunnerConfig {
            id: id.to_string(),
            kind: RunnerKind::Process,
            command: id.to_string(),
            args: vec![],
            file_extension: ".js".to_string(),
            image: None,
            memory_limit_mb: 256,
            cpu_limit: 0.5,
            timeout_ms: 5000,
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("lesson-cli-{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    const CURRICULUM: &str = r#"{
        "project": {"id": "calculator", "title": "Calculator", "numberOfLessons": 3},
        "lessons": [
            {"number": 0, "tests": [{"text": "adds", "code": "add()", "runner": "node"}]},
            {"number": 1, "tests": [
                {"text": "a", "code": "a()", "runner": "node"},
                {"text": "b", "code": "b()", "runner": "python"}
            ]},
            {"number": 2, "tests": [{"text": "c", "code": "c()", "runner": "ruby"}]}
        ]
    }"#;

    #[test]
    fn test_check_lessons() {
        let curriculum = CurriculumFile::parse(CURRICULUM).unwrap();
        let runners = RunnersFile {
            runners: vec![runner("node")],
        };

        let checks = check_lessons(&curriculum, &runners);
        assert_eq!(checks[0], (0, LessonCheck::Runner("node".to_string())));
        assert!(matches!(&checks[1], (1, LessonCheck::Mismatch(m)) if m.contains("test 1")));
        assert_eq!(checks[2], (2, LessonCheck::Unsupported("ruby".to_string())));
    }

    #[tokio::test]
    async fn test_add_and_remove_runner() {
        let path = temp_path("runners.json");

        add_runner(&path, runner("node")).await.unwrap();
        add_runner(&path, runner("python")).await.unwrap();
        assert!(add_runner(&path, runner("node")).await.is_err());

        let loaded = load_runners_config(&path).await.unwrap();
        assert_eq!(loaded.runners.len(), 2);

        remove_runner(&path, "node", true).await.unwrap();
        let loaded = load_runners_config(&path).await.unwrap();
        assert_eq!(loaded.runners, vec![runner("python")]);
        assert!(remove_runner(&path, "node", true).await.is_err());

        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }

    #[tokio::test]
    async fn test_init_and_check() {
        let root = temp_path("project");
        let root_str = root.to_string_lossy().to_string();
        init_project(&root_str).await.unwrap();

        let runners_path = root.join(DEFAULT_RUNNERS_PATH);
        assert!(runners_path.exists());
        assert!(root.join("locales/english.json").exists());

        let curriculum_dir = root.join("curriculum");
        std::fs::write(
            curriculum_dir.join("greeting.json"),
            r#"{
                "project": {"id": "greeting", "title": "Greeting", "numberOfLessons": 1},
                "lessons": [{"number": 0, "tests": [{"text": "greets", "code": "greet()", "runner": "node"}]}]
            }"#,
        )
        .unwrap();
        std::fs::write(curriculum_dir.join("calculator.json"), CURRICULUM).unwrap();

        check_project(&runners_path, &curriculum_dir, "greeting").await.unwrap();
        assert!(check_project(&runners_path, &curriculum_dir, "calculator").await.is_err());
        assert!(check_project(&runners_path, &curriculum_dir, "missing").await.is_err());

        if let Some(dir) = root.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }
}
