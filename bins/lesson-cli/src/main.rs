mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use lesson_common::runners::{RunnerConfig, RunnerKind, DEFAULT_RUNNERS_PATH};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lesson-cli")]
#[command(about = "Lesson CLI - Manage runners and check curriculum files", long_about = None)]
struct Cli {
    /// Runner registry file
    #[arg(long, global = true, default_value = DEFAULT_RUNNERS_PATH)]
    runners: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a runner that lessons can reference by id
    AddRunner {
        /// Runner id used by hooks and tests (e.g., node, python)
        #[arg(short, long)]
        id: String,

        /// Execution backend: docker or process
        #[arg(short, long, default_value = "process")]
        kind: RunnerKind,

        /// Interpreter command (e.g., node, python3)
        #[arg(short, long)]
        command: String,

        /// Extra interpreter argument, repeatable
        #[arg(short, long = "arg")]
        args: Vec<String>,

        /// Source file extension (e.g., js, py)
        #[arg(short, long)]
        ext: String,

        /// Docker image (docker runners only)
        #[arg(long)]
        image: Option<String>,

        /// Memory limit in MB
        #[arg(short, long, default_value = "256")]
        memory: u32,

        /// CPU limit
        #[arg(long, default_value = "0.5")]
        cpu: f32,

        /// Per-execution timeout in milliseconds
        #[arg(long, default_value = "5000")]
        timeout_ms: u64,
    },

    /// Remove a runner from the registry
    RemoveRunner {
        /// Runner id
        #[arg(short, long)]
        id: String,

        /// Skip confirmation
        #[arg(short, long, default_value = "false")]
        yes: bool,
    },

    /// List configured runners
    ListRunners,

    /// Initialize runner registry, curriculum and locale directories
    Init {
        /// Project path
        #[arg(short, long, default_value = ".")]
        path: String,
    },

    /// Check that every lesson of a curriculum resolves to one configured runner
    Check {
        /// Project id (curriculum/<id>.json)
        #[arg(short, long)]
        project: String,

        /// Curriculum directory
        #[arg(long, default_value = "curriculum")]
        curriculum: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::AddRunner {
            id,
            kind,
            command,
            args,
            ext,
            image,
            memory,
            cpu,
            timeout_ms,
        } => {
            let file_extension = if ext.starts_with('.') {
                ext
            } else {
                format!(".{}", ext)
            };
            let runner = RunnerConfig {
                id,
                kind,
                command,
                args,
                file_extension,
                image,
                memory_limit_mb: memory,
                cpu_limit: cpu,
                timeout_ms,
            };
            commands::add_runner(&cli.runners, runner).await?;
        }
        Commands::RemoveRunner { id, yes } => {
            commands::remove_runner(&cli.runners, &id, yes).await?;
        }
        Commands::ListRunners => {
            commands::list_runners(&cli.runners).await?;
        }
        Commands::Init { path } => {
            commands::init_project(&path).await?;
        }
        Commands::Check {
            project,
            curriculum,
        } => {
            commands::check_project(&cli.runners, &curriculum, &project).await?;
        }
    }

    Ok(())
}
