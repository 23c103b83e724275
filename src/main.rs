//! # Course Context CLI (`cctx`)
//!
//! Builds retrieval-grounded context blocks from course materials, either
//! one-shot from the command line or as an HTTP service.
//!
//! ## Usage
//!
//! ```bash
//! cctx --config ./config/cctx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cctx courses` | List courses and their material counts |
//! | `cctx context <course> "<question>"` | Build a context for one course |
//! | `cctx multi <user> "<question>"` | Build a combined context across courses |
//! | `cctx detect "<question>"` | Show which courses a question is about |
//! | `cctx serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Context for a CS101 question, at most 3 materials
//! cctx context cs101 "why does my while loop never stop" --max-materials 3
//!
//! # Same, as JSON, preferring homework and exams
//! cctx context cs101 "recursion base case" --priority homework --priority exam --json
//!
//! # Let the question pick the courses among a student's enrollments
//! cctx multi alice "eigenvalues of a rotation matrix"
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use course_context::config;
use course_context::context_cmd;
use course_context::courses;
use course_context::engine::{Engine, OptionOverrides};
use course_context::server;

/// Course Context: retrieval and context assembly over course materials.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/cctx.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "cctx",
    about = "Course Context: retrieval and context assembly over course materials",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cctx.toml")]
    config: PathBuf,

    /// Log at debug level (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List courses and how many materials each has.
    Courses,

    /// Build a context for one course.
    Context {
        /// Course id from the catalog.
        course: String,

        /// The student's question.
        question: String,

        #[command(flatten)]
        options: OptionArgs,

        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Build one combined context across several courses.
    ///
    /// Without `--course`, courses are detected from the question among the
    /// user's enrollments.
    Multi {
        /// User id from the catalog's enrollments.
        user: String,

        /// The student's question.
        question: String,

        /// Restrict to these course ids (repeatable).
        #[arg(long = "course")]
        courses: Vec<String>,

        #[command(flatten)]
        options: OptionArgs,

        #[arg(long)]
        json: bool,
    },

    /// Score every course against a question.
    Detect {
        question: String,

        #[arg(long)]
        json: bool,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

/// Overrides for the `[context]` defaults.
#[derive(clap::Args)]
struct OptionArgs {
    /// Maximum number of materials in the context.
    #[arg(long)]
    max_materials: Option<usize>,

    /// Minimum relevance (0-100) a material needs to be included.
    #[arg(long)]
    min_relevance: Option<f64>,

    /// Token budget for the context text.
    #[arg(long)]
    max_tokens: Option<usize>,

    /// Material types listed first (repeatable).
    #[arg(long = "priority")]
    priority: Vec<String>,
}

impl OptionArgs {
    fn overrides(&self) -> OptionOverrides {
        OptionOverrides {
            max_materials: self.max_materials,
            min_relevance: self.min_relevance,
            max_tokens: self.max_tokens,
            priority_types: (!self.priority.is_empty()).then(|| self.priority.clone()),
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;
    let engine = Engine::load(cfg).await?;

    match cli.command {
        Commands::Courses => {
            courses::list_courses(&engine)?;
        }
        Commands::Context {
            course,
            question,
            options,
            json,
        } => {
            context_cmd::run_context(&engine, &course, &question, &options.overrides(), json).await?;
        }
        Commands::Multi {
            user,
            question,
            courses,
            options,
            json,
        } => {
            context_cmd::run_multi(&engine, &user, &question, &courses, &options.overrides(), json)
                .await?;
        }
        Commands::Detect { question, json } => {
            context_cmd::run_detect(&engine, &question, json)?;
        }
        Commands::Serve => {
            server::run_server(engine).await?;
        }
    }

    Ok(())
}
