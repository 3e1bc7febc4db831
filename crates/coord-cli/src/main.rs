mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{action::ActionSubcommand, job::JobSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "coord",
    about = "Time-based coordinator jobs: materialize actions, wait for their data, admit them",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .coord/)
    #[arg(long, global = true, env = "COORD_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .coord/ with its database and default config
    Init,

    /// Submit, inspect and kill jobs
    Job {
        #[command(subcommand)]
        subcommand: JobSubcommand,
    },

    /// Create WAITING actions for a job's nominal times
    Materialize {
        job: String,
        /// Window start (RFC 3339); needs --end
        #[arg(long, requires = "end")]
        start: Option<String>,
        /// Window end, exclusive (RFC 3339); needs --start
        #[arg(long, requires = "start")]
        end: Option<String>,
    },

    /// Run one input check for an action (<job-id>@<number>)
    Check { action: String },

    /// Admit a job's READY actions up to its concurrency limit
    Admit { job: String },

    /// Inspect actions and report their outcomes
    Action {
        #[command(subcommand)]
        subcommand: ActionSubcommand,
    },

    /// Drive all jobs: materialize, re-check inputs with backoff, admit
    Run {
        /// Do a single pass and exit
        #[arg(long)]
        once: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { once: false } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Job { subcommand } => cmd::job::run(&root, subcommand, cli.json),
        Commands::Materialize { job, start, end } => {
            cmd::materialize::run(&root, &job, start.as_deref(), end.as_deref(), cli.json)
        }
        Commands::Check { action } => cmd::check::run(&root, &action, cli.json),
        Commands::Admit { job } => cmd::admit::run(&root, &job, cli.json),
        Commands::Action { subcommand } => cmd::action::run(&root, subcommand, cli.json),
        Commands::Run { once } => cmd::run::run(&root, once, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
