use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

mod cmd;

#[derive(Parser)]
#[command(name = "promoter")]
#[command(version, about = "Promote numbered work items to an issue tracker one at a time")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one promotion cycle
    Run {
        /// Decide what would be created without touching the tracker or ledger
        #[arg(long)]
        dry_run: bool,
    },
    /// Poll continuously, running one cycle per interval
    Watch {
        /// Seconds between cycles (overrides poll.interval_secs)
        #[arg(long)]
        interval: Option<u64>,

        /// Stop after this many cycles
        #[arg(long)]
        max_cycles: Option<u32>,
    },
    /// Reconcile the ledger against the tracker without creating anything
    Sync,
    /// Show the local ledger and queue (no network)
    Status,
    /// List queue files with their ledger status
    List,
    /// Verify tracker credentials and access
    Check,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default promoter.toml file
    Init,
}

impl Commands {
    /// Commands that operate the promoter and keep a file log.
    fn writes_log(&self) -> bool {
        matches!(
            self,
            Commands::Run { .. } | Commands::Watch { .. } | Commands::Sync
        )
    }
}

/// Install the stderr subscriber, plus a daily file under `log_dir` if given.
fn init_tracing(cli: &Cli, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let default_level = if cli.verbose { "promoter=debug" } else { "promoter=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let stderr_layer = if cli.log_json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let file = log_dir.and_then(|dir| {
        RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("promoter")
            .filename_suffix("log")
            .build(dir)
            .map_err(|e| eprintln!("File logging disabled: {}", e))
            .ok()
    });
    let (file_layer, guard) = match file {
        Some(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

/// Load `.env` from the project directory; a missing file is fine.
fn load_dotenv(project_dir: &Path) {
    if let Err(e) = dotenvy::from_path(project_dir.join(".env"))
        && !e.not_found()
    {
        eprintln!("Ignoring unreadable .env: {}", e);
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    load_dotenv(&project_dir);

    let log_dir = project_dir
        .join(promoter::config::PROMOTER_DIR)
        .join("logs");
    let _guard = init_tracing(&cli, cli.command.writes_log().then_some(log_dir.as_path()));

    let code = match &cli.command {
        Commands::Run { dry_run } => cmd::cmd_run(&project_dir, *dry_run).await?,
        Commands::Watch {
            interval,
            max_cycles,
        } => cmd::cmd_watch(&project_dir, *interval, *max_cycles).await?,
        Commands::Sync => cmd::cmd_sync(&project_dir).await?,
        Commands::Status => cmd::cmd_status(&project_dir)?,
        Commands::List => cmd::cmd_list(&project_dir)?,
        Commands::Check => cmd::cmd_check(&project_dir).await?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    };

    Ok(code)
}
