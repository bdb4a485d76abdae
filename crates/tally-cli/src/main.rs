use std::error::Error;

use clap::{Parser, Subcommand};
use tally_core::{describe, Settings};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "tally", version, about = "Tally time tracker")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start tracking a project, optionally on a task
    Start(commands::track::StartArgs),
    /// Stop the running block
    Stop {
        /// End time (RFC 3339), defaults to now
        #[arg(long)]
        at: Option<String>,
    },
    /// Start a new block on the previous block's project and task
    Resume {
        /// Start time (RFC 3339), defaults to now
        #[arg(long)]
        at: Option<String>,
    },
    /// Show the running and previous block as JSON
    Status,
    /// Project management
    Project {
        #[command(subcommand)]
        action: commands::project::ProjectAction,
    },
    /// Task management
    Task {
        #[command(subcommand)]
        action: commands::task::TaskAction,
    },
    /// Tracked block history
    Block {
        #[command(subcommand)]
        action: commands::block::BlockAction,
    },
    /// Tracked time per project or task
    Report(commands::report::ReportArgs),
    /// Daily and weekly time goals
    Goal {
        #[command(subcommand)]
        action: commands::goal::GoalAction,
    },
    /// Webhook notification queue
    Notify {
        #[command(subcommand)]
        action: commands::notify::NotifyAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn run(command: Commands, settings: Settings) -> Result<(), Box<dyn Error>> {
    match command {
        Commands::Start(args) => commands::track::start(args, &settings),
        Commands::Stop { at } => commands::track::stop(at.as_deref(), &settings),
        Commands::Resume { at } => commands::track::resume(at.as_deref(), &settings),
        Commands::Status => commands::track::status(&settings),
        Commands::Project { action } => commands::project::run(action, &settings),
        Commands::Task { action } => commands::task::run(action, &settings),
        Commands::Block { action } => commands::block::run(action, &settings),
        Commands::Report(args) => commands::report::run(args, &settings),
        Commands::Goal { action } => commands::goal::run(action, &settings),
        Commands::Notify { action } => commands::notify::run(action, &settings),
        Commands::Config { action } => commands::config::run(action, settings),
    }
}

/// Log to stderr. `TALLY_LOG` wins over the configured level.
fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_env("TALLY_LOG")
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    let settings = Settings::load();
    init_tracing(settings.as_ref().map_or("warn", |s| s.log.level.as_str()));

    let result = match settings {
        Ok(settings) => run(cli.command, settings),
        Err(e) => Err(e.into()),
    };

    if let Err(e) = result {
        let message = describe(e.as_ref());
        eprintln!("error: {message}");
        std::process::exit(message.category.exit_code());
    }
}
