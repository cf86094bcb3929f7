mod commands;
mod io;
mod logging;
mod record;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "chunkflow",
    version,
    about = "Chunk-oriented batch job runner"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a batch job
    Run {
        /// Path to job YAML file
        job: PathBuf,
    },
    /// Validate a job configuration without running it
    Validate {
        /// Path to job YAML file
        job: PathBuf,
    },
    /// Show recent runs of a job
    History {
        /// Path to job YAML file
        job: PathBuf,
        /// Maximum runs to show
        #[arg(short, long, default_value_t = 10)]
        limit: u32,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run { job } => commands::run::execute(&job),
        Commands::Validate { job } => commands::validate::execute(&job),
        Commands::History { job, limit } => commands::history::execute(&job, limit),
    }
}
