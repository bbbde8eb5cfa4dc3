mod commands;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "codegrade-cli")]
#[command(about = "Codegrade CLI - Check, grade, and queue Python submissions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Grading inputs shared by `grade` and `submit`
#[derive(Args)]
pub struct GradeArgs {
    /// Python source file
    pub file: PathBuf,

    /// JSON file with the test cases
    #[arg(short, long)]
    pub tests: PathBuf,

    /// Score scale: ten or hundred
    #[arg(short, long, default_value = "ten")]
    pub scale: String,

    /// Number of hints the student used
    #[arg(long, default_value = "0")]
    pub hints: u32,

    /// Comma-separated hint penalties in points (e.g. 5,10,20)
    #[arg(short, long)]
    pub penalties: Option<String>,

    /// Per-test timeout in seconds
    #[arg(long, default_value = "5")]
    pub timeout: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the static guard over a source file
    Check {
        /// Python source file
        file: PathBuf,
    },

    /// Grade a source file locally
    Grade {
        #[command(flatten)]
        args: GradeArgs,

        /// Print the full verdict as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Queue a source file for a worker
    Submit {
        #[command(flatten)]
        args: GradeArgs,
    },

    /// Fetch a worker's report
    Result {
        /// Job id printed by `submit`
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check { file } => {
            commands::check(&file)?;
        }
        Commands::Grade { args, json } => {
            commands::grade(&args, json).await?;
        }
        Commands::Submit { args } => {
            commands::submit(&args).await?;
        }
        Commands::Result { id } => {
            commands::result(&id).await?;
        }
    }

    Ok(())
}
