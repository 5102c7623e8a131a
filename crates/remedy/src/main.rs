use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

use remedy_logging::{init_tracing, LogFormat};

mod config;
mod inspect;
mod run;

#[derive(Parser, Debug)]
#[command(
    name = "remedy",
    about = "Audit, fix and judge source files with LLM roles",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Diagnostic log level (RUST_LOG takes precedence)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Remediate every source file under a directory
    Run(run::RunArgs),

    /// Rebuild a file's iteration history from an experiment log
    Replay {
        /// Experiment log (JSON lines)
        log: PathBuf,

        /// File whose history to rebuild, as recorded in the log
        #[arg(long)]
        file: PathBuf,

        /// Run to replay (default: the latest run that touched the file)
        #[arg(long)]
        run_id: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that every record in an experiment log is well formed
    CheckLog {
        /// Experiment log (JSON lines)
        log: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormatChoice {
    Pretty,
    Json,
    Compact,
}

impl From<LogFormatChoice> for LogFormat {
    fn from(choice: LogFormatChoice) -> Self {
        match choice {
            LogFormatChoice::Pretty => LogFormat::Pretty,
            LogFormatChoice::Json => LogFormat::Json,
            LogFormatChoice::Compact => LogFormat::Compact,
        }
    }
}

/// Exit code for runs that could not get going (config, I/O, bad log)
const EXIT_ABORTED: i32 = 2;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match dispatch(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(EXIT_ABORTED);
        }
    }
}

async fn dispatch(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Run(args) => {
            init_tracing(&cli.log_level, args.log_format.into());
            run::handle_run_command(args).await
        }
        Commands::Replay {
            log,
            file,
            run_id,
            json,
        } => {
            init_tracing(&cli.log_level, LogFormat::Pretty);
            inspect::handle_replay_command(&log, &file, run_id.as_deref(), json)
        }
        Commands::CheckLog { log, json } => {
            init_tracing(&cli.log_level, LogFormat::Pretty);
            inspect::handle_check_log_command(&log, json)
        }
    }
}
