//! pg-backup-runner - Main entry point
//!
//! One short-lived run per invocation: `backup`, `clean` or `combo`. The exit
//! code is the contract with the scheduler: 0 success, 1 failure, 2 invalid
//! environment or usage, 3 another run holds the lock.

use clap::Parser;
use pg_backup_runner::{notify::Notifier, tool::WalG, utils, Config, Mode, RunOutcome, Runner};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Log what would be pushed or deleted without touching the backup store
    #[arg(long)]
    dry_run: bool,

    /// Operation to run
    #[arg(value_enum)]
    mode: Mode,
}

#[tokio::main]
async fn main() {
    // clap exits 2 on usage errors and 0 for --help/--version.
    let args = Args::parse();

    let outcome = match run(args).await {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("pg-backup-runner: {:#}", e);
            RunOutcome::EnvInvalid
        }
    };
    std::process::exit(outcome.exit_code());
}

async fn run(args: Args) -> anyhow::Result<RunOutcome> {
    let config = Config::load(args.config.as_deref())?;

    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!("Starting pg-backup-runner v{}", env!("CARGO_PKG_VERSION"));

    let tool = WalG::from_config(&config);
    let notifier = Notifier::new(&config.notify);
    let runner = Runner::new(&config, &tool, notifier).with_dry_run(args.dry_run);

    Ok(runner.run(args.mode).await)
}
