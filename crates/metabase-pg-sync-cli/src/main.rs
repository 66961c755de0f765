//! metabase-pg-sync CLI - replicate a Metabase-fronted database into local
//! PostgreSQL.

use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use metabase_pg_sync::{Executor, LogLevel, RunConfig, RunMode, SyncError};
use tokio::sync::{mpsc, watch};
use tracing::Level;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

mod progress;

#[derive(Parser)]
#[command(name = "metabase-pg-sync")]
#[command(about = "Replicate upstream tables into a local PostgreSQL database")]
#[command(disable_version_flag = true)]
struct Cli {
    /// Analyze what a sync would change without touching the target
    #[arg(short = 'd', long)]
    dry_run: bool,

    /// Record per-table failures, skip rollback, and exit successfully
    #[arg(short = 'i', long)]
    ignore_errors: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.kind() == clap::error::ErrorKind::DisplayHelp => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(_) => {
            // Unknown flags print usage and exit cleanly.
            let _ = Cli::command().print_help();
            return ExitCode::SUCCESS;
        }
    };

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, SyncError> {
    dotenvy::dotenv().ok();

    let mut config = RunConfig::from_env()?;
    if cli.dry_run {
        config = config.with_mode(RunMode::DryRun);
    }
    if cli.ignore_errors {
        config = config.with_continue_on_error();
    }

    setup_logging(config.log_level);

    let cancel_rx = setup_signal_handler();
    let (progress_tx, progress_rx) = mpsc::unbounded_channel();
    let renderer = tokio::spawn(progress::render(progress_rx));

    let outcome = Executor::new(config)
        .with_progress(progress_tx)
        .with_cancel(cancel_rx)
        .run()
        .await?;

    let _ = renderer.await;
    progress::print_summary(&outcome);

    Ok(ExitCode::SUCCESS)
}

fn setup_logging(level: LogLevel) {
    let level = match level {
        LogLevel::Error => Level::ERROR,
        LogLevel::Warn => Level::WARN,
        LogLevel::Info => Level::INFO,
        LogLevel::Debug => Level::DEBUG,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Setup signal handlers for graceful shutdown.
/// Returns a watch receiver that flips to true when a signal arrives.
#[cfg(unix)]
fn setup_signal_handler() -> watch::Receiver<bool> {
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let tx_int = cancel_tx.clone();
    let tx_term = cancel_tx;

    tokio::spawn(async move {
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to setup SIGINT handler");
        sigint.recv().await;
        eprintln!("\nReceived SIGINT. Aborting run...");
        let _ = tx_int.send(true);
    });

    tokio::spawn(async move {
        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to setup SIGTERM handler");
        sigterm.recv().await;
        eprintln!("\nReceived SIGTERM. Aborting run...");
        let _ = tx_term.send(true);
    });

    cancel_rx
}

#[cfg(not(unix))]
fn setup_signal_handler() -> watch::Receiver<bool> {
    let (cancel_tx, cancel_rx) = watch::channel(false);

    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to setup Ctrl-C handler");
        eprintln!("\nReceived Ctrl-C. Aborting run...");
        let _ = cancel_tx.send(true);
    });

    cancel_rx
}
