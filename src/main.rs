mod client;
mod config;
mod coordinator;
mod job;
mod logging;
mod process;
mod runner;
mod signals;

use clap::Parser;
use config::JobguardConfig;
use coordinator::JobCoordinator;
use process::ProcessClient;
use std::path::PathBuf;
use std::sync::Arc;

/// Run a batch of jobs, track their resource usage, and cancel whatever is
/// still running if the process is asked to terminate.
#[derive(Parser, Debug)]
#[command(name = "jobguard", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "jobguard.toml")]
    config: PathBuf,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Debug logging regardless of LOG_LEVEL
    #[arg(short, long)]
    verbose: bool,

    /// Write the run summary as JSON to this file (stdout carries the logs)
    #[arg(long, value_name = "PATH")]
    summary_json: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        logging::resolve_level(std::env::var("LOG_LEVEL").ok().as_deref())
    };
    logging::init(level);
    tracing::debug!(?cli, "parsed CLI arguments");

    let config = match JobguardConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{e}");
            std::process::exit(1);
        }
    };

    if cli.dry_run {
        match toml::to_string_pretty(&config) {
            Ok(resolved) => println!("{resolved}"),
            Err(e) => {
                tracing::error!("failed to render config: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    let coordinator = JobCoordinator::start(config.watcher.poll_interval());
    if let Err(e) = signals::install(Arc::clone(&coordinator)) {
        tracing::error!("failed to install signal handlers: {e}");
        std::process::exit(1);
    }

    let client = Arc::new(ProcessClient::new());
    match runner::run(&config, client, &coordinator).await {
        Ok(summary) => {
            if let Some(path) = &cli.summary_json {
                if let Err(e) = summary.write_json(path) {
                    tracing::warn!("failed to write summary to {}: {e}", path.display());
                }
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "run failed, cancelling outstanding jobs");
            signals::shutdown(&coordinator).await;
            std::process::exit(1);
        }
    }
}
