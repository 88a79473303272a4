/// Signal handling for graceful shutdown.
///
/// SIGTERM and SIGINT both trigger the coordinator's termination path:
/// outstanding jobs are cancelled (unless the run already finished) before
/// the process exits with status 1.
use crate::coordinator::{JobCoordinator, WatchOutcome};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Exit status after a signal-triggered shutdown.
pub const SHUTDOWN_EXIT_CODE: i32 = 1;

/// Install the termination listener. Must be called inside a tokio runtime.
///
/// The returned task never completes normally: on the first signal it runs
/// [`shutdown`] and exits the process.
pub fn install(coordinator: Arc<JobCoordinator>) -> std::io::Result<JoinHandle<()>> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    Ok(tokio::spawn(async move {
        let received = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        };
        warn!(signal = received, "termination signal received, shutting down");
        shutdown(&coordinator).await;
        std::process::exit(SHUTDOWN_EXIT_CODE);
    }))
}

/// The termination path without the final exit: flag the run, wait for the
/// watcher to settle, and log what happened.
pub async fn shutdown(coordinator: &JobCoordinator) -> Option<WatchOutcome> {
    let outcome = coordinator.terminate().await;
    match &outcome {
        Some(WatchOutcome::Finished) => info!("run already finished, nothing cancelled"),
        Some(WatchOutcome::Cancelled(report)) => info!(
            cancelled = report.cancelled.len(),
            failed = report.failed.len(),
            "outstanding jobs cancelled"
        ),
        None => warn!("watcher did not report an outcome"),
    }
    outcome
}
