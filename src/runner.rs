/// Drives one run: submit every configured job, register it with the
/// coordinator, wait for the batch, then report completions.
use crate::client::{ClientError, ExecutionClient};
use crate::config::JobguardConfig;
use crate::coordinator::JobCoordinator;
use crate::job::CompletedJob;
use crate::process::ProcessClient;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Totals for a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_name: String,
    pub jobs: usize,
    pub sum_slot_millis: u64,
    pub sum_total_bytes_processed: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    /// Write the summary as pretty JSON to `path`.
    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}

/// Errors that abort a run.
#[derive(Debug)]
pub enum RunError {
    /// A job could not be started or did not succeed.
    Job(ClientError),
    /// Termination was requested while jobs were still being submitted.
    Terminated { submitted: usize },
    /// The task waiting on a job panicked or was aborted.
    Wait { source: tokio::task::JoinError },
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::Job(e) => write!(f, "{}", e),
            RunError::Terminated { submitted } => {
                write!(f, "run terminated after submitting {} jobs", submitted)
            }
            RunError::Wait { source } => write!(f, "failed waiting on job: {}", source),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::Job(e) => Some(e),
            RunError::Wait { source } => Some(source),
            RunError::Terminated { .. } => None,
        }
    }
}

impl From<ClientError> for RunError {
    fn from(e: ClientError) -> Self {
        RunError::Job(e)
    }
}

/// Execute all configured jobs.
///
/// Completions are only reported once every job has succeeded, so the run
/// stays cancellable until the whole batch is done. On the first failure the
/// error is returned and the run is left `Running`. Submission stops as soon
/// as the run is cancelling.
pub async fn run(
    config: &JobguardConfig,
    client: Arc<ProcessClient>,
    coordinator: &JobCoordinator,
) -> Result<RunSummary, RunError> {
    let started_at = Utc::now();
    tracing::info!(run = %config.run.name, jobs = config.jobs.len(), "starting run");

    let execution: Arc<dyn ExecutionClient> = client.clone();
    let mut waits: Vec<JoinHandle<Result<CompletedJob, ClientError>>> =
        Vec::with_capacity(config.jobs.len());
    for spec in &config.jobs {
        if coordinator.is_cancelling() {
            return Err(RunError::Terminated {
                submitted: waits.len(),
            });
        }
        let job = client.submit(spec)?;
        let accepted = coordinator.register_job(Arc::clone(&execution), job.id());
        waits.push(tokio::spawn(job.wait()));
        if !accepted {
            return Err(RunError::Terminated {
                submitted: waits.len(),
            });
        }
    }

    let mut completed = Vec::with_capacity(waits.len());
    for wait in waits {
        let job = wait.await.map_err(|e| RunError::Wait { source: e })??;
        completed.push(job);
    }

    for job in &completed {
        coordinator.report_job_finished(job);
    }

    let summary = RunSummary {
        run_name: config.run.name.clone(),
        jobs: completed.len(),
        sum_slot_millis: coordinator.sum_slot_millis(),
        sum_total_bytes_processed: coordinator.sum_total_bytes_processed(),
        started_at,
        finished_at: Utc::now(),
    };
    tracing::info!(
        run = %summary.run_name,
        jobs = summary.jobs,
        sum_slot_millis = summary.sum_slot_millis,
        sum_total_bytes_processed = summary.sum_total_bytes_processed,
        "run finished"
    );
    Ok(summary)
}
