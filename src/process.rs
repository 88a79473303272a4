/// Local execution client: each job is a subprocess in its own process group.
///
/// Usage metrics are read from the job's stdout. The last line that parses
/// as a JSON object is taken as its `JobStats`; no such line means zero usage.
use crate::client::{ClientError, ExecutionClient};
use crate::config::JobSpec;
use crate::job::{CompletedJob, JobStats};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::process::{Child, Command};

type Groups = Arc<Mutex<HashMap<String, i32>>>;

/// Spawns jobs and cancels them by signalling their process group.
///
/// Only jobs that have not been reaped yet are known; a finished job's
/// group id is forgotten so it is never signalled after reuse.
#[derive(Default)]
pub struct ProcessClient {
    groups: Groups,
}

/// A submitted job that has not been waited on yet.
pub struct RunningJob {
    id: String,
    child: Child,
    groups: Groups,
}

fn lock_groups(groups: &Mutex<HashMap<String, i32>>) -> MutexGuard<'_, HashMap<String, i32>> {
    groups
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ProcessClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn groups(&self) -> MutexGuard<'_, HashMap<String, i32>> {
        lock_groups(&self.groups)
    }

    /// Jobs submitted and not yet reaped.
    #[cfg(test)]
    pub fn running_jobs(&self) -> usize {
        self.groups().len()
    }

    /// Start a job. The child leads a new process group so cancellation
    /// reaches everything it spawns.
    pub fn submit(&self, spec: &JobSpec) -> Result<RunningJob, ClientError> {
        let child = Command::new(&spec.command)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .process_group(0)
            .spawn()
            .map_err(|e| ClientError::Spawn {
                job_id: spec.id.clone(),
                source: e,
            })?;

        let pid = child.id().unwrap_or(0);
        tracing::info!(job_id = %spec.id, pid, command = %spec.command, "job submitted");
        if pid > 0 {
            self.groups().insert(spec.id.clone(), pid as i32);
        }

        Ok(RunningJob {
            id: spec.id.clone(),
            child,
            groups: Arc::clone(&self.groups),
        })
    }
}

impl ExecutionClient for ProcessClient {
    fn cancel_job(&self, job_id: &str) -> Result<(), ClientError> {
        let groups = self.groups();
        let pgid = groups
            .get(job_id)
            .copied()
            .ok_or_else(|| ClientError::UnknownJob {
                job_id: job_id.to_string(),
            })?;

        // Signalled under the lock so a concurrent reap cannot drop the entry mid-call.
        killpg(Pid::from_raw(pgid), Signal::SIGTERM).map_err(|e| ClientError::Signal {
            job_id: job_id.to_string(),
            source: e,
        })
    }
}

impl RunningJob {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the job to exit and collect its usage.
    pub async fn wait(self) -> Result<CompletedJob, ClientError> {
        let waited = self.child.wait_with_output().await;
        lock_groups(&self.groups).remove(&self.id);
        let output = waited.map_err(|e| ClientError::Io {
            job_id: self.id.clone(),
            source: e,
        })?;

        if !output.status.success() {
            return Err(ClientError::JobFailed {
                job_id: self.id,
                exit_code: output.status.code(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stats = parse_stats(&stdout).unwrap_or_else(|| {
            tracing::warn!(job_id = %self.id, "job reported no usage metrics");
            JobStats::default()
        });
        tracing::info!(
            job_id = %self.id,
            slot_millis = stats.slot_millis,
            total_bytes_processed = stats.total_bytes_processed,
            "job completed"
        );
        Ok(CompletedJob::new(self.id, stats))
    }
}

/// Find the last stdout line that is a JSON object of usage metrics.
fn parse_stats(stdout: &str) -> Option<JobStats> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str::<JobStats>(line).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sh(id: &str, script: &str) -> JobSpec {
        JobSpec {
            id: id.to_string(),
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        }
    }

    #[test]
    fn test_parse_stats_takes_last_json_line() {
        let out = "starting\n{\"slot_millis\": 1}\nprogress\n{\"slot_millis\": 5, \"total_bytes_processed\": 9}\ndone\n";
        assert_eq!(
            parse_stats(out),
            Some(JobStats {
                slot_millis: 5,
                total_bytes_processed: 9
            })
        );
    }

    #[test]
    fn test_parse_stats_skips_malformed_json() {
        let out = "{\"slot_millis\": 3}\n{not json\n";
        assert_eq!(parse_stats(out).map(|s| s.slot_millis), Some(3));
    }

    #[test]
    fn test_parse_stats_none_without_json() {
        assert_eq!(parse_stats("plain output\n"), None);
        assert_eq!(parse_stats(""), None);
    }

    #[tokio::test]
    async fn test_submit_and_wait_reads_usage() {
        let client = ProcessClient::new();
        let job = client
            .submit(&sh(
                "job-A",
                r#"echo '{"slot_millis": 500, "total_bytes_processed": 2048}'"#,
            ))
            .unwrap();
        assert_eq!(job.id(), "job-A");

        let done = job.wait().await.unwrap();
        assert_eq!(done.id, "job-A");
        assert_eq!(done.stats.slot_millis, 500);
        assert_eq!(done.stats.total_bytes_processed, 2048);
    }

    #[tokio::test]
    async fn test_wait_without_metrics_reports_zero() {
        let client = ProcessClient::new();
        let job = client.submit(&sh("quiet", "echo hello")).unwrap();
        let done = job.wait().await.unwrap();
        assert_eq!(done.stats, JobStats::default());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_job_failed() {
        let client = ProcessClient::new();
        let job = client.submit(&sh("bad", "exit 42")).unwrap();
        let err = job.wait().await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::JobFailed {
                exit_code: Some(42),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let client = ProcessClient::new();
        let spec = JobSpec {
            id: "missing".to_string(),
            command: "nonexistent-binary-xyz".to_string(),
            args: vec![],
        };
        let err = client.submit(&spec).err().unwrap();
        assert!(matches!(err, ClientError::Spawn { .. }));
    }

    #[test]
    fn test_cancel_unknown_job() {
        let client = ProcessClient::new();
        let err = client.cancel_job("nope").unwrap_err();
        assert!(matches!(err, ClientError::UnknownJob { .. }));
    }

    #[tokio::test]
    async fn test_cancel_terminates_process_group() {
        let client = ProcessClient::new();
        let job = client.submit(&sh("long", "sleep 30")).unwrap();

        client.cancel_job("long").unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), job.wait())
            .await
            .expect("job still running after cancel");
        assert!(matches!(
            result,
            Err(ClientError::JobFailed {
                exit_code: None,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_cancel_after_exit_is_unknown_job() {
        let client = ProcessClient::new();
        let job = client.submit(&sh("short", "true")).unwrap();
        assert_eq!(client.running_jobs(), 1);
        job.wait().await.unwrap();
        assert_eq!(client.running_jobs(), 0);

        let err = client.cancel_job("short").unwrap_err();
        assert!(matches!(err, ClientError::UnknownJob { .. }));
    }

    #[tokio::test]
    async fn test_failed_job_is_forgotten() {
        let client = ProcessClient::new();
        let job = client.submit(&sh("bad", "exit 1")).unwrap();
        assert!(job.wait().await.is_err());
        assert!(matches!(
            client.cancel_job("bad"),
            Err(ClientError::UnknownJob { .. })
        ));
    }
}
