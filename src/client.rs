/// Execution-service client contract used for cancellation.
use std::fmt;

/// The external service jobs are submitted to.
///
/// Implementations must tolerate one `cancel_job` call per registered job,
/// issued from a blocking thread.
pub trait ExecutionClient: Send + Sync {
    /// Ask the service to abort the job with the given identifier.
    fn cancel_job(&self, job_id: &str) -> Result<(), ClientError>;
}

/// Errors surfaced by an execution client.
#[derive(Debug)]
pub enum ClientError {
    /// No job with this identifier was submitted through the client.
    UnknownJob { job_id: String },
    /// Failed to start the job.
    Spawn {
        job_id: String,
        source: std::io::Error,
    },
    /// I/O failure while waiting on a running job.
    Io {
        job_id: String,
        source: std::io::Error,
    },
    /// The job exited unsuccessfully.
    JobFailed {
        job_id: String,
        exit_code: Option<i32>,
    },
    /// Delivering the cancellation signal failed.
    Signal {
        job_id: String,
        source: nix::errno::Errno,
    },
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::UnknownJob { job_id } => write!(f, "unknown job {}", job_id),
            ClientError::Spawn { job_id, source } => {
                write!(f, "failed to start job {}: {}", job_id, source)
            }
            ClientError::Io { job_id, source } => {
                write!(f, "I/O error while running job {}: {}", job_id, source)
            }
            ClientError::JobFailed { job_id, exit_code } => match exit_code {
                Some(code) => write!(f, "job {} exited with status {}", job_id, code),
                None => write!(f, "job {} was killed by a signal", job_id),
            },
            ClientError::Signal { job_id, source } => {
                write!(f, "failed to cancel job {}: {}", job_id, source)
            }
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Spawn { source, .. } => Some(source),
            ClientError::Io { source, .. } => Some(source),
            ClientError::Signal { source, .. } => Some(source),
            ClientError::UnknownJob { .. } | ClientError::JobFailed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_job_failed_with_code() {
        let err = ClientError::JobFailed {
            job_id: "job-A".to_string(),
            exit_code: Some(3),
        };
        assert_eq!(err.to_string(), "job job-A exited with status 3");
    }

    #[test]
    fn test_display_job_killed() {
        let err = ClientError::JobFailed {
            job_id: "job-A".to_string(),
            exit_code: None,
        };
        assert_eq!(err.to_string(), "job job-A was killed by a signal");
    }

    #[test]
    fn test_signal_error_has_source() {
        use std::error::Error;
        let err = ClientError::Signal {
            job_id: "job-A".to_string(),
            source: nix::errno::Errno::ESRCH,
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("failed to cancel job job-A"));
    }
}
