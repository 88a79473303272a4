/// Job contract and usage metrics reported by the execution service.
use serde::{Deserialize, Serialize};

/// A unit of work submitted to the execution service.
///
/// `slot_millis` and `total_bytes_processed` are only meaningful once the
/// job has finished.
pub trait Job {
    fn job_id(&self) -> &str;
    fn slot_millis(&self) -> u64;
    fn total_bytes_processed(&self) -> u64;
}

/// Resource usage emitted by a finished job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobStats {
    pub slot_millis: u64,
    pub total_bytes_processed: u64,
}

/// A job that has run to completion, with its usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedJob {
    pub id: String,
    pub stats: JobStats,
}

impl CompletedJob {
    pub fn new(id: impl Into<String>, stats: JobStats) -> Self {
        Self {
            id: id.into(),
            stats,
        }
    }
}

impl Job for CompletedJob {
    fn job_id(&self) -> &str {
        &self.id
    }

    fn slot_millis(&self) -> u64 {
        self.stats.slot_millis
    }

    fn total_bytes_processed(&self) -> u64 {
        self.stats.total_bytes_processed
    }
}
