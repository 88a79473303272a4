//! Job completion tracking and shutdown coordination for a single run.
//!
//! The coordinator accumulates usage totals as jobs finish and owns a
//! background watcher task. The watcher exits quietly once the run is
//! reported finished, or runs a cancellation sweep over every registered
//! job once termination is requested. Whichever of the two transitions
//! takes the state lock first decides the outcome; the phase is never reset.
use crate::client::ExecutionClient;
use crate::job::Job;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Fallback interval at which the watcher re-checks the run phase.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Lifecycle of a run as seen by the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Running,
    /// A completion report arrived before termination.
    Finished,
    /// Termination was requested before any completion report.
    Cancelling,
}

/// Result of a cancellation sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CancelReport {
    /// Jobs the client accepted a cancellation for, in registration order.
    pub cancelled: Vec<String>,
    /// Jobs whose cancellation call returned an error.
    pub failed: Vec<String>,
}

/// How the watcher loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    Finished,
    Cancelled(CancelReport),
}

struct RunState {
    client: Option<Arc<dyn ExecutionClient>>,
    jobs: Vec<String>,
    phase: RunPhase,
    /// Jobs cancelled at registration because the run was already cancelling.
    late_cancelled: usize,
}

struct Shared {
    state: Mutex<RunState>,
    sum_slot_millis: AtomicU64,
    sum_total_bytes_processed: AtomicU64,
    wake: Notify,
    poll_interval: Duration,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, RunState> {
        // Critical sections never leave RunState half-updated.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn phase(&self) -> RunPhase {
        self.state().phase
    }

    /// Move out of `Running`. Returns false if another transition won.
    fn transition(&self, to: RunPhase) -> bool {
        let mut state = self.state();
        if state.phase != RunPhase::Running {
            return false;
        }
        state.phase = to;
        drop(state);
        self.wake.notify_one();
        true
    }

    /// Cancel every registered job through the stored client.
    ///
    /// A failed cancellation is logged and the sweep moves on to the next job.
    fn cancel_registered(&self) -> CancelReport {
        let (client, jobs) = {
            let state = self.state();
            (state.client.clone(), state.jobs.clone())
        };

        let mut report = CancelReport::default();
        let Some(client) = client else {
            debug!("no execution client registered, nothing to cancel");
            return report;
        };

        for job_id in jobs {
            match client.cancel_job(&job_id) {
                Ok(()) => {
                    info!("{job_id} successfully cancelled");
                    report.cancelled.push(job_id);
                }
                Err(e) => {
                    error!(job_id = %job_id, error = %e, "failed to cancel job");
                    report.failed.push(job_id);
                }
            }
        }

        // Late registrations cancel under the state lock; wait out any in flight.
        drop(self.state());
        report
    }
}

enum WatcherSlot {
    Running(JoinHandle<Option<WatchOutcome>>),
    Settled(Option<WatchOutcome>),
}

/// Tracks one run's jobs and usage totals, and cancels outstanding jobs on
/// termination.
pub struct JobCoordinator {
    shared: Arc<Shared>,
    watcher: tokio::sync::Mutex<WatcherSlot>,
}

impl JobCoordinator {
    /// Create a coordinator and spawn its watcher on the current tokio runtime.
    ///
    /// `poll_interval` is a fallback; phase changes wake the watcher directly.
    pub fn start(poll_interval: Duration) -> Arc<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(RunState {
                client: None,
                jobs: Vec::new(),
                phase: RunPhase::Running,
                late_cancelled: 0,
            }),
            sum_slot_millis: AtomicU64::new(0),
            sum_total_bytes_processed: AtomicU64::new(0),
            wake: Notify::new(),
            poll_interval,
        });
        let handle = tokio::spawn(watch(Arc::clone(&shared)));
        Arc::new(Self {
            shared,
            watcher: tokio::sync::Mutex::new(WatcherSlot::Running(handle)),
        })
    }

    /// Record that `job_id` was submitted through `client`.
    ///
    /// The most recently supplied client is the one used for cancellation.
    /// Returns false if the run is already cancelling: the job is then
    /// cancelled right away through `client` and the caller must stop
    /// submitting.
    pub fn register_job(&self, client: Arc<dyn ExecutionClient>, job_id: &str) -> bool {
        let mut state = self.shared.state();
        if state.phase == RunPhase::Cancelling {
            // Held across the call so the sweep cannot report before this job is handled.
            match client.cancel_job(job_id) {
                Ok(()) => info!("{job_id} successfully cancelled"),
                Err(e) => error!(job_id, error = %e, "failed to cancel job"),
            }
            state.late_cancelled += 1;
            return false;
        }
        if let Some(existing) = &state.client {
            if !same_client(existing, &client) {
                warn!(job_id, "job registered with a different execution client, replacing");
            }
        }
        if state.phase == RunPhase::Finished {
            warn!(job_id, "job registered after the run finished");
        }
        state.client = Some(client);
        state.jobs.push(job_id.to_string());
        debug!(job_id, registered = state.jobs.len(), "job registered");
        true
    }

    /// Add a finished job's usage to the totals and mark the run done.
    ///
    /// The caller must only pass jobs that actually finished. Registration
    /// is not checked.
    pub fn report_job_finished<J: Job + ?Sized>(&self, job: &J) {
        saturating_add(&self.shared.sum_slot_millis, job.slot_millis());
        saturating_add(
            &self.shared.sum_total_bytes_processed,
            job.total_bytes_processed(),
        );
        debug!(
            job_id = job.job_id(),
            slot_millis = job.slot_millis(),
            total_bytes_processed = job.total_bytes_processed(),
            "job finished"
        );
        if self.shared.transition(RunPhase::Finished) {
            debug!("run marked finished");
        }
    }

    pub fn sum_slot_millis(&self) -> u64 {
        self.shared.sum_slot_millis.load(Ordering::SeqCst)
    }

    pub fn sum_total_bytes_processed(&self) -> u64 {
        self.shared.sum_total_bytes_processed.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> RunPhase {
        self.shared.phase()
    }

    #[allow(dead_code)]
    pub fn is_done(&self) -> bool {
        self.phase() == RunPhase::Finished
    }

    pub fn is_cancelling(&self) -> bool {
        self.phase() == RunPhase::Cancelling
    }

    /// Identifiers of all registered jobs, in registration order.
    #[allow(dead_code)]
    pub fn registered_jobs(&self) -> Vec<String> {
        self.shared.state().jobs.clone()
    }

    /// Number of jobs turned away (and cancelled) at registration.
    #[allow(dead_code)]
    pub fn late_cancelled(&self) -> usize {
        self.shared.state().late_cancelled
    }

    /// Flag the run for cancellation. Returns false if it already finished
    /// or is already cancelling.
    pub fn request_cancel(&self) -> bool {
        let accepted = self.shared.transition(RunPhase::Cancelling);
        if !accepted {
            info!(phase = ?self.phase(), "cancellation not needed");
        }
        accepted
    }

    /// Request cancellation and wait until the watcher has settled.
    ///
    /// Concurrent and repeated callers all wait for the same sweep and get
    /// the same outcome. `None` means the watcher task itself failed.
    pub async fn terminate(&self) -> Option<WatchOutcome> {
        self.request_cancel();
        let mut slot = self.watcher.lock().await;
        if let WatcherSlot::Running(handle) = &mut *slot {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "watcher task failed");
                    None
                }
            };
            *slot = WatcherSlot::Settled(outcome);
        }
        match &*slot {
            WatcherSlot::Settled(outcome) => outcome.clone(),
            WatcherSlot::Running(_) => None,
        }
    }
}

/// Totals stick at `u64::MAX` instead of wrapping.
fn saturating_add(total: &AtomicU64, amount: u64) {
    let _ = total.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
        Some(current.saturating_add(amount))
    });
}

fn same_client(a: &Arc<dyn ExecutionClient>, b: &Arc<dyn ExecutionClient>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

async fn watch(shared: Arc<Shared>) -> Option<WatchOutcome> {
    loop {
        match shared.phase() {
            RunPhase::Cancelling => break,
            RunPhase::Finished => {
                debug!("run finished, watcher exiting");
                return Some(WatchOutcome::Finished);
            }
            RunPhase::Running => {
                tokio::select! {
                    _ = shared.wake.notified() => {}
                    _ = tokio::time::sleep(shared.poll_interval) => {}
                }
            }
        }
    }

    info!("termination requested, cancelling registered jobs");
    let sweep = Arc::clone(&shared);
    match tokio::task::spawn_blocking(move || sweep.cancel_registered()).await {
        Ok(report) => Some(WatchOutcome::Cancelled(report)),
        Err(e) => {
            error!(error = %e, "cancellation sweep aborted");
            None
        }
    }
}
