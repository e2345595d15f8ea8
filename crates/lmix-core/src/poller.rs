//! Fixed-interval job status polling.
//!
//! A poll task queries `/status/{id}` every interval until the job reaches a
//! terminal status or its [`PollHandle`] is cancelled. Each response is turned
//! into a [`PollUpdate`] by a [`PollTracker`] and sent to whoever owns the view.
//! Transport and parse failures are logged and the next tick simply tries again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval_at, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::JobBackend;
use crate::config::ClientConfig;
use crate::estimator::{backend_progress_message, estimate};
use crate::job::{JobId, JobStatus, StatusSnapshot};
use crate::renderer::MAX_ACTIVE_PERCENT;
use crate::selection::ProcessingMode;

/// At or above this percentage the job is too far along to cancel.
pub const CANCEL_DISABLE_THRESHOLD: f64 = 90.0;

const FAILED_FALLBACK: &str = "Processing failed";

/// Shortest interval a poll task will tick at.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    /// Pause between showing 100% and announcing completion.
    pub completion_delay: Duration,
}

impl PollSettings {
    pub fn new(interval: Duration, completion_delay: Duration) -> Self {
        Self {
            interval: interval.max(MIN_POLL_INTERVAL),
            completion_delay,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.poll_interval(), config.completion_delay())
    }
}

/// Progress derived from one status response.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressReport {
    pub status: JobStatus,
    pub percent: f64,
    pub message: String,
    pub cancel_allowed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    Progress(ProgressReport),
    Completed(StatusSnapshot),
    Failed(String),
    Cancelled,
}

impl PollEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollEvent::Progress(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollUpdate {
    pub job_id: JobId,
    pub event: PollEvent,
}

/// Result of feeding one snapshot to a [`PollTracker`].
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub report: ProgressReport,
    /// Set when the snapshot carried a terminal status.
    pub outcome: Option<PollEvent>,
}

/// Per-job bookkeeping between ticks: which status was last seen and since when.
#[derive(Debug, Clone)]
pub struct PollTracker {
    mode: ProcessingMode,
    last_status: Option<JobStatus>,
    status_since: Instant,
    cancel_allowed: bool,
}

impl PollTracker {
    pub fn new(mode: ProcessingMode, now: Instant) -> Self {
        Self {
            mode,
            last_status: None,
            status_since: now,
            cancel_allowed: true,
        }
    }

    pub fn cancel_allowed(&self) -> bool {
        self.cancel_allowed
    }

    pub fn observe(&mut self, snapshot: &StatusSnapshot, now: Instant) -> Observation {
        let status = snapshot.status;
        if self.last_status != Some(status) {
            self.last_status = Some(status);
            self.status_since = now;
        }

        let (percent, message) = match snapshot.authoritative_progress() {
            Some(progress) => (progress, backend_progress_message(status, progress, self.mode)),
            None => {
                let elapsed = now.saturating_duration_since(self.status_since);
                let estimate = estimate(status, 0.0, elapsed.as_secs_f64(), self.mode);
                (estimate.percent, estimate.message)
            }
        };

        let percent = if status == JobStatus::Completed {
            100.0
        } else {
            percent.min(MAX_ACTIVE_PERCENT)
        };

        if percent >= CANCEL_DISABLE_THRESHOLD {
            self.cancel_allowed = false;
        }

        let outcome = match status {
            JobStatus::Completed => Some(PollEvent::Completed(snapshot.clone())),
            JobStatus::Failed => Some(PollEvent::Failed(
                snapshot
                    .error
                    .clone()
                    .filter(|reason| !reason.trim().is_empty())
                    .unwrap_or_else(|| FAILED_FALLBACK.to_string()),
            )),
            JobStatus::Cancelled => Some(PollEvent::Cancelled),
            _ => None,
        };

        Observation {
            report: ProgressReport {
                status,
                percent,
                message: message.to_string(),
                cancel_allowed: self.cancel_allowed,
            },
            outcome,
        }
    }
}

/// Cancellable handle to one running poll task.
///
/// Dropping the handle stops the poll.
#[derive(Debug)]
pub struct PollHandle {
    job_id: JobId,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Stop scheduling further requests. A request already in flight is left to
    /// finish and its response is discarded.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled() && !self.task.is_finished()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Start polling `job_id` on the current tokio runtime.
pub fn spawn_poll<B>(
    backend: Arc<B>,
    job_id: JobId,
    mode: ProcessingMode,
    settings: PollSettings,
    updates: UnboundedSender<PollUpdate>,
) -> PollHandle
where
    B: JobBackend + ?Sized + 'static,
{
    let token = CancellationToken::new();
    let task = tokio::spawn(run_poll(
        backend,
        job_id.clone(),
        mode,
        settings,
        updates,
        token.clone(),
    ));
    PollHandle {
        job_id,
        token,
        task,
    }
}

async fn run_poll<B>(
    backend: Arc<B>,
    job_id: JobId,
    mode: ProcessingMode,
    settings: PollSettings,
    updates: UnboundedSender<PollUpdate>,
    token: CancellationToken,
) where
    B: JobBackend + ?Sized + 'static,
{
    info!(job_id = %job_id, interval_ms = settings.interval.as_millis() as u64, "Status polling started");

    // Fields are public, so a zero interval can still arrive here.
    let period = settings.interval.max(MIN_POLL_INTERVAL);
    let mut tracker = PollTracker::new(mode, Instant::now());
    let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(job_id = %job_id, "Status polling cancelled");
                return;
            }
            _ = ticker.tick() => {}
        }

        let result = backend.status(&job_id).await;
        if token.is_cancelled() {
            debug!(job_id = %job_id, "Discarding status response for cancelled poll");
            return;
        }

        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(job_id = %job_id, error = %err, "Status poll failed; retrying on next tick");
                continue;
            }
        };

        let observation = tracker.observe(&snapshot, Instant::now());
        let progress = PollUpdate {
            job_id: job_id.clone(),
            event: PollEvent::Progress(observation.report),
        };
        if updates.send(progress).is_err() {
            debug!(job_id = %job_id, "Update receiver dropped; stopping poll");
            return;
        }

        let Some(outcome) = observation.outcome else {
            continue;
        };

        if matches!(outcome, PollEvent::Completed(_)) {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = sleep(settings.completion_delay) => {}
            }
        }

        info!(job_id = %job_id, status = %snapshot.status, "Status polling finished");
        token.cancel();
        let _ = updates.send(PollUpdate {
            job_id,
            event: outcome,
        });
        return;
    }
}

/// At most one active poll per job id.
pub struct PollRegistry<B: JobBackend + ?Sized + 'static> {
    backend: Arc<B>,
    settings: PollSettings,
    updates: UnboundedSender<PollUpdate>,
    handles: HashMap<JobId, PollHandle>,
}

impl<B: JobBackend + ?Sized + 'static> PollRegistry<B> {
    pub fn new(backend: Arc<B>, settings: PollSettings, updates: UnboundedSender<PollUpdate>) -> Self {
        Self {
            backend,
            settings,
            updates,
            handles: HashMap::new(),
        }
    }

    /// Start polling `job_id`; a no-op returning `false` if it is already polled.
    pub fn start(&mut self, job_id: JobId, mode: ProcessingMode) -> bool {
        if self
            .handles
            .get(&job_id)
            .is_some_and(PollHandle::is_active)
        {
            debug!(job_id = %job_id, "Poll already active");
            return false;
        }

        let handle = spawn_poll(
            self.backend.clone(),
            job_id.clone(),
            mode,
            self.settings,
            self.updates.clone(),
        );
        self.handles.insert(job_id, handle);
        true
    }

    pub fn stop(&mut self, job_id: &JobId) -> bool {
        match self.handles.remove(job_id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.cancel();
        }
    }

    pub fn is_polling(&self, job_id: &JobId) -> bool {
        self.handles.get(job_id).is_some_and(PollHandle::is_active)
    }

    pub fn active_count(&self) -> usize {
        self.handles.values().filter(|handle| handle.is_active()).count()
    }

    /// Forget handles whose task already ended.
    pub fn prune(&mut self) {
        self.handles.retain(|_, handle| handle.is_active());
    }
}

impl<B: JobBackend + ?Sized + 'static> Drop for PollRegistry<B> {
    fn drop(&mut self) {
        self.stop_all();
    }
}
