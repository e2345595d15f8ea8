//! Dashboard-style tracking of several jobs at once.
//!
//! Every non-terminal row is polled independently through a shared
//! [`PollRegistry`]. Retrying a failed row flips it to `queued` immediately
//! and polls it again without touching the other rows.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tracing::{debug, info};

use crate::api::JobBackend;
use crate::error::ApiError;
use crate::job::{JobId, JobStatus, ResultMetadata, StatusSnapshot};
use crate::poller::{PollEvent, PollRegistry, PollSettings, PollUpdate};
use crate::selection::ProcessingMode;

#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub id: JobId,
    pub mode: ProcessingMode,
    pub status: JobStatus,
    pub percent: f64,
    pub message: String,
    pub error: Option<String>,
    pub metadata: ResultMetadata,
    pub updated_at: DateTime<Utc>,
}

impl JobRow {
    fn new(id: JobId, mode: ProcessingMode, snapshot: &StatusSnapshot) -> Self {
        let mut row = Self {
            id,
            mode,
            status: snapshot.status,
            percent: 0.0,
            message: String::new(),
            error: None,
            metadata: ResultMetadata::default(),
            updated_at: Utc::now(),
        };
        row.absorb_snapshot(snapshot);
        row
    }

    fn absorb_snapshot(&mut self, snapshot: &StatusSnapshot) {
        self.status = snapshot.status;
        self.error = snapshot.error.clone();
        self.metadata = snapshot.metadata();
        self.percent = match snapshot.status {
            JobStatus::Completed => 100.0,
            _ => snapshot.authoritative_progress().unwrap_or(self.percent),
        };
        self.message = snapshot.status.to_string();
        self.updated_at = Utc::now();
    }

    pub fn can_retry(&self) -> bool {
        self.status == JobStatus::Failed
    }
}

pub struct JobBoard<B: JobBackend + ?Sized + 'static> {
    backend: Arc<B>,
    registry: PollRegistry<B>,
    updates: UnboundedReceiver<PollUpdate>,
    rows: Vec<JobRow>,
    watching: HashSet<JobId>,
}

impl<B: JobBackend + ?Sized + 'static> JobBoard<B> {
    pub fn new(backend: Arc<B>, settings: PollSettings) -> Self {
        let (tx, updates) = unbounded_channel();
        Self {
            registry: PollRegistry::new(backend.clone(), settings, tx),
            backend,
            updates,
            rows: Vec::new(),
            watching: HashSet::new(),
        }
    }

    pub fn rows(&self) -> &[JobRow] {
        &self.rows
    }

    pub fn row(&self, id: &JobId) -> Option<&JobRow> {
        self.rows.iter().find(|row| &row.id == id)
    }

    fn row_mut(&mut self, id: &JobId) -> Option<&mut JobRow> {
        self.rows.iter_mut().find(|row| &row.id == id)
    }

    pub fn is_polling(&self, id: &JobId) -> bool {
        self.registry.is_polling(id)
    }

    /// Number of rows still waiting for a terminal status.
    pub fn pending(&self) -> usize {
        self.watching.len()
    }

    /// Add a job to the board, fetching its current status first.
    ///
    /// Only non-terminal jobs are polled. Tracking an id twice refreshes the row.
    pub async fn track(&mut self, id: JobId, mode: ProcessingMode) -> Result<&JobRow, ApiError> {
        let snapshot = self.backend.status(&id).await?;
        match self.rows.iter().position(|row| row.id == id) {
            Some(index) => self.rows[index].absorb_snapshot(&snapshot),
            None => self.rows.push(JobRow::new(id.clone(), mode, &snapshot)),
        }

        if !snapshot.status.is_terminal() {
            self.watch(id.clone(), mode);
        }

        self.row(&id)
            .ok_or_else(|| ApiError::message(format!("job {id} vanished from the board")))
    }

    fn watch(&mut self, id: JobId, mode: ProcessingMode) {
        self.registry.start(id.clone(), mode);
        self.watching.insert(id);
    }

    /// Retry a failed job.
    ///
    /// On success the row is shown as queued straight away and polling resumes.
    /// On failure the row is left as it was.
    pub async fn retry(&mut self, id: &JobId) -> Result<JobStatus, ApiError> {
        let Some(row) = self.row(id) else {
            return Err(ApiError::message(format!("job {id} is not on the board")));
        };
        if !row.can_retry() {
            return Err(ApiError::message(format!(
                "only failed jobs can be retried (job {id} is {})",
                row.status
            )));
        }
        let mode = row.mode;

        let status = self.backend.retry(id).await?;
        if let Some(row) = self.row_mut(id) {
            row.status = JobStatus::Queued;
            row.percent = 0.0;
            row.error = None;
            row.message = JobStatus::Queued.to_string();
            row.updated_at = Utc::now();
        }
        info!(job_id = %id, status = %status, "Job re-queued");

        self.registry.stop(id);
        self.watch(id.clone(), mode);
        Ok(status)
    }

    /// Fold one poll update into its row. Returns the row when it changed.
    pub fn apply(&mut self, update: PollUpdate) -> Option<&JobRow> {
        let PollUpdate { job_id, event } = update;
        if event.is_terminal() {
            self.watching.remove(&job_id);
        }

        let Some(row) = self.row_mut(&job_id) else {
            debug!(job_id = %job_id, "Update for untracked job");
            return None;
        };

        match event {
            PollEvent::Progress(report) => {
                // Estimates can trail an earlier backend value; never show less than before.
                row.percent = if report.status.is_terminal() {
                    report.percent
                } else {
                    row.percent.max(report.percent)
                };
                row.status = report.status;
                row.message = report.message;
            }
            PollEvent::Completed(snapshot) => {
                row.status = JobStatus::Completed;
                row.percent = 100.0;
                row.metadata = snapshot.metadata();
                row.message = JobStatus::Completed.to_string();
            }
            PollEvent::Failed(reason) => {
                row.status = JobStatus::Failed;
                row.error = Some(reason);
                row.message = JobStatus::Failed.to_string();
            }
            PollEvent::Cancelled => {
                row.status = JobStatus::Cancelled;
                row.message = JobStatus::Cancelled.to_string();
            }
        }
        row.updated_at = Utc::now();

        self.row(&job_id)
    }

    /// Wait for the next update and apply it. `None` once nothing is being polled.
    pub async fn next_change(&mut self) -> Option<&JobRow> {
        loop {
            if self.watching.is_empty() {
                return None;
            }
            let update = self.updates.recv().await?;
            let id = update.job_id.clone();
            if self.apply(update).is_some() {
                return self.row(&id);
            }
        }
    }

    /// Process updates until every tracked job is terminal, reporting each change.
    pub async fn run_until_idle<F>(&mut self, mut on_change: F)
    where
        F: FnMut(&JobRow),
    {
        while let Some(row) = self.next_change().await {
            on_change(row);
        }
        self.registry.prune();
    }

    pub fn stop(&mut self, id: &JobId) -> bool {
        self.watching.remove(id);
        self.registry.stop(id)
    }

    pub fn stop_all(&mut self) {
        self.watching.clear();
        self.registry.stop_all();
    }
}
