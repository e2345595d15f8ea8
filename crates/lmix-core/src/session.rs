//! One upload, from file selection to a terminal view.
//!
//! [`UploadSession`] owns every piece of per-upload state and can be reset in
//! one call. [`SessionController`] is the single task that mutates it: it runs
//! the upload, feeds poll updates and animation frames through the view state
//! machine, and hands every resulting view model to a [`ViewRenderer`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::JobBackend;
use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::job::{JobId, JobStatus};
use crate::poller::{PollEvent, PollHandle, PollSettings, PollUpdate, spawn_poll};
use crate::renderer::{ProgressDriver, RenderMode};
use crate::selection::{
    ProcessingMode, SelectionSlot, UploadOptions, UploadSelection, ValidationError,
};
use crate::upload::{UploadClient, UploadError, UploadEvent, UploadEventCallback};
use crate::view::{InvalidTransition, ViewEvent, ViewRenderer, ViewState};

/// Progress shown as soon as the backend has accepted the upload.
const CONFIRMED_PERCENT: f64 = 5.0;

const MIN_FRAME_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnInterrupt {
    Cancel,
    Detach,
}

#[derive(Debug)]
pub struct UploadSession {
    selection: SelectionSlot,
    initial_options: UploadOptions,
    options: UploadOptions,
    job_id: Option<JobId>,
    poll: Option<PollHandle>,
    driver: ProgressDriver,
    view: ViewState,
}

impl UploadSession {
    pub fn new(options: UploadOptions, render_mode: RenderMode) -> Self {
        Self {
            selection: SelectionSlot::default(),
            initial_options: options.clone(),
            options,
            job_id: None,
            poll: None,
            driver: ProgressDriver::new(render_mode),
            view: ViewState::Selecting,
        }
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: UploadOptions) {
        self.options = options;
    }

    pub fn selection(&self) -> Option<&UploadSelection> {
        self.selection.current()
    }

    /// Replace the current selection, returning the previous one.
    pub fn select(&mut self, selection: UploadSelection) -> Option<UploadSelection> {
        self.selection.select(selection)
    }

    pub fn clear_selection(&mut self) -> Option<UploadSelection> {
        self.selection.clear()
    }

    pub fn job_id(&self) -> Option<&JobId> {
        self.job_id.as_ref()
    }

    pub fn driver(&self) -> &ProgressDriver {
        &self.driver
    }

    pub fn is_polling(&self) -> bool {
        self.poll.as_ref().is_some_and(PollHandle::is_active)
    }

    /// Run `event` through the state machine. Entering a terminal state stops polling.
    pub fn apply(&mut self, event: ViewEvent) -> Result<&ViewState, InvalidTransition> {
        let next = self.view.apply(event)?;
        if next.is_terminal() {
            self.stop_polling();
        }
        self.view = next;
        Ok(&self.view)
    }

    pub fn stop_polling(&mut self) {
        if let Some(handle) = self.poll.take() {
            handle.cancel();
        }
    }

    /// Back to a blank selecting state, as if the page had been reloaded.
    pub fn reset(&mut self) {
        self.stop_polling();
        self.selection.clear();
        self.options = self.initial_options.clone();
        self.job_id = None;
        self.driver.reset();
        self.view = ViewState::Selecting;
    }
}

pub struct SessionController<B, R>
where
    B: JobBackend + ?Sized + 'static,
    R: ViewRenderer,
{
    session: UploadSession,
    uploader: UploadClient,
    backend: Arc<B>,
    settings: PollSettings,
    frame_interval: Duration,
    renderer: R,
    updates_tx: UnboundedSender<PollUpdate>,
    updates_rx: UnboundedReceiver<PollUpdate>,
}

impl<B, R> SessionController<B, R>
where
    B: JobBackend + ?Sized + 'static,
    R: ViewRenderer,
{
    pub fn new(backend: Arc<B>, uploader: UploadClient, config: &ClientConfig, renderer: R) -> Self {
        let options = UploadOptions {
            preset: config.upload.default_preset,
            mode: config.upload.default_mode,
            custom_target: None,
        };
        let (updates_tx, updates_rx) = unbounded_channel();
        Self {
            session: UploadSession::new(options, config.ui.render_mode),
            uploader,
            backend,
            settings: PollSettings::from_config(config),
            frame_interval: config.frame_interval(),
            renderer,
            updates_tx,
            updates_rx,
        }
    }

    pub fn session(&self) -> &UploadSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut UploadSession {
        &mut self.session
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn view(&self) -> &ViewState {
        &self.session.view
    }

    pub fn is_polling(&self) -> bool {
        self.session.is_polling()
    }

    /// Validate `path` for the current account and make it the active selection.
    pub fn select_file(&mut self, path: impl AsRef<Path>) -> Result<(), ValidationError> {
        let selection = UploadSelection::from_path(path, self.uploader.tier())?;
        info!(file = %selection.file_name, size = %selection.size_label(), "File selected");
        self.session.select(selection);
        self.render();
        Ok(())
    }

    /// Upload the selected file and start polling the resulting job.
    ///
    /// Pre-flight failures leave the view in `Selecting`; failures after the
    /// upload started move it to `Error`.
    pub async fn submit(&mut self) -> Result<JobId, UploadError> {
        let selection = self.session.selection.require()?.clone();
        let options = self.session.options.clone();
        options.resolve_target(self.uploader.tier())?;

        if !self.dispatch(ViewEvent::UploadStarted) {
            return Err(UploadError::NotReady);
        }
        self.session.driver.reset();

        let (tx, mut rx) = unbounded_channel();
        let callback: UploadEventCallback = Arc::new(move |event| {
            let _ = tx.send(event);
        });
        let uploader = self.uploader.clone();
        let upload_options = options.clone();
        let upload =
            async move { uploader.upload(&selection, &upload_options, Some(callback)).await };
        tokio::pin!(upload);

        let result = loop {
            tokio::select! {
                result = &mut upload => break result,
                Some(event) = rx.recv() => self.on_upload_event(event),
            }
        };
        while let Ok(event) = rx.try_recv() {
            self.on_upload_event(event);
        }

        match result {
            Ok(job_id) => {
                self.dispatch(ViewEvent::UploadConfirmed {
                    job_id: job_id.clone(),
                    preset: options.preset,
                    mode: options.mode,
                });
                self.session.driver.set_target(CONFIRMED_PERCENT);
                self.push_frame();
                self.start_polling(job_id.clone(), options.mode);
                Ok(job_id)
            }
            Err(err) => {
                warn!(error = %err, "Upload failed");
                self.dispatch(ViewEvent::UploadFailed {
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Attach to a job that is already on the server and poll it.
    pub fn resume(&mut self, job_id: JobId, mode: ProcessingMode) -> Result<(), InvalidTransition> {
        self.session.apply(ViewEvent::Resumed {
            job_id: job_id.clone(),
            mode,
        })?;
        self.render();
        self.start_polling(job_id, mode);
        Ok(())
    }

    fn start_polling(&mut self, job_id: JobId, mode: ProcessingMode) {
        self.session.stop_polling();
        let handle = spawn_poll(
            self.backend.clone(),
            job_id.clone(),
            mode,
            self.settings,
            self.updates_tx.clone(),
        );
        self.session.poll = Some(handle);
        self.session.job_id = Some(job_id);
    }

    /// Drive the processing view until it reaches a terminal state.
    ///
    /// Triggering `interrupt` issues a single cancel request. When the job can no
    /// longer be cancelled, or the server refuses, the controller detaches instead:
    /// polling stops, the job keeps running server-side and the view stays in
    /// `Processing`.
    pub async fn run(&mut self, interrupt: &CancellationToken) -> &ViewState {
        self.drive(interrupt, OnInterrupt::Cancel).await
    }

    /// Like [`run`](Self::run), but an interrupt only detaches and never cancels the job.
    pub async fn watch(&mut self, interrupt: &CancellationToken) -> &ViewState {
        self.drive(interrupt, OnInterrupt::Detach).await
    }

    async fn drive(
        &mut self,
        interrupt: &CancellationToken,
        on_interrupt: OnInterrupt,
    ) -> &ViewState {
        let mut frames = interval(self.frame_interval.max(MIN_FRAME_INTERVAL));
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let eased = self.session.driver.mode() == RenderMode::Eased;
        let mut detached = false;

        while !detached && matches!(self.session.view, ViewState::Processing { .. }) {
            tokio::select! {
                Some(update) = self.updates_rx.recv() => self.apply_poll_update(update),
                _ = frames.tick(), if eased => self.step_frame(),
                _ = interrupt.cancelled() => {
                    let cancelled = on_interrupt == OnInterrupt::Cancel && self.cancel().await;
                    if !cancelled {
                        self.detach();
                        detached = true;
                    }
                }
            }
        }

        if self.session.view.is_terminal() {
            self.renderer.finish(&self.session.view.view_model());
        }
        &self.session.view
    }

    /// Stop following the current job without touching it on the server.
    pub fn detach(&mut self) {
        if let Some(job_id) = self.session.job_id.as_ref() {
            info!(job_id = %job_id, "Detached from job");
        }
        self.session.stop_polling();
    }

    /// Feed one poll update through the state machine.
    ///
    /// Updates for other jobs, or arriving after the view left `Processing`, are dropped.
    pub fn apply_poll_update(&mut self, update: PollUpdate) {
        if self.session.job_id.as_ref() != Some(&update.job_id) {
            debug!(job_id = %update.job_id, "Ignoring update for a different job");
            return;
        }
        if !matches!(self.session.view, ViewState::Processing { .. }) {
            debug!(job_id = %update.job_id, state = self.session.view.name(), "Ignoring stale poll update");
            return;
        }

        match update.event {
            PollEvent::Progress(report) => {
                if report.status == JobStatus::Completed {
                    self.session.driver.complete();
                } else {
                    self.session.driver.set_target(report.percent);
                }
                self.dispatch(ViewEvent::ProgressMessage {
                    message: report.message,
                    cancel_allowed: report.cancel_allowed,
                });
                if self.session.driver.mode() == RenderMode::Direct {
                    self.push_frame();
                }
            }
            PollEvent::Completed(snapshot) => {
                self.session.driver.complete();
                self.dispatch(ViewEvent::Frame { percent: 100.0 });
                self.dispatch(ViewEvent::ProcessingCompleted {
                    metadata: snapshot.metadata(),
                });
            }
            PollEvent::Failed(message) => {
                self.dispatch(ViewEvent::ProcessingFailed { message });
            }
            PollEvent::Cancelled => {
                self.dispatch(ViewEvent::ProcessingCancelled);
            }
        }
    }

    /// Ask the backend to cancel the current job. Returns `true` once cancelled.
    pub async fn cancel(&mut self) -> bool {
        let Some(job_id) = self.session.job_id.clone() else {
            return false;
        };
        if !self.session.view.cancel_enabled() {
            debug!(job_id = %job_id, "Cancel not available");
            return false;
        }

        self.dispatch(ViewEvent::CancelRequested);
        match self.backend.cancel(&job_id).await {
            Ok(JobStatus::Cancelled) => {
                self.session.stop_polling();
                self.dispatch(ViewEvent::ProcessingCancelled);
                true
            }
            Ok(status) => {
                warn!(job_id = %job_id, status = %status, "Cancel not acknowledged");
                self.dispatch(ViewEvent::CancelRejected {
                    message: format!("Failed to cancel: unexpected status '{status}'"),
                });
                false
            }
            Err(err) => {
                warn!(job_id = %job_id, error = %err, "Cancel request failed");
                let message = match err {
                    ApiError::Server(reason) => format!("Failed to cancel: {reason}"),
                    _ => "Failed to cancel processing".to_string(),
                };
                self.dispatch(ViewEvent::CancelRejected { message });
                false
            }
        }
    }

    /// Leave a terminal view and reset everything for the next upload.
    pub fn start_over(&mut self) -> Result<(), InvalidTransition> {
        self.session.apply(ViewEvent::StartOver)?;
        self.session.reset();
        self.render();
        Ok(())
    }

    fn on_upload_event(&mut self, event: UploadEvent) {
        match event {
            UploadEvent::Transfer { percent } => {
                self.dispatch(ViewEvent::UploadProgress { percent });
            }
            other => debug!(event = ?other, "Upload step"),
        }
    }

    fn step_frame(&mut self) {
        let before = self.session.driver.current();
        self.session.driver.step();
        if self.session.driver.current() != before {
            self.push_frame();
        }
    }

    fn push_frame(&mut self) {
        let percent = self.session.driver.current();
        self.dispatch(ViewEvent::Frame { percent });
    }

    fn dispatch(&mut self, event: ViewEvent) -> bool {
        match self.session.apply(event) {
            Ok(_) => {
                self.render();
                true
            }
            Err(err) => {
                debug!(error = %err, "Ignoring view event");
                false
            }
        }
    }

    fn render(&mut self) {
        let model = self.session.view.view_model();
        self.renderer.render(&model);
    }
}
