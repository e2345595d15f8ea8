//! Upload page view state machine.
//!
//! [`ViewState::apply`] is the only way to move between states; it never touches
//! I/O. Each state maps to a complete [`ViewModel`], which a [`ViewRenderer`]
//! draws in full on every change.

use thiserror::Error;

use crate::job::{JobId, ResultMetadata};
use crate::selection::{Preset, ProcessingMode};

const UPLOADING_TEXT: &str = "Uploading to cloud storage...";
const UPLOADED_TEXT: &str = "Upload complete, preparing for processing...";

#[derive(Debug, Clone, PartialEq, Default)]
pub enum ViewState {
    #[default]
    Selecting,
    Uploading {
        percent: u8,
        status_text: String,
    },
    Processing {
        job_id: JobId,
        preset: Option<Preset>,
        mode: ProcessingMode,
        /// Displayed progress, as driven by the progress renderer.
        percent: f64,
        message: String,
        /// Latched once the job is too far along to cancel.
        cancel_locked: bool,
        cancel_pending: bool,
        /// Transient notice, e.g. a rejected cancel request.
        notice: Option<String>,
    },
    Completed {
        job_id: JobId,
        preset: Option<Preset>,
        mode: ProcessingMode,
        metadata: ResultMetadata,
    },
    Error {
        message: String,
    },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    UploadStarted,
    UploadProgress { percent: u8 },
    UploadConfirmed {
        job_id: JobId,
        preset: Preset,
        mode: ProcessingMode,
    },
    UploadFailed { message: String },
    /// Attach to a job that was uploaded elsewhere.
    Resumed { job_id: JobId, mode: ProcessingMode },
    ProgressMessage { message: String, cancel_allowed: bool },
    Frame { percent: f64 },
    CancelRequested,
    CancelRejected { message: String },
    ProcessingCompleted { metadata: ResultMetadata },
    ProcessingFailed { message: String },
    ProcessingCancelled,
    StartOver,
}

impl ViewEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ViewEvent::UploadStarted => "upload-started",
            ViewEvent::UploadProgress { .. } => "upload-progress",
            ViewEvent::UploadConfirmed { .. } => "upload-confirmed",
            ViewEvent::UploadFailed { .. } => "upload-failed",
            ViewEvent::Resumed { .. } => "resumed",
            ViewEvent::ProgressMessage { .. } => "progress-message",
            ViewEvent::Frame { .. } => "frame",
            ViewEvent::CancelRequested => "cancel-requested",
            ViewEvent::CancelRejected { .. } => "cancel-rejected",
            ViewEvent::ProcessingCompleted { .. } => "processing-completed",
            ViewEvent::ProcessingFailed { .. } => "processing-failed",
            ViewEvent::ProcessingCancelled => "processing-cancelled",
            ViewEvent::StartOver => "start-over",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("event '{event}' is not valid in state '{state}'")]
pub struct InvalidTransition {
    pub state: &'static str,
    pub event: &'static str,
}

impl ViewState {
    pub fn name(&self) -> &'static str {
        match self {
            ViewState::Selecting => "selecting",
            ViewState::Uploading { .. } => "uploading",
            ViewState::Processing { .. } => "processing",
            ViewState::Completed { .. } => "completed",
            ViewState::Error { .. } => "error",
            ViewState::Cancelled => "cancelled",
        }
    }

    /// Completed, Error and Cancelled only leave through an explicit start-over.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ViewState::Completed { .. } | ViewState::Error { .. } | ViewState::Cancelled
        )
    }

    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            ViewState::Processing { job_id, .. } | ViewState::Completed { job_id, .. } => {
                Some(job_id)
            }
            _ => None,
        }
    }

    pub fn cancel_enabled(&self) -> bool {
        matches!(
            self,
            ViewState::Processing {
                cancel_locked: false,
                cancel_pending: false,
                ..
            }
        )
    }

    pub fn apply(&self, event: ViewEvent) -> Result<ViewState, InvalidTransition> {
        let invalid = InvalidTransition {
            state: self.name(),
            event: event.name(),
        };

        let next = match (self, event) {
            (ViewState::Selecting, ViewEvent::UploadStarted) => ViewState::Uploading {
                percent: 0,
                status_text: UPLOADING_TEXT.to_string(),
            },
            (ViewState::Selecting, ViewEvent::Resumed { job_id, mode }) => {
                processing(job_id, None, mode)
            }
            (ViewState::Uploading { .. }, ViewEvent::UploadProgress { percent }) => {
                let percent = percent.min(100);
                let status_text = if percent < 100 {
                    UPLOADING_TEXT
                } else {
                    UPLOADED_TEXT
                };
                ViewState::Uploading {
                    percent,
                    status_text: status_text.to_string(),
                }
            }
            (
                ViewState::Uploading { .. },
                ViewEvent::UploadConfirmed {
                    job_id,
                    preset,
                    mode,
                },
            ) => processing(job_id, Some(preset), mode),
            (ViewState::Uploading { .. }, ViewEvent::UploadFailed { message }) => {
                ViewState::Error { message }
            }
            (
                ViewState::Processing { .. },
                ViewEvent::ProgressMessage {
                    message,
                    cancel_allowed,
                },
            ) => {
                let mut next = self.clone();
                if let ViewState::Processing {
                    message: current,
                    cancel_locked,
                    ..
                } = &mut next
                {
                    *current = message;
                    *cancel_locked |= !cancel_allowed;
                }
                next
            }
            (ViewState::Processing { .. }, ViewEvent::Frame { percent }) => {
                let mut next = self.clone();
                if let ViewState::Processing {
                    percent: current, ..
                } = &mut next
                {
                    if percent.is_finite() && percent > *current {
                        *current = percent.min(100.0);
                    }
                }
                next
            }
            (ViewState::Processing { .. }, ViewEvent::CancelRequested) if self.cancel_enabled() => {
                let mut next = self.clone();
                if let ViewState::Processing {
                    cancel_pending,
                    notice,
                    ..
                } = &mut next
                {
                    *cancel_pending = true;
                    *notice = None;
                }
                next
            }
            (ViewState::Processing { .. }, ViewEvent::CancelRejected { message }) => {
                let mut next = self.clone();
                if let ViewState::Processing {
                    cancel_pending,
                    notice,
                    ..
                } = &mut next
                {
                    *cancel_pending = false;
                    *notice = Some(message);
                }
                next
            }
            (
                ViewState::Processing {
                    job_id,
                    preset,
                    mode,
                    ..
                },
                ViewEvent::ProcessingCompleted { metadata },
            ) => ViewState::Completed {
                job_id: job_id.clone(),
                preset: *preset,
                mode: *mode,
                metadata,
            },
            (ViewState::Processing { .. }, ViewEvent::ProcessingFailed { message }) => {
                ViewState::Error { message }
            }
            (ViewState::Processing { .. }, ViewEvent::ProcessingCancelled) => ViewState::Cancelled,
            (state, ViewEvent::StartOver) if state.is_terminal() => ViewState::Selecting,
            _ => return Err(invalid),
        };

        Ok(next)
    }

    pub fn view_model(&self) -> ViewModel {
        match self {
            ViewState::Selecting => ViewModel {
                headline: "Upload Your Audio".to_string(),
                lines: vec!["Choose a file, a loudness preset and a processing mode.".to_string()],
                progress: None,
                actions: vec![ViewAction::SelectFile],
            },
            ViewState::Uploading {
                percent,
                status_text,
            } => ViewModel {
                headline: "Uploading Your File".to_string(),
                lines: vec![
                    status_text.clone(),
                    "Large files may take a few moments to upload".to_string(),
                ],
                progress: Some(ProgressView {
                    percent: f64::from(*percent),
                    label: "Upload Progress".to_string(),
                }),
                actions: Vec::new(),
            },
            ViewState::Processing {
                job_id,
                mode,
                percent,
                message,
                cancel_pending,
                notice,
                ..
            } => {
                let mut lines = vec![message.clone(), format!("Job {job_id}")];
                if let Some(notice) = notice {
                    lines.push(notice.clone());
                }
                ViewModel {
                    headline: format!("{}...", mode.display_name()),
                    lines,
                    progress: Some(ProgressView {
                        percent: *percent,
                        label: "Processing Progress".to_string(),
                    }),
                    actions: vec![ViewAction::Cancel {
                        enabled: self.cancel_enabled(),
                        pending: *cancel_pending,
                    }],
                }
            }
            ViewState::Completed {
                job_id,
                preset,
                mode,
                metadata,
            } => {
                let target = preset
                    .map(Preset::display_name)
                    .unwrap_or("your selected preset");
                let mut lines = vec![format!("Your audio has been optimized for {target}")];
                lines.extend(metadata_lines(metadata));
                ViewModel {
                    headline: format!("{} Complete!", mode.display_name()),
                    lines,
                    progress: Some(ProgressView {
                        percent: 100.0,
                        label: "Processing complete!".to_string(),
                    }),
                    actions: vec![
                        ViewAction::Download {
                            job_id: job_id.clone(),
                        },
                        ViewAction::StartOver {
                            label: "Process Another File",
                        },
                    ],
                }
            }
            ViewState::Error { message } => ViewModel {
                headline: "Processing Failed".to_string(),
                lines: vec![message.clone()],
                progress: None,
                actions: vec![ViewAction::StartOver { label: "Try Again" }],
            },
            ViewState::Cancelled => ViewModel {
                headline: "Processing Cancelled".to_string(),
                lines: vec!["Your processing job has been cancelled.".to_string()],
                progress: None,
                actions: vec![ViewAction::StartOver {
                    label: "Upload Another File",
                }],
            },
        }
    }
}

fn processing(job_id: JobId, preset: Option<Preset>, mode: ProcessingMode) -> ViewState {
    ViewState::Processing {
        job_id,
        preset,
        mode,
        percent: 0.0,
        message: "Upload complete, queuing for processing...".to_string(),
        cancel_locked: false,
        cancel_pending: false,
        notice: None,
    }
}

/// Human-readable lines describing a finished file.
pub fn metadata_lines(metadata: &ResultMetadata) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(seconds) = metadata.duration_seconds.filter(|s| s.is_finite() && *s >= 0.0) {
        let total = seconds.round() as u64;
        lines.push(format!("Duration: {}:{:02}", total / 60, total % 60));
    }
    if let Some(format) = metadata.format.as_deref().filter(|f| !f.is_empty()) {
        lines.push(format!("Format: {}", format.to_ascii_uppercase()));
    }
    if metadata.silence_trimmed == Some(true) {
        lines.push("Silence trimmed from the start and end of the file".to_string());
    }
    lines
}

/// Everything a renderer needs to draw one state.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewModel {
    pub headline: String,
    pub lines: Vec<String>,
    pub progress: Option<ProgressView>,
    pub actions: Vec<ViewAction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressView {
    pub percent: f64,
    pub label: String,
}

impl ProgressView {
    pub fn rounded(&self) -> u8 {
        self.percent.round().clamp(0.0, 100.0) as u8
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewAction {
    SelectFile,
    Cancel { enabled: bool, pending: bool },
    Download { job_id: JobId },
    StartOver { label: &'static str },
}

impl ViewAction {
    pub fn label(&self) -> &'static str {
        match self {
            ViewAction::SelectFile => "Select File",
            ViewAction::Cancel { pending: true, .. } => "Cancelling...",
            ViewAction::Cancel { .. } => "Cancel Processing",
            ViewAction::Download { .. } => "Download Processed Audio",
            ViewAction::StartOver { label } => *label,
        }
    }
}

/// Presentation adapter. Called with the full model after every state change.
pub trait ViewRenderer {
    fn render(&mut self, model: &ViewModel);

    /// Called once the session reaches a terminal state.
    fn finish(&mut self, _model: &ViewModel) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processing_state() -> ViewState {
        ViewState::Selecting
            .apply(ViewEvent::UploadStarted)
            .and_then(|state| {
                state.apply(ViewEvent::UploadConfirmed {
                    job_id: JobId::from("job-1"),
                    preset: Preset::Podcast,
                    mode: ProcessingMode::Precise,
                })
            })
            .unwrap()
    }

    #[test]
    fn happy_path_reaches_completed() {
        let state = processing_state()
            .apply(ViewEvent::Frame { percent: 42.0 })
            .unwrap()
            .apply(ViewEvent::ProcessingCompleted {
                metadata: ResultMetadata::default(),
            })
            .unwrap();

        assert_eq!(
            state,
            ViewState::Completed {
                job_id: JobId::from("job-1"),
                preset: Some(Preset::Podcast),
                mode: ProcessingMode::Precise,
                metadata: ResultMetadata::default(),
            }
        );
        let model = state.view_model();
        assert_eq!(model.headline, "Precise Processing Complete!");
        assert_eq!(model.lines[0], "Your audio has been optimized for Podcast Content");
    }

    #[test]
    fn selecting_cannot_jump_to_error() {
        let err = ViewState::Selecting
            .apply(ViewEvent::UploadFailed {
                message: "boom".to_string(),
            })
            .unwrap_err();
        assert_eq!(err.state, "selecting");
        assert_eq!(err.event, "upload-failed");
    }

    #[test]
    fn upload_failure_shows_message() {
        let state = ViewState::Selecting
            .apply(ViewEvent::UploadStarted)
            .unwrap()
            .apply(ViewEvent::UploadFailed {
                message: "Failed to get upload URL".to_string(),
            })
            .unwrap();
        let model = state.view_model();
        assert_eq!(model.headline, "Processing Failed");
        assert_eq!(model.lines, vec!["Failed to get upload URL".to_string()]);
        assert_eq!(model.actions, vec![ViewAction::StartOver { label: "Try Again" }]);
    }

    #[test]
    fn upload_progress_switches_text_at_hundred() {
        let uploading = ViewState::Selecting.apply(ViewEvent::UploadStarted).unwrap();
        let partial = uploading
            .apply(ViewEvent::UploadProgress { percent: 40 })
            .unwrap();
        assert!(matches!(&partial, ViewState::Uploading { status_text, .. } if status_text == UPLOADING_TEXT));
        let done = partial
            .apply(ViewEvent::UploadProgress { percent: 100 })
            .unwrap();
        assert!(matches!(&done, ViewState::Uploading { percent: 100, status_text } if status_text == UPLOADED_TEXT));
    }

    #[test]
    fn frames_never_lower_displayed_progress() {
        let state = processing_state()
            .apply(ViewEvent::Frame { percent: 30.0 })
            .unwrap()
            .apply(ViewEvent::Frame { percent: 12.0 })
            .unwrap();
        assert!(matches!(state, ViewState::Processing { percent, .. } if percent == 30.0));
    }

    #[test]
    fn cancel_lock_survives_later_messages() {
        let state = processing_state()
            .apply(ViewEvent::ProgressMessage {
                message: "Finalizing processed audio...".to_string(),
                cancel_allowed: false,
            })
            .unwrap()
            .apply(ViewEvent::ProgressMessage {
                message: "Normalizing audio...".to_string(),
                cancel_allowed: true,
            })
            .unwrap();
        assert!(!state.cancel_enabled());
        assert!(state.apply(ViewEvent::CancelRequested).is_err());
    }

    #[test]
    fn rejected_cancel_re_enables_button() {
        let pending = processing_state().apply(ViewEvent::CancelRequested).unwrap();
        assert!(!pending.cancel_enabled());
        assert_eq!(
            pending.view_model().actions,
            vec![ViewAction::Cancel {
                enabled: false,
                pending: true
            }]
        );

        let rejected = pending
            .apply(ViewEvent::CancelRejected {
                message: "Failed to cancel: job already finishing".to_string(),
            })
            .unwrap();
        assert!(rejected.cancel_enabled());
        assert!(
            rejected
                .view_model()
                .lines
                .contains(&"Failed to cancel: job already finishing".to_string())
        );
    }

    #[test]
    fn terminal_states_only_accept_start_over() {
        let cancelled = processing_state()
            .apply(ViewEvent::ProcessingCancelled)
            .unwrap();
        assert!(cancelled.is_terminal());
        assert!(cancelled.apply(ViewEvent::Frame { percent: 50.0 }).is_err());
        assert!(
            cancelled
                .apply(ViewEvent::ProgressMessage {
                    message: "Processing...".to_string(),
                    cancel_allowed: true
                })
                .is_err()
        );
        assert_eq!(
            cancelled.apply(ViewEvent::StartOver).unwrap(),
            ViewState::Selecting
        );
        assert!(ViewState::Selecting.apply(ViewEvent::StartOver).is_err());
    }

    #[test]
    fn completed_view_lists_metadata() {
        let metadata = ResultMetadata {
            duration_seconds: Some(205.4),
            format: Some("mp3".to_string()),
            silence_trimmed: Some(true),
        };
        let lines = metadata_lines(&metadata);
        assert_eq!(
            lines,
            vec![
                "Duration: 3:25".to_string(),
                "Format: MP3".to_string(),
                "Silence trimmed from the start and end of the file".to_string(),
            ]
        );
    }
}
