//! Core library crate for the LevelMix client: uploads, job polling and progress views.

pub mod api;
pub mod billing;
pub mod board;
pub mod config;
pub mod error;
pub mod estimator;
pub mod job;
pub mod logging;
pub mod poller;
pub mod renderer;
pub mod selection;
pub mod session;
pub mod upload;
pub mod view;

pub use api::{ApiClient, JobBackend};
pub use billing::{BillingClient, BillingInterval};
pub use board::{JobBoard, JobRow};
pub use config::{
    ClientConfig, ConfigError, ConfigLoadResult, ConfigSource, RuntimeOverrides,
    apply_runtime_overrides, config_directory, config_path, load_config, save_config,
};
pub use error::ApiError;
pub use estimator::{Estimate, backend_progress_message, estimate};
pub use job::{JobId, JobStatus, ResultMetadata, StatusSnapshot};
pub use logging::{
    LoggingDestination, LoggingError, current_log_dir, init_logging, log_directory,
};
pub use poller::{
    MIN_POLL_INTERVAL, PollEvent, PollHandle, PollRegistry, PollSettings, PollTracker, PollUpdate,
    ProgressReport, spawn_poll,
};
pub use renderer::{ProgressDriver, RenderMode};
pub use selection::{
    LoudnessTarget, Preset, ProcessingMode, UploadOptions, UploadSelection, UserTier,
    ValidationError,
};
pub use session::{SessionController, UploadSession};
pub use upload::{TransferError, UploadClient, UploadError, UploadEvent, UploadEventCallback};
pub use view::{
    InvalidTransition, ViewAction, ViewEvent, ViewModel, ViewRenderer, ViewState, metadata_lines,
};
