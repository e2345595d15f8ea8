//! Structured logging for the client.
//!
//! Session history goes to a daily JSON log under the config directory. That
//! file keeps debug events from the LevelMix crates and only warnings from the
//! HTTP stack. Stderr follows `LEVELMIX_LOG` / `RUST_LOG` and defaults to `info`.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use thiserror::Error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::fmt::time::{LocalTime, UtcTime};
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::Registry;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::config_directory;

const LOG_FILE_PREFIX: &str = "levelmix";
const LOG_FILE_SUFFIX: &str = "log";
/// Daily files kept before the appender prunes the oldest.
const MAX_LOG_FILES: usize = 7;

/// File directives when `LEVELMIX_LOG` is unset.
pub const DEFAULT_FILE_FILTER: &str = "warn,lmix_core=debug,lmix_cli=debug,lmix=debug";
/// Stderr directives when neither `LEVELMIX_LOG` nor `RUST_LOG` is set.
pub const DEFAULT_STDERR_FILTER: &str = "info,hyper=warn,reqwest=warn,rustls=warn";

/// Controls where structured logs are published.
#[derive(Debug, Clone, Copy)]
pub enum LoggingDestination {
    /// JSON logs to the daily file plus human-readable lines on stderr.
    FileAndStderr,
    /// Only the daily file; keeps the terminal free for progress rendering.
    FileOnly,
    /// Only stderr (tests and ad-hoc tools).
    StderrOnly,
}

#[derive(Debug)]
struct LoggingGuards {
    _guard: Option<WorkerGuard>,
    log_dir: Option<PathBuf>,
}

static LOGGING_STATE: OnceLock<LoggingGuards> = OnceLock::new();

/// Errors that can arise while standing up structured logging.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to prepare log directory: {0}")]
    Io(#[from] io::Error),
    #[error("failed to open rolling log file: {0}")]
    Appender(#[from] InitError),
    #[error("invalid logging filter: {0}")]
    Filter(#[from] ParseError),
    #[error("failed to install logging subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Install the global structured logging subscriber.
///
/// The first call wins; subsequent calls are no-ops that return the log directory.
pub fn init_logging(
    destination: LoggingDestination,
) -> Result<Option<&'static PathBuf>, LoggingError> {
    if LOGGING_STATE.get().is_none() {
        let guards = install_logging(destination)?;
        if let Err(guards) = LOGGING_STATE.set(guards) {
            drop(guards);
        }
    }

    Ok(current_log_dir())
}

/// Directory holding the daily `levelmix.<date>.log` files, once logging is up.
pub fn current_log_dir() -> Option<&'static PathBuf> {
    LOGGING_STATE
        .get()
        .and_then(|guards| guards.log_dir.as_ref())
}

pub fn log_directory() -> PathBuf {
    config_directory().join("logs")
}

fn install_logging(destination: LoggingDestination) -> Result<LoggingGuards, LoggingError> {
    let (file_layer, guard, log_dir) = match destination {
        LoggingDestination::FileAndStderr | LoggingDestination::FileOnly => {
            let dir = log_directory();
            let (layer, guard) = file_layer(&dir)?;
            (Some(layer), Some(guard), Some(dir))
        }
        LoggingDestination::StderrOnly => (None, None, None),
    };

    let stderr_layer = match destination {
        LoggingDestination::FileOnly => None,
        _ => Some(
            tracing_subscriber::fmt::layer()
                .event_format(
                    tracing_subscriber::fmt::format()
                        .with_timer(LocalTime::rfc_3339())
                        .with_level(true)
                        .with_target(true)
                        .with_ansi(false),
                )
                .with_writer(io::stderr)
                .with_ansi(false)
                .with_filter(stderr_filter()?)
                .boxed(),
        ),
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()?;

    if let Some(dir) = log_dir.as_ref() {
        info!(dir = %dir.display(), retained = MAX_LOG_FILES, "Structured logging enabled");
    }

    Ok(LoggingGuards {
        _guard: guard,
        log_dir,
    })
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

fn file_layer(dir: &Path) -> Result<(BoxedLayer, WorkerGuard), LoggingError> {
    fs::create_dir_all(dir)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix(LOG_FILE_SUFFIX)
        .max_log_files(MAX_LOG_FILES)
        .build(dir)?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = tracing_subscriber::fmt::layer()
        .event_format(
            tracing_subscriber::fmt::format()
                .json()
                .with_timer(UtcTime::rfc_3339())
                .with_level(true)
                .with_target(true)
                .with_file(true)
                .with_line_number(true),
        )
        .with_writer(writer)
        .with_ansi(false)
        .with_filter(file_filter()?)
        .boxed();
    Ok((layer, guard))
}

fn levelmix_override() -> Option<String> {
    env::var("LEVELMIX_LOG")
        .ok()
        .filter(|spec| !spec.trim().is_empty())
}

fn file_filter() -> Result<EnvFilter, ParseError> {
    EnvFilter::try_new(levelmix_override().as_deref().unwrap_or(DEFAULT_FILE_FILTER))
}

fn stderr_filter() -> Result<EnvFilter, ParseError> {
    if let Some(spec) = levelmix_override() {
        return EnvFilter::try_new(spec);
    }
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(DEFAULT_STDERR_FILTER),
    }
}
