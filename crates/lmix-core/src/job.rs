//! Job identifiers and the status snapshots returned by `/status/{id}`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque server-assigned identifier of an uploaded file / processing job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Backend job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Uploaded,
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
    /// Any status string this client does not recognise. Treated as non-terminal.
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Uploaded => "uploaded",
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only, eventually-consistent view of a job as last reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub status: JobStatus,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub silence_trimmed: Option<bool>,
}

impl StatusSnapshot {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            progress: None,
            error: None,
            duration_seconds: None,
            format: None,
            silence_trimmed: None,
        }
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Backend-reported progress when it is authoritative (strictly positive).
    pub fn authoritative_progress(&self) -> Option<f64> {
        self.progress
            .filter(|value| value.is_finite() && *value > 0.0)
            .map(|value| value.min(100.0))
    }

    pub fn metadata(&self) -> ResultMetadata {
        ResultMetadata {
            duration_seconds: self.duration_seconds,
            format: self.format.clone(),
            silence_trimmed: self.silence_trimmed,
        }
    }
}

/// Descriptive metadata about a finished job's output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultMetadata {
    pub duration_seconds: Option<f64>,
    pub format: Option<String>,
    pub silence_trimmed: Option<bool>,
}
