//! Presigned upload handoff.
//!
//! An upload is three sequential requests that must all succeed:
//! 1. ask the application server for a presigned storage destination,
//! 2. PUT the raw bytes straight to storage,
//! 3. confirm the upload so the backend queues processing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use futures_util::StreamExt;
use regex::Regex;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::multipart::Form;
use serde::Deserialize;
use thiserror::Error;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::api::{ApiClient, ErrorBody};
use crate::job::JobId;
use crate::selection::{LoudnessTarget, UploadOptions, UploadSelection, UserTier, ValidationError};

const PRESIGN_FALLBACK: &str = "Failed to get upload URL";

/// Destination handed out by `/api/presigned-upload`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PresignedUpload {
    pub upload_url: String,
    pub content_type: String,
    pub file_id: String,
}

/// Step notifications emitted while an upload runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    RequestingDestination,
    Transfer { percent: u8 },
    Confirming,
    Confirmed { job_id: JobId },
}

pub type UploadEventCallback = Arc<dyn Fn(UploadEvent) + Send + Sync + 'static>;

/// Why the byte transfer to storage failed.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransferError {
    #[error(
        "The file could not be read. It is likely a cloud-storage placeholder (iCloud, OneDrive, Dropbox) that has not been downloaded to this device yet. Download it locally and try again."
    )]
    Unreadable,
    #[error("Storage refused the upload (permission denied). The upload link may have expired, please try again.")]
    PermissionDenied,
    #[error("Storage service error (HTTP {0}). Please try again in a moment.")]
    ServerError(u16),
    #[error("Storage upload failed with status {0}")]
    Rejected(u16),
    #[error("Network error during upload. Check your connection and try again.")]
    Network,
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    Presign(String),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error("Failed to confirm upload and start processing")]
    Confirm,
    #[error("Start over before uploading another file")]
    NotReady,
}

/// Classify a failed transfer.
///
/// Local read errors and transport failures before any byte left the machine
/// both mean the source could not be read; HTTP statuses take precedence
/// otherwise.
pub fn classify_transfer_failure(
    bytes_sent: u64,
    http_status: Option<u16>,
    read_failed: bool,
) -> TransferError {
    if read_failed {
        return TransferError::Unreadable;
    }
    match http_status {
        Some(403) => TransferError::PermissionDenied,
        Some(status) if status >= 500 => TransferError::ServerError(status),
        Some(status) => TransferError::Rejected(status),
        None if bytes_sent == 0 => TransferError::Unreadable,
        None => TransferError::Network,
    }
}

/// Whole-percent progress of a transfer.
pub fn transfer_percent(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((sent as f64 / total as f64) * 100.0).round().min(100.0) as u8
}

/// Job id embedded in the confirmation fragment (`data-file-id="..."`).
pub fn extract_file_id(html: &str) -> Option<String> {
    let pattern = Regex::new(r#"data-file-id\s*=\s*["']([^"']+)["']"#).ok()?;
    pattern
        .captures(html)
        .and_then(|captures| captures.get(1))
        .map(|id| id.as_str().trim().to_string())
        .filter(|id| !id.is_empty())
}

#[derive(Debug, Clone)]
pub struct UploadClient {
    api: ApiClient,
    tier: UserTier,
}

impl UploadClient {
    pub fn new(api: ApiClient, tier: UserTier) -> Self {
        Self { api, tier }
    }

    pub fn tier(&self) -> UserTier {
        self.tier
    }

    /// Run the full handoff and return the job id to poll.
    pub async fn upload(
        &self,
        selection: &UploadSelection,
        options: &UploadOptions,
        events: Option<UploadEventCallback>,
    ) -> Result<JobId, UploadError> {
        let target = options.resolve_target(self.tier)?;

        emit(&events, UploadEvent::RequestingDestination);
        let presigned = self.request_destination(selection).await?;

        self.transfer(selection, &presigned, events.clone()).await?;

        emit(&events, UploadEvent::Confirming);
        let job_id = self.confirm(selection, &presigned, options, target).await?;
        emit(
            &events,
            UploadEvent::Confirmed {
                job_id: job_id.clone(),
            },
        );

        Ok(job_id)
    }

    pub async fn request_destination(
        &self,
        selection: &UploadSelection,
    ) -> Result<PresignedUpload, UploadError> {
        let response = self
            .api
            .http()
            .get(self.api.url("/api/presigned-upload"))
            .query(&[
                ("filename", selection.file_name.clone()),
                ("filesize", selection.size.to_string()),
            ])
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|err| {
                warn!(error = %err, "Presigned URL request failed");
                UploadError::Presign(PRESIGN_FALLBACK.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(ErrorBody::text)
                .unwrap_or_else(|| PRESIGN_FALLBACK.to_string());
            warn!(status, message = %message, "Presigned URL denied");
            return Err(UploadError::Presign(message));
        }

        let presigned: PresignedUpload = response.json().await.map_err(|err| {
            warn!(error = %err, "Malformed presigned URL response");
            UploadError::Presign(PRESIGN_FALLBACK.to_string())
        })?;
        info!(file_id = %presigned.file_id, "Upload destination issued");
        Ok(presigned)
    }

    pub async fn transfer(
        &self,
        selection: &UploadSelection,
        presigned: &PresignedUpload,
        events: Option<UploadEventCallback>,
    ) -> Result<(), TransferError> {
        let file = match tokio::fs::File::open(&selection.path).await {
            Ok(file) => file,
            Err(err) => {
                warn!(path = %selection.path.display(), error = %err, "Could not open file for upload");
                return Err(TransferError::Unreadable);
            }
        };

        let total = selection.size;
        let sent = Arc::new(AtomicU64::new(0));
        let read_failed = Arc::new(AtomicBool::new(false));
        let last_percent = Arc::new(AtomicU8::new(u8::MAX));

        let stream = {
            let sent = sent.clone();
            let read_failed = read_failed.clone();
            let events = events.clone();
            ReaderStream::new(file).map(move |chunk| {
                match &chunk {
                    Ok(bytes) => {
                        let so_far = sent.fetch_add(bytes.len() as u64, Ordering::SeqCst)
                            + bytes.len() as u64;
                        let percent = transfer_percent(so_far, total);
                        if last_percent.swap(percent, Ordering::SeqCst) != percent {
                            emit(&events, UploadEvent::Transfer { percent });
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "Read error while streaming upload");
                        read_failed.store(true, Ordering::SeqCst);
                    }
                }
                chunk
            })
        };

        let result = self
            .api
            .http()
            .put(&presigned.upload_url)
            .header(CONTENT_TYPE, presigned.content_type.as_str())
            .header(CONTENT_LENGTH, total)
            .body(reqwest::Body::wrap_stream(stream))
            .send()
            .await;

        let bytes_sent = sent.load(Ordering::SeqCst);
        let read_failed = read_failed.load(Ordering::SeqCst);
        match result {
            Ok(response) if response.status().is_success() => {
                emit(&events, UploadEvent::Transfer { percent: 100 });
                info!(bytes = bytes_sent, "Upload transferred to storage");
                Ok(())
            }
            Ok(response) => {
                let status = response.status().as_u16();
                let failure = classify_transfer_failure(bytes_sent, Some(status), read_failed);
                warn!(status, bytes = bytes_sent, failure = ?failure, "Storage rejected upload");
                Err(failure)
            }
            Err(err) => {
                let failure = classify_transfer_failure(bytes_sent, None, read_failed);
                warn!(error = %err, bytes = bytes_sent, failure = ?failure, "Upload transport failed");
                Err(failure)
            }
        }
    }

    pub async fn confirm(
        &self,
        selection: &UploadSelection,
        presigned: &PresignedUpload,
        options: &UploadOptions,
        target: Option<LoudnessTarget>,
    ) -> Result<JobId, UploadError> {
        let mut form = Form::new()
            .text("file_id", presigned.file_id.clone())
            .text("filename", selection.file_name.clone())
            .text("preset", options.preset.as_str())
            .text("processing_mode", options.mode.as_str());
        if let Some(target) = target {
            form = form.text("custom_lufs_value", target.to_string());
        }

        let response = self
            .api
            .http()
            .post(self.api.url("/api/confirm-upload"))
            .multipart(form)
            .send()
            .await
            .map_err(|err| {
                warn!(error = %err, "Upload confirmation request failed");
                UploadError::Confirm
            })?;

        if !response.status().is_success() {
            warn!(status = response.status().as_u16(), "Upload confirmation rejected");
            return Err(UploadError::Confirm);
        }

        let html = response.text().await.map_err(|_| UploadError::Confirm)?;
        let job_id = extract_file_id(&html).unwrap_or_else(|| presigned.file_id.clone());
        info!(job_id = %job_id, preset = %options.preset, mode = %options.mode, "Processing requested");
        Ok(JobId::new(job_id))
    }
}

fn emit(events: &Option<UploadEventCallback>, event: UploadEvent) {
    if let Some(callback) = events {
        callback(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_bytes_sent_means_unreadable_source() {
        assert_eq!(
            classify_transfer_failure(0, None, false),
            TransferError::Unreadable
        );
        assert!(
            TransferError::Unreadable
                .to_string()
                .contains("cloud-storage placeholder")
        );
    }

    #[test]
    fn transport_failure_after_progress_is_network() {
        assert_eq!(
            classify_transfer_failure(4_096, None, false),
            TransferError::Network
        );
    }

    #[test]
    fn read_errors_are_unreadable_even_mid_transfer() {
        assert_eq!(
            classify_transfer_failure(4_096, None, true),
            TransferError::Unreadable
        );
    }

    #[test]
    fn http_statuses_are_distinguished() {
        assert_eq!(
            classify_transfer_failure(10, Some(403), false),
            TransferError::PermissionDenied
        );
        assert_eq!(
            classify_transfer_failure(10, Some(503), false),
            TransferError::ServerError(503)
        );
        assert_eq!(
            classify_transfer_failure(10, Some(400), false),
            TransferError::Rejected(400)
        );
    }

    #[test]
    fn percent_rounds_to_whole_numbers() {
        assert_eq!(transfer_percent(0, 200), 0);
        assert_eq!(transfer_percent(1, 200), 1);
        assert_eq!(transfer_percent(199, 200), 100);
        assert_eq!(transfer_percent(50, 0), 100);
    }

    #[test]
    fn file_id_is_read_from_fragment() {
        let html = r#"<div id="processing-state" class="state-transition" data-file-id="f00d" data-job-id="j1">"#;
        assert_eq!(extract_file_id(html).as_deref(), Some("f00d"));
        assert_eq!(extract_file_id("<div>nothing</div>"), None);
    }
}
