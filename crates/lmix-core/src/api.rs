//! HTTP access to the LevelMix backend.

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use reqwest::header::{CONTENT_DISPOSITION, COOKIE, HeaderMap, HeaderValue};
use reqwest::{Client, Response};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::job::{JobId, JobStatus, StatusSnapshot};

const USER_AGENT: &str = concat!("lmix/", env!("CARGO_PKG_VERSION"));

/// `{error}` / `{message}` bodies returned on failures.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    pub(crate) fn text(self) -> Option<String> {
        self.error
            .or(self.message)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
    }
}

/// Body of `/retry/{id}` and `/cancel/{id}`.
#[derive(Debug, Deserialize)]
struct ActionResponse {
    #[serde(default)]
    status: Option<JobStatus>,
    #[serde(default)]
    error: Option<String>,
}

/// Thin wrapper over a configured `reqwest::Client` and the server base URL.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        Self::build(&config.server.base_url, config.server.cookie.as_deref())
    }

    /// Client without a session cookie, mostly for tests.
    pub fn with_base_url(base_url: &str) -> Result<Self, ApiError> {
        Self::build(base_url, None)
    }

    fn build(base_url: &str, cookie: Option<&str>) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = cookie {
            let value = HeaderValue::from_str(cookie)
                .map_err(|err| ApiError::message(format!("invalid cookie value: {err}")))?;
            headers.insert(COOKIE, value);
        }

        let http = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for a server-relative path such as `/api/confirm-upload`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn job_url(&self, prefix: &str, id: &JobId) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            prefix,
            urlencoding::encode(id.as_str())
        )
    }

    /// Where the processed file can be fetched.
    pub fn download_url(&self, id: &JobId) -> String {
        self.job_url("download", id)
    }

    pub async fn status(&self, id: &JobId) -> Result<StatusSnapshot, ApiError> {
        let url = self.job_url("status", id);
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(error_from_response(response, "status").await);
        }
        let snapshot: StatusSnapshot = response.json().await?;
        debug!(job_id = %id, status = %snapshot.status, progress = ?snapshot.progress, "Status received");
        Ok(snapshot)
    }

    pub async fn retry(&self, id: &JobId) -> Result<JobStatus, ApiError> {
        let status = self.post_action("retry", id).await?;
        info!(job_id = %id, status = %status, "Retry requested");
        Ok(status)
    }

    pub async fn cancel(&self, id: &JobId) -> Result<JobStatus, ApiError> {
        let status = self.post_action("cancel", id).await?;
        info!(job_id = %id, status = %status, "Cancel requested");
        Ok(status)
    }

    async fn post_action(&self, action: &str, id: &JobId) -> Result<JobStatus, ApiError> {
        let response = self
            .http
            .post(self.job_url(action, id))
            .header("Content-Type", "application/json")
            .send()
            .await?;
        let code = response.status();
        let body = response.text().await?;

        match serde_json::from_str::<ActionResponse>(&body) {
            Ok(ActionResponse {
                error: Some(error), ..
            }) => Err(ApiError::Server(error)),
            Ok(ActionResponse {
                status: Some(status),
                ..
            }) if code.is_success() => Ok(status),
            _ => Err(ApiError::Status {
                endpoint: action.to_string(),
                status: code.as_u16(),
            }),
        }
    }

    /// Stream the processed file to `destination`.
    ///
    /// When `destination` is a directory the server-suggested file name is used.
    /// Returns the written path and byte count.
    pub async fn download(
        &self,
        id: &JobId,
        destination: &Path,
    ) -> Result<(PathBuf, u64), ApiError> {
        let response = self.http.get(self.download_url(id)).send().await?;
        if !response.status().is_success() {
            return Err(error_from_response(response, "download").await);
        }

        let target = if destination.is_dir() {
            let name = response
                .headers()
                .get(CONTENT_DISPOSITION)
                .and_then(|value| value.to_str().ok())
                .and_then(attachment_file_name)
                .unwrap_or_else(|| format!("{id}-normalized"));
            destination.join(name)
        } else {
            destination.to_path_buf()
        };

        let mut file = tokio::fs::File::create(&target).await?;
        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        info!(job_id = %id, path = %target.display(), bytes = written, "Download finished");
        Ok((target, written))
    }
}

/// Turn a failed response into the most specific error available.
pub(crate) async fn error_from_response(response: Response, endpoint: &str) -> ApiError {
    let status = response.status().as_u16();
    let server_text = response
        .json::<ErrorBody>()
        .await
        .ok()
        .and_then(ErrorBody::text);
    match server_text {
        Some(text) => ApiError::Server(text),
        None => ApiError::Status {
            endpoint: endpoint.to_string(),
            status,
        },
    }
}

/// File name from a `Content-Disposition: attachment; filename="..."` header.
fn attachment_file_name(header: &str) -> Option<String> {
    header.split(';').find_map(|part| {
        let value = part.trim().strip_prefix("filename=")?;
        let name = value.trim_matches('"');
        let name = Path::new(name).file_name()?.to_string_lossy().into_owned();
        (!name.is_empty()).then_some(name)
    })
}

/// Job operations the poller and job board depend on; allows test fakes.
pub trait JobBackend: Send + Sync {
    fn status<'a>(&'a self, id: &'a JobId) -> BoxFuture<'a, Result<StatusSnapshot, ApiError>>;

    fn retry<'a>(&'a self, id: &'a JobId) -> BoxFuture<'a, Result<JobStatus, ApiError>>;

    fn cancel<'a>(&'a self, id: &'a JobId) -> BoxFuture<'a, Result<JobStatus, ApiError>>;
}

impl JobBackend for ApiClient {
    fn status<'a>(&'a self, id: &'a JobId) -> BoxFuture<'a, Result<StatusSnapshot, ApiError>> {
        Box::pin(ApiClient::status(self, id))
    }

    fn retry<'a>(&'a self, id: &'a JobId) -> BoxFuture<'a, Result<JobStatus, ApiError>> {
        Box::pin(ApiClient::retry(self, id))
    }

    fn cancel<'a>(&'a self, id: &'a JobId) -> BoxFuture<'a, Result<JobStatus, ApiError>> {
        Box::pin(ApiClient::cancel(self, id))
    }
}
