#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use lmix_core::{ApiError, JobBackend, JobId, JobStatus, PollSettings, StatusSnapshot};

/// One scripted `/status` reply.
#[derive(Clone)]
pub enum Reply {
    Ok(StatusSnapshot),
    Err(&'static str),
}

/// In-memory backend. Each job replays its script in order; the last entry repeats.
#[derive(Default)]
pub struct FakeBackend {
    scripts: Mutex<HashMap<JobId, VecDeque<Reply>>>,
    cancel_reply: Mutex<Option<Result<JobStatus, &'static str>>>,
    retry_reply: Mutex<Option<Result<JobStatus, &'static str>>>,
    status_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
    retry_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, id: &str, replies: Vec<Reply>) -> Self {
        self.set_script(id, replies);
        self
    }

    pub fn set_script(&self, id: &str, replies: Vec<Reply>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(JobId::from(id), replies.into());
    }

    pub fn cancel_returns(self, reply: Result<JobStatus, &'static str>) -> Self {
        *self.cancel_reply.lock().unwrap() = Some(reply);
        self
    }

    pub fn retry_returns(self, reply: Result<JobStatus, &'static str>) -> Self {
        *self.retry_reply.lock().unwrap() = Some(reply);
        self
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    pub fn retry_calls(&self) -> usize {
        self.retry_calls.load(Ordering::SeqCst)
    }

    fn next_status(&self, id: &JobId) -> Result<StatusSnapshot, ApiError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let mut scripts = self.scripts.lock().unwrap();
        let Some(queue) = scripts.get_mut(id) else {
            return Err(ApiError::Status {
                endpoint: "status".to_string(),
                status: 404,
            });
        };
        let reply = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        match reply {
            Some(Reply::Ok(snapshot)) => Ok(snapshot),
            Some(Reply::Err(message)) => Err(ApiError::message(message)),
            None => Err(ApiError::message("empty script")),
        }
    }

    fn action(slot: &Mutex<Option<Result<JobStatus, &'static str>>>) -> Result<JobStatus, ApiError> {
        match slot.lock().unwrap().clone() {
            Some(Ok(status)) => Ok(status),
            Some(Err(message)) => Err(ApiError::Server(message.to_string())),
            None => Err(ApiError::message("no reply scripted")),
        }
    }
}

impl JobBackend for FakeBackend {
    fn status<'a>(&'a self, id: &'a JobId) -> BoxFuture<'a, Result<StatusSnapshot, ApiError>> {
        let result = self.next_status(id);
        Box::pin(async move { result })
    }

    fn retry<'a>(&'a self, _id: &'a JobId) -> BoxFuture<'a, Result<JobStatus, ApiError>> {
        self.retry_calls.fetch_add(1, Ordering::SeqCst);
        let result = Self::action(&self.retry_reply);
        Box::pin(async move { result })
    }

    fn cancel<'a>(&'a self, _id: &'a JobId) -> BoxFuture<'a, Result<JobStatus, ApiError>> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        let result = Self::action(&self.cancel_reply);
        Box::pin(async move { result })
    }
}

pub fn ok(status: JobStatus) -> Reply {
    Reply::Ok(StatusSnapshot::new(status))
}

pub fn progress(percent: f64) -> Reply {
    Reply::Ok(StatusSnapshot::new(JobStatus::Processing).with_progress(percent))
}

pub fn fast_settings() -> PollSettings {
    PollSettings {
        interval: Duration::from_millis(10),
        completion_delay: Duration::from_millis(10),
    }
}
