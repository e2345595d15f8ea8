mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeBackend, Reply, fast_settings, ok, progress};
use lmix_core::{
    JobId, JobStatus, PollEvent, PollRegistry, PollSettings, PollUpdate, ProcessingMode,
    StatusSnapshot, spawn_poll,
};
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tokio::time::{sleep, timeout};

async fn collect_until_terminal(rx: &mut UnboundedReceiver<PollUpdate>) -> Vec<PollEvent> {
    let mut events = Vec::new();
    loop {
        let update = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("poll stalled")
            .expect("channel closed");
        let terminal = update.event.is_terminal();
        events.push(update.event);
        if terminal {
            return events;
        }
    }
}

#[tokio::test]
async fn polls_until_completed_and_reports_hundred_first() {
    let backend = Arc::new(FakeBackend::new().script(
        "job-1",
        vec![
            ok(JobStatus::Uploaded),
            ok(JobStatus::Queued),
            progress(40.0),
            Reply::Ok(
                StatusSnapshot::new(JobStatus::Completed)
                    .with_progress(100.0),
            ),
        ],
    ));
    let (tx, mut rx) = unbounded_channel();
    let handle = spawn_poll(
        backend.clone(),
        JobId::from("job-1"),
        ProcessingMode::Precise,
        fast_settings(),
        tx,
    );

    let events = collect_until_terminal(&mut rx).await;

    let percents: Vec<f64> = events
        .iter()
        .filter_map(|event| match event {
            PollEvent::Progress(report) => Some(report.percent),
            _ => None,
        })
        .collect();
    assert_eq!(percents, vec![8.0, 12.0, 40.0, 100.0]);
    assert!(matches!(events.last(), Some(PollEvent::Completed(_))));
    assert!(!handle.is_active());

    let calls = backend.status_calls();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(backend.status_calls(), calls, "poll kept running after completion");
}

#[tokio::test]
async fn transport_errors_are_swallowed() {
    let backend = Arc::new(FakeBackend::new().script(
        "job-2",
        vec![
            Reply::Err("connection reset"),
            Reply::Err("bad gateway"),
            Reply::Ok(StatusSnapshot::new(JobStatus::Failed).with_error("decoder error")),
        ],
    ));
    let (tx, mut rx) = unbounded_channel();
    let _handle = spawn_poll(
        backend.clone(),
        JobId::from("job-2"),
        ProcessingMode::Fast,
        fast_settings(),
        tx,
    );

    let events = collect_until_terminal(&mut rx).await;
    assert_eq!(
        events.last(),
        Some(&PollEvent::Failed("decoder error".to_string()))
    );
    assert_eq!(backend.status_calls(), 3);
}

#[tokio::test]
async fn cancelled_handle_stops_requests() {
    let backend = Arc::new(FakeBackend::new().script("job-3", vec![progress(20.0)]));
    let (tx, mut rx) = unbounded_channel();
    let handle = spawn_poll(
        backend.clone(),
        JobId::from("job-3"),
        ProcessingMode::Fast,
        fast_settings(),
        tx,
    );

    let first = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
    assert!(first.is_some());

    handle.cancel();
    assert!(!handle.is_active());
    let calls = backend.status_calls();
    sleep(Duration::from_millis(60)).await;
    assert_eq!(backend.status_calls(), calls);
}

#[tokio::test]
async fn starting_twice_keeps_one_active_poll() {
    let backend = Arc::new(FakeBackend::new().script("job-4", vec![progress(10.0)]));
    let (tx, _rx) = unbounded_channel();
    let mut registry = PollRegistry::new(backend, fast_settings(), tx);

    assert!(registry.start(JobId::from("job-4"), ProcessingMode::Fast));
    assert!(!registry.start(JobId::from("job-4"), ProcessingMode::Fast));
    assert_eq!(registry.active_count(), 1);
    assert!(registry.is_polling(&JobId::from("job-4")));

    assert!(registry.stop(&JobId::from("job-4")));
    assert_eq!(registry.active_count(), 0);
    assert!(!registry.stop(&JobId::from("job-4")));
}

#[tokio::test]
async fn registry_polls_jobs_independently() {
    let backend = Arc::new(
        FakeBackend::new()
            .script("a", vec![ok(JobStatus::Completed)])
            .script("b", vec![progress(30.0)]),
    );
    let (tx, mut rx) = unbounded_channel();
    let mut registry = PollRegistry::new(backend, fast_settings(), tx);
    registry.start(JobId::from("a"), ProcessingMode::Fast);
    registry.start(JobId::from("b"), ProcessingMode::Fast);

    loop {
        let update = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        if update.job_id == JobId::from("a") && update.event.is_terminal() {
            break;
        }
    }

    registry.prune();
    assert!(!registry.is_polling(&JobId::from("a")));
    assert!(registry.is_polling(&JobId::from("b")));
    registry.stop_all();
    assert_eq!(registry.active_count(), 0);
}

#[tokio::test]
async fn zero_interval_settings_still_poll() {
    let backend = Arc::new(FakeBackend::new().script("job-z", vec![ok(JobStatus::Completed)]));
    let settings = PollSettings {
        interval: Duration::ZERO,
        completion_delay: Duration::ZERO,
    };
    let (tx, mut rx) = unbounded_channel();
    let _handle = spawn_poll(
        backend,
        JobId::from("job-z"),
        ProcessingMode::Fast,
        settings,
        tx,
    );

    let events = collect_until_terminal(&mut rx).await;
    assert!(matches!(events.last(), Some(PollEvent::Completed(_))));

    let clamped = PollSettings::new(Duration::ZERO, Duration::ZERO);
    assert!(clamped.interval > Duration::ZERO);
}
