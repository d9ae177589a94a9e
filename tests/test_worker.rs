//! Integration tests for the worker loop: outcome classification, retry
//! backoff, panic capture, deadlines and the per-worker limits.

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use horizon::models::job::{Payload, Status};
use horizon::models::supervisor::WorkerStatus;
use horizon::models::Duration;
use horizon::registry::{Job, JobRegistry, JobSpec};
use horizon::worker::{Worker, WorkerOptions};

fn options(queues: &[&str]) -> WorkerOptions {
    WorkerOptions {
        queues: queues.iter().map(|q| (*q).to_owned()).collect(),
        sleep: Duration::from_millis(50),
        ..WorkerOptions::default()
    }
}

fn spawn_worker(
    h: &support::TestHarness,
    registry: Arc<JobRegistry>,
    options: WorkerOptions,
) -> (
    Arc<Worker>,
    CancellationToken,
    tokio::task::JoinHandle<horizon::HorizonResult<()>>,
) {
    let worker = Arc::new(Worker::new(
        h.queue.clone(),
        h.failed.clone(),
        registry,
        h.metrics.clone(),
        h.conn.clone(),
        h.keys.clone(),
        options,
    ));
    let token = CancellationToken::new();
    let join = tokio::spawn(worker.clone().run(token.clone()));
    (worker, token, join)
}

async fn wait_for<F: Fn() -> bool>(cond: F, timeout_ms: u64) -> bool {
    let deadline = tokio::time::Instant::now() + StdDuration::from_millis(timeout_ms);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(StdDuration::from_millis(25)).await;
    }
    false
}

#[derive(Debug, Deserialize, Serialize)]
struct Ordered {
    label: String,
}

static SEEN: OnceLock<Mutex<Vec<String>>> = OnceLock::new();

#[async_trait]
impl Job for Ordered {
    const NAME: &'static str = "ordered";

    async fn handle(&self) -> anyhow::Result<()> {
        SEEN.get_or_init(|| Mutex::new(Vec::new()))
            .lock()
            .unwrap()
            .push(self.label.clone());
        Ok(())
    }
}

#[tokio::test]
async fn processes_jobs_in_fifo_order() {
    let Some(h) = support::init().await else { return };
    let registry = Arc::new(JobRegistry::new());
    registry.register::<Ordered>();

    for label in ["a", "b", "c"] {
        let payload = Payload::build(&Ordered { label: label.to_owned() }, "q").unwrap();
        h.queue.push("q", &payload).await.unwrap();
    }

    let (worker, token, join) = spawn_worker(&h, registry, options(&["q"]));
    assert!(wait_for(|| worker.jobs_processed() == 3, 5000).await);
    token.cancel();
    join.await.unwrap().unwrap();

    let seen = SEEN.get_or_init(|| Mutex::new(Vec::new())).lock().unwrap().clone();
    assert_eq!(seen, vec!["a", "b", "c"]);
    assert_eq!(worker.status(), WorkerStatus::Stopped);

    assert_eq!(h.queue.size("q").await.unwrap(), 0);
    assert_eq!(h.queue.reserved_size("q").await.unwrap(), 0);
    assert_eq!(h.metrics.queue_metrics("q").await.unwrap().total_processed, 3);

    let recent = h.metrics.recent_jobs(10).await.unwrap();
    assert_eq!(recent.len(), 3);
    assert!(recent.iter().all(|job| job.status == Status::Completed));
    assert!(recent.iter().all(|job| job.attempts == 1));
}

#[derive(Debug, Deserialize, Serialize)]
struct AlwaysFails;

#[async_trait]
impl Job for AlwaysFails {
    const NAME: &'static str = "always_fails";

    fn spec() -> JobSpec {
        JobSpec {
            max_attempts: Some(2),
            retry_delay: Some(Duration::from_secs(1)),
            ..JobSpec::default()
        }
    }

    async fn handle(&self) -> anyhow::Result<()> {
        anyhow::bail!("boom")
    }
}

#[tokio::test]
async fn retries_with_backoff_then_lands_in_failed_store() {
    let Some(h) = support::init().await else { return };
    let registry = Arc::new(JobRegistry::new());
    registry.register::<AlwaysFails>();

    let payload = Payload::build(&AlwaysFails, "q").unwrap();
    assert_eq!(payload.max_attempts, 2);
    h.queue.push("q", &payload).await.unwrap();

    let (_worker, token, join) = spawn_worker(&h, registry, options(&["q"]));

    // first attempt fails quickly and is parked in the delayed set
    tokio::time::sleep(StdDuration::from_millis(500)).await;
    assert_eq!(h.queue.delayed_size("q").await.unwrap(), 1);
    assert_eq!(h.failed.count().await.unwrap(), 0);

    // after the 1s retry delay the second (final) attempt runs and fails
    let deadline = tokio::time::Instant::now() + StdDuration::from_millis(5000);
    while h.failed.count().await.unwrap() == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(StdDuration::from_millis(50)).await;
    }
    token.cancel();
    join.await.unwrap().unwrap();

    assert_eq!(h.failed.count().await.unwrap(), 1);
    let failed = h.failed.find(&payload.id).await.unwrap();
    assert!(failed.exception.contains("boom"));
    assert_eq!(failed.payload.attempts, 2);

    assert_eq!(h.queue.size("q").await.unwrap(), 0);
    assert_eq!(h.queue.delayed_size("q").await.unwrap(), 0);
    assert_eq!(h.queue.reserved_size("q").await.unwrap(), 0);

    let metrics = h.metrics.queue_metrics("q").await.unwrap();
    assert_eq!(metrics.total_failed, 1);
    assert_eq!(metrics.total_processed, 0);

    let recent = h.metrics.recent_jobs(10).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].status, Status::Failed);
    assert_eq!(recent[0].attempts, 2);
}

#[derive(Debug, Deserialize, Serialize)]
struct Panics;

#[async_trait]
impl Job for Panics {
    const NAME: &'static str = "panics";

    fn spec() -> JobSpec {
        JobSpec {
            max_attempts: Some(1),
            ..JobSpec::default()
        }
    }

    async fn handle(&self) -> anyhow::Result<()> {
        panic!("boom");
    }
}

#[tokio::test]
async fn panics_are_captured_as_failures() {
    let Some(h) = support::init().await else { return };
    let registry = Arc::new(JobRegistry::new());
    registry.register::<Panics>();

    let payload = Payload::build(&Panics, "q").unwrap();
    h.queue.push("q", &payload).await.unwrap();

    let (_worker, token, join) = spawn_worker(&h, registry, options(&["q"]));
    let deadline = tokio::time::Instant::now() + StdDuration::from_millis(5000);
    while h.failed.count().await.unwrap() == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(StdDuration::from_millis(50)).await;
    }
    token.cancel();
    join.await.unwrap().unwrap();

    let failed = h.failed.find(&payload.id).await.unwrap();
    assert!(failed.exception.starts_with("job panicked: boom\n"));
    // the panic value is followed by the captured stack
    assert!(failed.exception.lines().count() > 1);
    assert_eq!(failed.payload.attempts, 1);
}

#[derive(Debug, Deserialize, Serialize)]
struct Sleeps;

#[async_trait]
impl Job for Sleeps {
    const NAME: &'static str = "sleeps";

    fn spec() -> JobSpec {
        JobSpec {
            max_attempts: Some(1),
            timeout: Some(Duration::from_secs(1)),
            ..JobSpec::default()
        }
    }

    async fn handle(&self) -> anyhow::Result<()> {
        tokio::time::sleep(StdDuration::from_secs(30)).await;
        Ok(())
    }
}

#[tokio::test]
async fn deadline_overrun_counts_as_attempt_and_fails() {
    let Some(h) = support::init().await else { return };
    let registry = Arc::new(JobRegistry::new());
    registry.register::<Sleeps>();

    let payload = Payload::build(&Sleeps, "q").unwrap();
    h.queue.push("q", &payload).await.unwrap();

    let (_worker, token, join) = spawn_worker(&h, registry, options(&["q"]));
    let deadline = tokio::time::Instant::now() + StdDuration::from_millis(5000);
    while h.failed.count().await.unwrap() == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(StdDuration::from_millis(50)).await;
    }
    token.cancel();
    join.await.unwrap().unwrap();

    let failed = h.failed.find(&payload.id).await.unwrap();
    assert!(failed.exception.contains("timed out"));
    assert_eq!(failed.payload.attempts, 1);
}

#[derive(Debug, Deserialize, Serialize)]
struct Counted;

static COUNTED: AtomicUsize = AtomicUsize::new(0);

#[async_trait]
impl Job for Counted {
    const NAME: &'static str = "counted";

    async fn handle(&self) -> anyhow::Result<()> {
        COUNTED.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn max_jobs_bounds_total_outcomes() {
    let Some(h) = support::init().await else { return };
    let registry = Arc::new(JobRegistry::new());
    registry.register::<Counted>();

    for _ in 0..3 {
        let payload = Payload::build(&Counted, "q").unwrap();
        h.queue.push("q", &payload).await.unwrap();
    }

    let mut opts = options(&["q"]);
    opts.max_jobs = 2;
    let (worker, _token, join) = spawn_worker(&h, registry, opts);

    // the worker exits on its own after the second outcome
    tokio::time::timeout(StdDuration::from_secs(5), join)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(worker.jobs_processed(), 2);
    assert_eq!(worker.status(), WorkerStatus::Stopped);
    assert_eq!(h.queue.size("q").await.unwrap(), 1);
}

#[derive(Debug, Deserialize, Serialize)]
struct Unhandled;

#[async_trait]
impl Job for Unhandled {
    const NAME: &'static str = "unhandled";

    fn spec() -> JobSpec {
        JobSpec {
            max_attempts: Some(1),
            ..JobSpec::default()
        }
    }

    async fn handle(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn unregistered_job_type_fails_with_not_registered() {
    let Some(h) = support::init().await else { return };
    let registry = Arc::new(JobRegistry::new());

    let payload = Payload::build(&Unhandled, "q").unwrap();
    h.queue.push("q", &payload).await.unwrap();

    let (_worker, token, join) = spawn_worker(&h, registry, options(&["q"]));
    let deadline = tokio::time::Instant::now() + StdDuration::from_millis(5000);
    while h.failed.count().await.unwrap() == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(StdDuration::from_millis(50)).await;
    }
    token.cancel();
    join.await.unwrap().unwrap();

    let failed = h.failed.find(&payload.id).await.unwrap();
    assert!(failed.exception.contains("not registered"));
}

#[derive(Debug, Deserialize, Serialize)]
struct PauseProbe;

static PAUSE_RUNS: AtomicUsize = AtomicUsize::new(0);

#[async_trait]
impl Job for PauseProbe {
    const NAME: &'static str = "pause_probe";

    async fn handle(&self) -> anyhow::Result<()> {
        PAUSE_RUNS.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn pause_stops_new_pops_until_resume() {
    let Some(h) = support::init().await else { return };
    let registry = Arc::new(JobRegistry::new());
    registry.register::<PauseProbe>();

    let (worker, token, join) = spawn_worker(&h, registry, options(&["q"]));
    assert!(wait_for(|| worker.status() == WorkerStatus::Running, 2000).await);

    worker.pause();
    assert!(wait_for(|| worker.status() == WorkerStatus::Paused, 2000).await);

    let payload = Payload::build(&PauseProbe, "q").unwrap();
    h.queue.push("q", &payload).await.unwrap();
    tokio::time::sleep(StdDuration::from_millis(400)).await;
    assert_eq!(PAUSE_RUNS.load(Ordering::SeqCst), 0);
    assert_eq!(h.queue.size("q").await.unwrap(), 1);

    worker.resume();
    assert!(wait_for(|| PAUSE_RUNS.load(Ordering::SeqCst) == 1, 5000).await);

    token.cancel();
    join.await.unwrap().unwrap();
}
