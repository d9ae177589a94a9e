//! Single-task worker loop: reserve a job, run it under its deadline,
//! then ack, retry or fail it.

use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once, RwLock};
use std::time::Instant;

use futures::FutureExt;
use log::{error, info, warn};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::failed::FailedJobStore;
use crate::keys::KeyBuilder;
use crate::metrics::MetricsCollector;
use crate::models::job::{Payload, RecentJob, Status};
use crate::models::supervisor::WorkerStatus;
use crate::models::{DateTime, Duration, HorizonError, HorizonResult};
use crate::queue::Queue;
use crate::registry::JobRegistry;

/// TTL of a worker's heartbeat record.
const WORKER_TTL_SECS: u64 = 5 * 60;

/// Cap on the recent-jobs ring.
const RECENT_JOBS_LIMIT: isize = 1000;

#[derive(Clone, Copy, Debug, PartialEq)]
enum WorkerControl {
    Run,
    Pause,
    Stop,
}

/// Tuning knobs for a single worker loop.
#[derive(Clone, Debug)]
pub struct WorkerOptions {
    /// Queues to consume, in pop-priority order.
    pub queues: Vec<String>,

    /// Sleep between polls when every queue is empty.
    pub sleep: Duration,

    /// Exit after this many outcomes (0 = unlimited).
    pub max_jobs: u64,

    /// Exit after this much wall time (0 = unlimited).
    pub max_time: Duration,

    /// Name of the owning supervisor, if any.
    pub supervisor: Option<String>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        WorkerOptions {
            queues: vec!["default".to_owned()],
            sleep: Duration::from_secs(3),
            max_jobs: 0,
            max_time: Duration::from_secs(0),
            supervisor: None,
        }
    }
}

/// A single-threaded processing loop over a set of queues.
///
/// At most one job is in flight per worker; the in-flight payload is
/// published through a shared slot so the HTTP surface can read it.
pub struct Worker {
    id: String,
    supervisor: Option<String>,
    queue: Queue,
    failed: FailedJobStore,
    registry: Arc<JobRegistry>,
    metrics: MetricsCollector,
    conn: ConnectionManager,
    keys: KeyBuilder,
    queues: Vec<String>,
    sleep: std::time::Duration,
    max_jobs: u64,
    max_time: Option<std::time::Duration>,
    status: RwLock<WorkerStatus>,
    current_job: RwLock<Option<Payload>>,
    jobs_processed: AtomicU64,
    control: watch::Sender<WorkerControl>,
}

impl Worker {
    pub fn new(
        queue: Queue,
        failed: FailedJobStore,
        registry: Arc<JobRegistry>,
        metrics: MetricsCollector,
        conn: ConnectionManager,
        keys: KeyBuilder,
        options: WorkerOptions,
    ) -> Self {
        let (control, _) = watch::channel(WorkerControl::Run);
        let max_time = if options.max_time.is_zero() {
            None
        } else {
            Some(options.max_time.as_std())
        };
        Worker {
            id: Uuid::new_v4().to_string(),
            supervisor: options.supervisor,
            queue,
            failed,
            registry,
            metrics,
            conn,
            keys,
            queues: options.queues,
            sleep: options.sleep.as_std(),
            max_jobs: options.max_jobs,
            max_time,
            status: RwLock::new(WorkerStatus::Idle),
            current_job: RwLock::new(None),
            jobs_processed: AtomicU64::new(0),
            control,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> WorkerStatus {
        *self.status.read().expect("worker status lock poisoned")
    }

    /// The payload currently being executed, if any.
    pub fn current_job(&self) -> Option<Payload> {
        self.current_job
            .read()
            .expect("worker job slot poisoned")
            .clone()
    }

    pub fn jobs_processed(&self) -> u64 {
        self.jobs_processed.load(Ordering::Relaxed)
    }

    /// Ask the loop to stop new pops; the in-flight pause takes effect after
    /// the current iteration.
    pub fn pause(&self) {
        self.control.send_replace(WorkerControl::Pause);
    }

    /// Resume popping after a pause.
    pub fn resume(&self) {
        self.control.send_replace(WorkerControl::Run);
    }

    /// Ask the loop to exit; any in-flight job drains first.
    pub fn stop(&self) {
        let mut status = self.status.write().expect("worker status lock poisoned");
        if matches!(*status, WorkerStatus::Running | WorkerStatus::Paused) {
            *status = WorkerStatus::Stopping;
        }
        drop(status);
        self.control.send_replace(WorkerControl::Stop);
    }

    /// Run the worker loop until stopped or cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> HorizonResult<()> {
        {
            let mut status = self.status.write().expect("worker status lock poisoned");
            if matches!(*status, WorkerStatus::Running | WorkerStatus::Paused) {
                return Err(HorizonError::conflict(format!(
                    "worker {} already started",
                    self.id
                )));
            }
            *status = WorkerStatus::Running;
        }

        install_panic_recorder();
        let started = Instant::now();
        let started_at = DateTime::now();
        let mut control = self.control.subscribe();
        self.register(&started_at).await;
        info!("[worker:{}] started, consuming {:?}", self.id, self.queues);

        'main: while !shutdown.is_cancelled() {
            let ctrl = *control.borrow_and_update();
            match ctrl {
                WorkerControl::Stop => break,
                WorkerControl::Pause => {
                    self.set_status(WorkerStatus::Paused);
                    self.register(&started_at).await;
                    info!("[worker:{}] paused", self.id);
                    loop {
                        tokio::select! {
                            _ = shutdown.cancelled() => break 'main,
                            changed = control.changed() => {
                                if changed.is_err() {
                                    break 'main;
                                }
                                let ctrl = *control.borrow();
                                match ctrl {
                                    WorkerControl::Pause => continue,
                                    WorkerControl::Stop => break 'main,
                                    WorkerControl::Run => {
                                        self.set_status(WorkerStatus::Running);
                                        self.register(&started_at).await;
                                        info!("[worker:{}] resumed", self.id);
                                        break;
                                    }
                                }
                            }
                        }
                    }
                }
                WorkerControl::Run => {
                    if self.max_jobs > 0 && self.jobs_processed() >= self.max_jobs {
                        info!("[worker:{}] reached max_jobs, exiting", self.id);
                        break;
                    }
                    if let Some(max_time) = self.max_time {
                        if started.elapsed() >= max_time {
                            info!("[worker:{}] reached max_time, exiting", self.id);
                            break;
                        }
                    }

                    match self.queue.pop(&self.queues).await {
                        Ok(payload) => self.process(payload, &shutdown).await,
                        Err(HorizonError::QueueEmpty) => self.idle(&shutdown, &mut control).await,
                        Err(err) => {
                            error!("[worker:{}] failed to reserve a job: {}", self.id, err);
                            self.idle(&shutdown, &mut control).await;
                        }
                    }
                }
            }
        }

        self.set_status(WorkerStatus::Stopped);
        self.unregister().await;
        info!(
            "[worker:{}] stopped ({} jobs processed)",
            self.id,
            self.jobs_processed()
        );
        Ok(())
    }

    async fn idle(&self, shutdown: &CancellationToken, control: &mut watch::Receiver<WorkerControl>) {
        tokio::select! {
            _ = shutdown.cancelled() => {},
            _ = tokio::time::sleep(self.sleep) => {},
            _ = control.changed() => {},
        }
    }

    async fn process(&self, payload: Payload, shutdown: &CancellationToken) {
        *self.current_job.write().expect("worker job slot poisoned") = Some(payload.clone());

        let start = Instant::now();
        let outcome = self.execute(&payload, shutdown).await;
        let runtime = start.elapsed();
        self.jobs_processed.fetch_add(1, Ordering::Relaxed);

        match outcome {
            Ok(()) => self.handle_success(&payload, runtime).await,
            Err(exception) => self.handle_failure(&payload, &exception, runtime).await,
        }

        *self.current_job.write().expect("worker job slot poisoned") = None;
    }

    /// Hydrate and run one job under its deadline. Panics inside user code
    /// are caught and rendered into the exception text.
    async fn execute(&self, payload: &Payload, shutdown: &CancellationToken) -> Result<(), String> {
        let job = match self.registry.hydrate(payload) {
            Ok(job) => job,
            Err(err) => return Err(err.to_string()),
        };

        let work = AssertUnwindSafe(job.run()).catch_unwind();
        tokio::select! {
            result = tokio::time::timeout(payload.timeout.as_std(), work) => match result {
                Ok(Ok(Ok(()))) => Ok(()),
                Ok(Ok(Err(err))) => Err(format!("{err:#}")),
                Ok(Err(panic)) => Err(format!(
                    "job panicked: {}\n{}",
                    panic_message(panic),
                    take_panic_backtrace()
                )),
                Err(_) => Err(HorizonError::Timeout(payload.timeout).to_string()),
            },
            _ = shutdown.cancelled() => Err("job canceled: worker shutting down".to_owned()),
        }
    }

    async fn handle_success(&self, payload: &Payload, runtime: std::time::Duration) {
        if let Err(err) = self.queue.delete(&payload.queue, payload).await {
            error!("[job:{}] failed to delete completed job: {}", payload.id, err);
        }
        self.metrics
            .record_job_processed(&payload.queue, payload, runtime)
            .await;
        self.store_recent(payload, Status::Completed, runtime).await;
        info!(
            "[job:{}] completed in {}",
            payload.id,
            humantime::format_duration(runtime)
        );
    }

    async fn handle_failure(&self, payload: &Payload, exception: &str, runtime: std::time::Duration) {
        if payload.attempts < payload.max_attempts {
            warn!(
                "[job:{}] attempt {}/{} failed: {}; releasing for retry",
                payload.id, payload.attempts, payload.max_attempts, exception
            );
            if let Err(err) = self
                .queue
                .release(&payload.queue, payload.clone(), payload.retry_delay)
                .await
            {
                error!("[job:{}] failed to release for retry: {}", payload.id, err);
            }
            return;
        }

        error!(
            "[job:{}] failed after {} attempts: {}",
            payload.id, payload.attempts, exception
        );
        if let Err(err) = self.failed.store(payload, exception).await {
            error!("[job:{}] failed to store failed job: {}", payload.id, err);
        }
        self.metrics
            .record_job_failed(&payload.queue, payload, runtime)
            .await;
        self.store_recent(payload, Status::Failed, runtime).await;
    }

    async fn store_recent(&self, payload: &Payload, status: Status, runtime: std::time::Duration) {
        let recent = RecentJob {
            id: payload.id.clone(),
            name: payload.name.clone(),
            queue: payload.queue.clone(),
            status,
            attempts: payload.attempts,
            runtime: Duration::from(runtime),
            completed_at: DateTime::now(),
            tags: payload.tags.clone(),
        };
        let data = match serde_json::to_vec(&recent) {
            Ok(data) => data,
            Err(err) => {
                warn!("[job:{}] failed to encode recent job: {}", payload.id, err);
                return;
            }
        };

        let mut conn = self.conn.clone();
        let result = redis::pipe()
            .lpush(self.keys.recent_jobs(), data)
            .ignore()
            .ltrim(self.keys.recent_jobs(), 0, RECENT_JOBS_LIMIT - 1)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await;
        if let Err(err) = result {
            warn!("[job:{}] failed to append recent job: {}", payload.id, err);
        }
    }

    fn set_status(&self, status: WorkerStatus) {
        *self.status.write().expect("worker status lock poisoned") = status;
    }

    /// Write the heartbeat record and join the supervisor's worker set.
    /// Called on start and on every status change; best-effort.
    async fn register(&self, started_at: &DateTime) {
        let record = serde_json::json!({
            "id": self.id,
            "supervisor": self.supervisor,
            "status": self.status().as_ref(),
            "queues": self.queues,
            "started_at": started_at.unix(),
            "pid": std::process::id(),
            "jobs_processed": self.jobs_processed(),
            "last_seen_at": DateTime::now().unix(),
        });

        let mut conn = self.conn.clone();
        if let Err(err) = conn
            .set_ex::<_, _, ()>(self.keys.worker(&self.id), record.to_string(), WORKER_TTL_SECS)
            .await
        {
            warn!("[worker:{}] failed to write heartbeat: {}", self.id, err);
        }
        if let Some(name) = &self.supervisor {
            if let Err(err) = conn
                .sadd::<_, _, ()>(self.keys.supervisor_workers(name), &self.id)
                .await
            {
                warn!("[worker:{}] failed to join supervisor set: {}", self.id, err);
            }
        }
    }

    async fn unregister(&self) {
        let mut conn = self.conn.clone();
        if let Err(err) = conn.del::<_, ()>(self.keys.worker(&self.id)).await {
            warn!("[worker:{}] failed to remove heartbeat: {}", self.id, err);
        }
        if let Some(name) = &self.supervisor {
            if let Err(err) = conn
                .srem::<_, _, ()>(self.keys.supervisor_workers(name), &self.id)
                .await
            {
                warn!("[worker:{}] failed to leave supervisor set: {}", self.id, err);
            }
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else {
        "unknown panic".to_owned()
    }
}

thread_local! {
    static PANIC_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Stash a backtrace from the panic site, chained in front of whatever hook
/// was already installed. The stack is read back right after `catch_unwind`
/// on the same thread, before any await point.
fn install_panic_recorder() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            PANIC_BACKTRACE.with(|slot| {
                *slot.borrow_mut() = Some(Backtrace::force_capture().to_string());
            });
            previous(info);
        }));
    });
}

fn take_panic_backtrace() -> String {
    PANIC_BACKTRACE
        .with(|slot| slot.borrow_mut().take())
        .unwrap_or_else(|| Backtrace::force_capture().to_string())
}
