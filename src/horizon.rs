//! The coordinator: wires queue, failed store, metrics, supervisors and the
//! HTTP surface together and owns their lifecycle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use actix_web::{web, App, HttpServer};
use log::{error, info};
use redis::aio::ConnectionManager;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::failed::FailedJobStore;
use crate::handlers;
use crate::keys::KeyBuilder;
use crate::metrics::MetricsCollector;
use crate::models::job::Payload;
use crate::models::{ApplicationState, Duration, HorizonError, HorizonResult};
use crate::queue::Queue;
use crate::registry::{Job, JobRegistry};
use crate::supervisor::Supervisor;

/// Per-dispatch overrides: route to another queue, delay availability, or
/// attach extra tags on top of the job type's own.
#[derive(Clone, Debug, Default)]
pub struct DispatchOptions {
    pub queue: Option<String>,
    pub delay: Option<Duration>,
    pub tags: Vec<String>,
}

/// The job-queue runtime. Construct one per process, register job types,
/// dispatch from anywhere, and run [`start`](Self::start) to consume.
pub struct Horizon {
    config: Config,
    conn: ConnectionManager,
    registry: Arc<JobRegistry>,
    queue: Queue,
    failed: FailedJobStore,
    metrics: MetricsCollector,
    supervisors: HashMap<String, Arc<Supervisor>>,
    started: Mutex<bool>,
    shutdown: Mutex<CancellationToken>,
}

impl Horizon {
    /// Validate the config, connect to Redis and build all components in
    /// leaves-first order. No background work starts until
    /// [`start`](Self::start).
    pub async fn new(mut config: Config) -> HorizonResult<Horizon> {
        config.validate()?;

        let client = redis::Client::open(config.redis_url()).map_err(|err| {
            HorizonError::NotConfigured(format!("invalid redis settings: {}", err))
        })?;
        let conn = ConnectionManager::new(client).await?;
        let keys = KeyBuilder::new(config.prefix.clone());

        let registry = Arc::new(JobRegistry::new());
        let queue = Queue::new(conn.clone(), keys.clone());
        let failed = FailedJobStore::new(conn.clone(), keys.clone(), queue.clone());
        let metrics = MetricsCollector::new(conn.clone(), keys.clone(), queue.clone(), failed.clone());

        let mut supervisors = HashMap::new();
        for (name, supervisor_config) in &config.supervisors {
            supervisors.insert(
                name.clone(),
                Arc::new(Supervisor::new(
                    supervisor_config.clone(),
                    queue.clone(),
                    failed.clone(),
                    registry.clone(),
                    metrics.clone(),
                    conn.clone(),
                    keys.clone(),
                )),
            );
        }

        Ok(Horizon {
            config,
            conn,
            registry,
            queue,
            failed,
            metrics,
            supervisors,
            started: Mutex::new(false),
            shutdown: Mutex::new(CancellationToken::new()),
        })
    }

    /// Register a job type so workers can hydrate its payloads.
    pub fn register<J: Job>(&self) {
        self.registry.register::<J>();
    }

    /// Queue a job with its type-declared routing.
    pub async fn dispatch<J: Job>(&self, job: &J) -> HorizonResult<String> {
        self.dispatch_with(job, DispatchOptions::default()).await
    }

    /// Queue a job with per-dispatch overrides; returns the new job id.
    pub async fn dispatch_with<J: Job>(&self, job: &J, options: DispatchOptions) -> HorizonResult<String> {
        let queue_name = options
            .queue
            .unwrap_or_else(|| Payload::default_queue::<J>());
        let mut payload = Payload::build(job, &queue_name)?;
        payload.tags.extend(options.tags);
        let id = payload.id.clone();

        match options.delay {
            Some(delay) if !delay.is_zero() => self.queue.later(&queue_name, payload, delay).await?,
            _ => self.queue.push(&queue_name, &payload).await?,
        }
        Ok(id)
    }

    /// Start everything and block until [`stop`](Self::stop) is called.
    ///
    /// Boot order: ping Redis (fail fast), metric tickers, HTTP server,
    /// then one task per supervisor. Shutdown runs in reverse user-facing
    /// order: HTTP first, then supervisors (each drains its workers), then
    /// the background tickers.
    pub async fn start(&self) -> HorizonResult<()> {
        {
            let mut started = self.started.lock().expect("start flag lock poisoned");
            if *started {
                return Err(HorizonError::conflict("horizon already started"));
            }
            *started = true;
        }
        let shutdown = CancellationToken::new();
        *self.shutdown.lock().expect("shutdown token lock poisoned") = shutdown.clone();

        let mut conn = self.conn.clone();
        if let Err(err) = redis::cmd("PING").query_async::<_, String>(&mut conn).await {
            *self.started.lock().expect("start flag lock poisoned") = false;
            return Err(HorizonError::Redis(err));
        }
        info!("starting horizon (prefix '{}')", self.config.prefix);

        let tickers = CancellationToken::new();
        let mut ticker_handles = Vec::new();
        if self.config.metrics.enabled {
            ticker_handles.push(start_snapshot_ticker(
                self.metrics.clone(),
                self.config.metrics.snapshot_interval.as_std(),
                tickers.child_token(),
            ));
            ticker_handles.push(start_trim_ticker(
                self.metrics.clone(),
                self.config.metrics.retention_period.as_std(),
                tickers.child_token(),
            ));
        }

        let http = if self.config.http.enabled {
            match self.start_http() {
                Ok(http) => Some(http),
                Err(err) => {
                    tickers.cancel();
                    for join in ticker_handles {
                        let _ = join.await;
                    }
                    *self.started.lock().expect("start flag lock poisoned") = false;
                    return Err(err);
                }
            }
        } else {
            None
        };

        let supervisors_token = CancellationToken::new();
        let mut supervisor_handles = Vec::new();
        for (name, supervisor) in &self.supervisors {
            let supervisor = supervisor.clone();
            let name = name.clone();
            let token = supervisors_token.child_token();
            supervisor_handles.push(tokio::spawn(async move {
                if let Err(err) = supervisor.start(token).await {
                    error!("[supervisor:{}] exited with error: {}", name, err);
                }
            }));
        }

        shutdown.cancelled().await;
        info!("stopping horizon");

        if let Some((handle, join)) = http {
            handle.stop(true).await;
            let _ = join.await;
        }
        supervisors_token.cancel();
        for join in supervisor_handles {
            let _ = join.await;
        }

        tickers.cancel();
        for join in ticker_handles {
            let _ = join.await;
        }

        *self.started.lock().expect("start flag lock poisoned") = false;
        info!("horizon stopped");
        Ok(())
    }

    /// Signal a running [`start`](Self::start) to shut down. Stopping a
    /// coordinator that is not running is an error.
    pub fn stop(&self) -> HorizonResult<()> {
        let started = self.started.lock().expect("start flag lock poisoned");
        if !*started {
            return Err(HorizonError::conflict("horizon not started"));
        }
        self.shutdown
            .lock()
            .expect("shutdown token lock poisoned")
            .cancel();
        Ok(())
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn failed_jobs(&self) -> &FailedJobStore {
        &self.failed
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn supervisors(&self) -> &HashMap<String, Arc<Supervisor>> {
        &self.supervisors
    }

    pub fn supervisor(&self, name: &str) -> HorizonResult<Arc<Supervisor>> {
        self.supervisors
            .get(name)
            .cloned()
            .ok_or_else(|| HorizonError::NoSuchSupervisor(name.to_owned()))
    }

    pub async fn pause_supervisor(&self, name: &str) -> HorizonResult<()> {
        self.supervisor(name)?.pause().await
    }

    pub async fn continue_supervisor(&self, name: &str) -> HorizonResult<()> {
        self.supervisor(name)?.resume().await
    }

    pub async fn scale_supervisor(&self, name: &str, workers: usize) -> HorizonResult<()> {
        self.supervisor(name)?.scale(workers).await
    }

    fn start_http(&self) -> HorizonResult<(actix_web::dev::ServerHandle, JoinHandle<()>)> {
        let state = ApplicationState {
            conn: self.conn.clone(),
            config: self.config.clone(),
            queue: self.queue.clone(),
            failed: self.failed.clone(),
            metrics: self.metrics.clone(),
            supervisors: self.supervisors.clone(),
        };
        let data = web::Data::new(state);
        let base_path = self.config.http.base_path.clone();
        let addr = self.config.http.addr.clone();

        let server = HttpServer::new(move || {
            App::new()
                .app_data(data.clone())
                .service(handlers::scope(&base_path))
        })
        .disable_signals()
        .bind(&addr)
        .map_err(|err| HorizonError::NotConfigured(format!("failed to bind {}: {}", addr, err)))?
        .run();

        let handle = server.handle();
        let join = tokio::spawn(async move {
            if let Err(err) = server.await {
                error!("http server error: {}", err);
            }
        });
        info!(
            "http surface listening on {}{}",
            self.config.http.addr, self.config.http.base_path
        );
        Ok((handle, join))
    }
}

fn start_snapshot_ticker(
    metrics: MetricsCollector,
    period: std::time::Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    info!(
        "taking metric snapshots every {}",
        humantime::format_duration(period)
    );
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(err) = metrics.take_snapshot().await {
                        error!("failed to take metrics snapshot: {}", err);
                    }
                }
            }
        }
    })
}

fn start_trim_ticker(
    metrics: MetricsCollector,
    retention: std::time::Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    info!(
        "trimming snapshots hourly to a retention of {}",
        humantime::format_duration(retention)
    );
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60 * 60));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(err) = metrics.trim_snapshots(retention).await {
                        error!("failed to trim metric snapshots: {}", err);
                    }
                }
            }
        }
    })
}
