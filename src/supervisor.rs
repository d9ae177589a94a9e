//! Supervisor: owns a named pool of workers over a fixed set of queues,
//! with pause/resume, manual scaling and depth-based auto-balancing.

use std::sync::{Arc, Mutex};

use log::{debug, error, info, warn};
use redis::aio::ConnectionManager;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::failed::FailedJobStore;
use crate::keys::KeyBuilder;
use crate::metrics::MetricsCollector;
use crate::models::supervisor::{BalanceMode, SupervisorConfig, SupervisorStatus};
use crate::models::{DateTime, HorizonError, HorizonResult};
use crate::queue::Queue;
use crate::registry::JobRegistry;
use crate::worker::{Worker, WorkerOptions};

/// How often the auto balancer re-evaluates queue depth.
const BALANCE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3);

struct WorkerHandle {
    worker: Arc<Worker>,
    join: JoinHandle<()>,
}

#[derive(Clone)]
struct RunState {
    token: CancellationToken,
    exit_tx: mpsc::UnboundedSender<String>,
}

/// A policy-bearing owner of a worker pool.
///
/// Worker exits come back to the supervisor's run loop as messages; the loop
/// respawns a replacement whenever a live pool drops below `min_processes`.
pub struct Supervisor {
    config: SupervisorConfig,
    queue: Queue,
    failed: FailedJobStore,
    registry: Arc<JobRegistry>,
    metrics: MetricsCollector,
    conn: ConnectionManager,
    keys: KeyBuilder,
    status: watch::Sender<SupervisorStatus>,
    workers: Mutex<Vec<WorkerHandle>>,
    draining: Mutex<Vec<JoinHandle<()>>>,
    run_state: Mutex<Option<RunState>>,
}

impl Supervisor {
    pub fn new(
        config: SupervisorConfig,
        queue: Queue,
        failed: FailedJobStore,
        registry: Arc<JobRegistry>,
        metrics: MetricsCollector,
        conn: ConnectionManager,
        keys: KeyBuilder,
    ) -> Self {
        let (status, _) = watch::channel(SupervisorStatus::Stopped);
        Supervisor {
            config,
            queue,
            failed,
            registry,
            metrics,
            conn,
            keys,
            status,
            workers: Mutex::new(Vec::new()),
            draining: Mutex::new(Vec::new()),
            run_state: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn status(&self) -> SupervisorStatus {
        *self.status.borrow()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().expect("worker list lock poisoned").len()
    }

    /// Register the supervisor, spawn the initial pool and block until
    /// `shutdown` is cancelled or [`stop`](Self::stop) is called. The auto
    /// balancer runs inside this loop, as do respawns for workers that exit
    /// early.
    pub async fn start(self: Arc<Self>, shutdown: CancellationToken) -> HorizonResult<()> {
        let (token, mut exit_rx) = {
            let mut run_state = self.run_state.lock().expect("run state lock poisoned");
            if run_state.is_some() {
                return Err(HorizonError::conflict(format!(
                    "supervisor '{}' already started",
                    self.config.name
                )));
            }
            let token = CancellationToken::new();
            let (exit_tx, exit_rx) = mpsc::unbounded_channel();
            *run_state = Some(RunState {
                token: token.clone(),
                exit_tx,
            });
            (token, exit_rx)
        };
        self.status.send_replace(SupervisorStatus::Running);
        self.register().await;

        let initial = match self.config.balance {
            BalanceMode::Null => self.config.queues.len(),
            _ => self.config.min_processes,
        };
        for _ in 0..initial {
            self.spawn_worker();
        }
        info!(
            "[supervisor:{}] started with {} workers over {:?} (balance={})",
            self.config.name, initial, self.config.queues, self.config.balance
        );

        let mut balancer = if self.config.balance == BalanceMode::Auto {
            let mut interval = tokio::time::interval(BALANCE_INTERVAL);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            Some(interval)
        } else {
            None
        };

        loop {
            let tick = async {
                match balancer.as_mut() {
                    Some(interval) => {
                        interval.tick().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                _ = token.cancelled() => break,
                _ = shutdown.cancelled() => break,
                exited = exit_rx.recv() => match exited {
                    Some(id) => self.on_worker_exit(&id),
                    None => break,
                },
                _ = tick => self.balance().await,
            }
        }

        self.shutdown_workers().await;
        self.unregister().await;
        *self.run_state.lock().expect("run state lock poisoned") = None;
        self.status.send_replace(SupervisorStatus::Stopped);
        info!("[supervisor:{}] stopped", self.config.name);
        Ok(())
    }

    /// Signal the run loop to exit and wait until every worker has drained.
    pub async fn stop(&self) -> HorizonResult<()> {
        let token = {
            let run_state = self.run_state.lock().expect("run state lock poisoned");
            match run_state.as_ref() {
                Some(state) => state.token.clone(),
                None => {
                    return Err(HorizonError::conflict(format!(
                        "supervisor '{}' not started",
                        self.config.name
                    )))
                }
            }
        };
        token.cancel();

        let mut status = self.status.subscribe();
        let _ = status.wait_for(|s| *s == SupervisorStatus::Stopped).await;
        Ok(())
    }

    /// Pause every worker. In-flight jobs complete; no new pop occurs until
    /// [`resume`](Self::resume).
    pub async fn pause(&self) -> HorizonResult<()> {
        if self.status() != SupervisorStatus::Running {
            return Err(HorizonError::conflict(format!(
                "supervisor '{}' is not running",
                self.config.name
            )));
        }
        self.status.send_replace(SupervisorStatus::Paused);
        {
            let workers = self.workers.lock().expect("worker list lock poisoned");
            for handle in workers.iter() {
                handle.worker.pause();
            }
        }
        self.register().await;
        info!("[supervisor:{}] paused", self.config.name);
        Ok(())
    }

    /// Resume popping after a pause. A no-op when not paused.
    pub async fn resume(&self) -> HorizonResult<()> {
        if self.status() != SupervisorStatus::Paused {
            return Ok(());
        }
        self.status.send_replace(SupervisorStatus::Running);
        {
            let workers = self.workers.lock().expect("worker list lock poisoned");
            for handle in workers.iter() {
                handle.worker.resume();
            }
        }
        self.register().await;
        info!("[supervisor:{}] resumed", self.config.name);
        Ok(())
    }

    /// Adjust the pool to `count` workers, clamped to
    /// `[min_processes, max_processes]`. Shed workers drain their in-flight
    /// job before exiting.
    pub async fn scale(&self, count: usize) -> HorizonResult<()> {
        if self.run_state.lock().expect("run state lock poisoned").is_none() {
            return Err(HorizonError::conflict(format!(
                "supervisor '{}' not started",
                self.config.name
            )));
        }

        let target = count.clamp(self.config.min_processes, self.config.max_processes);
        let current = self.worker_count();
        if target > current {
            for _ in 0..target - current {
                self.spawn_worker();
            }
        } else if target < current {
            let shed: Vec<WorkerHandle> = {
                let mut workers = self.workers.lock().expect("worker list lock poisoned");
                let keep = workers.len() - (current - target);
                workers.split_off(keep)
            };
            let mut draining = self.draining.lock().expect("drain list lock poisoned");
            for handle in shed {
                handle.worker.stop();
                draining.push(handle.join);
            }
        }
        if target != current {
            info!(
                "[supervisor:{}] scaled {} -> {} workers",
                self.config.name, current, target
            );
        }
        Ok(())
    }

    fn spawn_worker(&self) {
        let run_state = {
            self.run_state
                .lock()
                .expect("run state lock poisoned")
                .clone()
        };
        let Some(run_state) = run_state else {
            return;
        };

        let options = WorkerOptions {
            queues: self.config.queues.clone(),
            sleep: self.config.sleep,
            max_jobs: self.config.max_jobs,
            max_time: self.config.max_time,
            supervisor: Some(self.config.name.clone()),
        };
        let worker = Arc::new(Worker::new(
            self.queue.clone(),
            self.failed.clone(),
            self.registry.clone(),
            self.metrics.clone(),
            self.conn.clone(),
            self.keys.clone(),
            options,
        ));
        if self.status() == SupervisorStatus::Paused {
            worker.pause();
        }

        let id = worker.id().to_owned();
        let log_id = id.clone();
        let token = run_state.token.child_token();
        let exit_tx = run_state.exit_tx;
        let task_worker = worker.clone();
        let join = tokio::spawn(async move {
            if let Err(err) = task_worker.run(token).await {
                error!("[worker:{}] exited with error: {}", log_id, err);
            }
            let _ = exit_tx.send(id);
        });

        self.workers
            .lock()
            .expect("worker list lock poisoned")
            .push(WorkerHandle { worker, join });
    }

    fn on_worker_exit(&self, id: &str) {
        let (removed, remaining) = {
            let mut workers = self.workers.lock().expect("worker list lock poisoned");
            let before = workers.len();
            workers.retain(|handle| handle.worker.id() != id);
            (before != workers.len(), workers.len())
        };
        if !removed {
            // a shed worker finishing its drain
            return;
        }

        if self.status() == SupervisorStatus::Running && remaining < self.config.min_processes {
            info!(
                "[supervisor:{}] worker exited below min_processes, respawning",
                self.config.name
            );
            self.spawn_worker();
        }
    }

    async fn balance(&self) {
        if self.status() != SupervisorStatus::Running {
            return;
        }

        let mut total_pending: i64 = 0;
        for queue in &self.config.queues {
            match self.queue.size(queue).await {
                Ok(size) => total_pending += size,
                Err(err) => warn!(
                    "[supervisor:{}] failed to read size of '{}': {}",
                    self.config.name, queue, err
                ),
            }
        }

        let current = self.worker_count();
        let target = balance_target(
            total_pending,
            self.config.min_processes,
            self.config.max_processes,
        );
        if target != current {
            debug!(
                "[supervisor:{}] balancing {} -> {} workers ({} pending)",
                self.config.name, current, target, total_pending
            );
            let _ = self.scale(target).await;
        }
    }

    async fn shutdown_workers(&self) {
        let handles: Vec<WorkerHandle> = {
            let mut workers = self.workers.lock().expect("worker list lock poisoned");
            workers.drain(..).collect()
        };
        for handle in &handles {
            handle.worker.stop();
        }
        for handle in handles {
            let _ = handle.join.await;
        }

        let draining: Vec<JoinHandle<()>> = {
            let mut draining = self.draining.lock().expect("drain list lock poisoned");
            draining.drain(..).collect()
        };
        for join in draining {
            let _ = join.await;
        }
    }

    async fn register(&self) {
        let record = serde_json::json!({
            "name": self.config.name,
            "status": self.status().as_ref(),
            "queues": self.config.queues,
            "balance": self.config.balance.as_ref(),
            "min_processes": self.config.min_processes,
            "max_processes": self.config.max_processes,
            "started_at": DateTime::now().unix(),
        });

        let mut conn = self.conn.clone();
        let result = redis::pipe()
            .sadd(self.keys.supervisors(), &self.config.name)
            .ignore()
            .set(self.keys.supervisor(&self.config.name), record.to_string())
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await;
        if let Err(err) = result {
            warn!(
                "[supervisor:{}] failed to write registration: {}",
                self.config.name, err
            );
        }
    }

    async fn unregister(&self) {
        let mut conn = self.conn.clone();
        let result = redis::pipe()
            .srem(self.keys.supervisors(), &self.config.name)
            .ignore()
            .del(self.keys.supervisor(&self.config.name))
            .ignore()
            .del(self.keys.supervisor_workers(&self.config.name))
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await;
        if let Err(err) = result {
            warn!(
                "[supervisor:{}] failed to remove registration: {}",
                self.config.name, err
            );
        }
    }
}

/// Step function mapping total pending depth to a target worker count.
/// Callers clamp the result to `[min, max]`.
pub(crate) fn balance_target(pending: i64, min: usize, max: usize) -> usize {
    match pending {
        0 => min,
        p if p < 100 => min + 1,
        p if p < 500 => (min + max) / 2,
        p if p < 1000 => max.saturating_sub(1),
        _ => max,
    }
}
