//! Counters, minute-bucketed throughput windows, point-in-time snapshots
//! and the recent-jobs ring.
//!
//! All writes here are best-effort: a metrics failure is logged and never
//! fails the job's primary path.

use std::collections::HashMap;

use log::warn;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::failed::FailedJobStore;
use crate::keys::KeyBuilder;
use crate::models::job::{Payload, RecentJob};
use crate::models::metrics::{JobMetrics, QueueMetrics, Snapshot, StatsResponse};
use crate::models::{DateTime, HorizonResult};
use crate::queue::Queue;

/// Throughput buckets older than this are pruned on every write.
const THROUGHPUT_WINDOW_SECS: i64 = 60 * 60;

/// Gathers and reads queue metrics stored alongside the queues themselves.
#[derive(Clone)]
pub struct MetricsCollector {
    conn: ConnectionManager,
    keys: KeyBuilder,
    queue: Queue,
    failed: FailedJobStore,
}

impl MetricsCollector {
    pub fn new(conn: ConnectionManager, keys: KeyBuilder, queue: Queue, failed: FailedJobStore) -> Self {
        MetricsCollector {
            conn,
            keys,
            queue,
            failed,
        }
    }

    /// Record a successful run: queue and job-type counters plus the
    /// queue's minute bucket.
    pub async fn record_job_processed(&self, queue: &str, payload: &Payload, runtime: std::time::Duration) {
        if let Err(err) = self.try_record(queue, payload, runtime, false).await {
            warn!("[queue:{}] failed to record processed-job metrics: {}", queue, err);
        }
    }

    /// Record a terminal failure: symmetric to the processed path, using the
    /// queue's failed-throughput buckets.
    pub async fn record_job_failed(&self, queue: &str, payload: &Payload, runtime: std::time::Duration) {
        if let Err(err) = self.try_record(queue, payload, runtime, true).await {
            warn!("[queue:{}] failed to record failed-job metrics: {}", queue, err);
        }
    }

    async fn try_record(
        &self,
        queue: &str,
        payload: &Payload,
        runtime: std::time::Duration,
        failed: bool,
    ) -> HorizonResult<()> {
        let now = DateTime::now();
        let minute = now.unix() / 60 * 60;
        let queue_key = self.keys.metrics_queue(queue);
        let job_key = self.keys.metrics_job(&payload.name);
        let throughput_key = if failed {
            self.keys.queue_failed_throughput(queue)
        } else {
            self.keys.queue_throughput(queue)
        };
        let runtime_ns = runtime.as_nanos() as u64;

        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        if failed {
            pipe.hincr(&queue_key, "total_failed", 1)
                .ignore()
                .hincr(&job_key, "total_failed", 1)
                .ignore();
        } else {
            pipe.hincr(&queue_key, "total_processed", 1)
                .ignore()
                .hset(&queue_key, "last_runtime_ns", runtime_ns)
                .ignore()
                .hincr(&job_key, "total_runs", 1)
                .ignore()
                .hset(&job_key, "last_run_at", now.unix())
                .ignore()
                .hset(&job_key, "last_runtime_ns", runtime_ns)
                .ignore();
        }
        pipe.zincr(&throughput_key, minute.to_string(), 1).ignore();
        pipe.query_async::<_, ()>(&mut conn).await?;

        self.prune_throughput(&throughput_key, minute - THROUGHPUT_WINDOW_SECS)
            .await
    }

    /// Drop buckets whose minute lies before `cutoff`, keeping every
    /// throughput set bounded to the 1-hour window.
    async fn prune_throughput(&self, key: &str, cutoff: i64) -> HorizonResult<()> {
        let mut conn = self.conn.clone();
        let entries: Vec<(String, f64)> = conn.zrange_withscores(key, 0, -1).await?;

        let mut stale = Vec::new();
        for (member, _count) in entries {
            if member.parse::<i64>().map(|m| m < cutoff).unwrap_or(true) {
                stale.push(member);
            }
        }
        if !stale.is_empty() {
            conn.zrem::<_, _, ()>(key, stale).await?;
        }
        Ok(())
    }

    /// Sum bucket counts for minutes at or after `since`.
    async fn throughput_since(&self, key: &str, since: i64) -> HorizonResult<i64> {
        let mut conn = self.conn.clone();
        let entries: Vec<(String, f64)> = conn.zrange_withscores(key, 0, -1).await?;

        let mut total = 0i64;
        for (member, count) in entries {
            if member.parse::<i64>().map(|m| m >= since).unwrap_or(false) {
                total += count as i64;
            }
        }
        Ok(total)
    }

    /// Read a queue's counters plus its live structure sizes and windowed
    /// throughput.
    pub async fn queue_metrics(&self, queue: &str) -> HorizonResult<QueueMetrics> {
        let mut conn = self.conn.clone();
        let data: HashMap<String, String> = conn.hgetall(self.keys.metrics_queue(queue)).await?;

        let mut metrics = QueueMetrics {
            queue: queue.to_owned(),
            ..QueueMetrics::default()
        };
        if let Some(v) = data.get("total_processed") {
            metrics.total_processed = v.parse().unwrap_or(0);
        }
        if let Some(v) = data.get("total_failed") {
            metrics.total_failed = v.parse().unwrap_or(0);
        }
        if let Some(v) = data.get("last_runtime_ns") {
            metrics.last_runtime_ns = v.parse().unwrap_or(0);
        }

        metrics.pending_jobs = self.queue.size(queue).await?;
        metrics.delayed_jobs = self.queue.delayed_size(queue).await?;
        metrics.reserved_jobs = self.queue.reserved_size(queue).await?;

        let now = DateTime::now().unix();
        let throughput_key = self.keys.queue_throughput(queue);
        metrics.throughput.minute = self.throughput_since(&throughput_key, now - 60).await?;
        metrics.throughput.hour = self
            .throughput_since(&throughput_key, now - THROUGHPUT_WINDOW_SECS)
            .await?;
        metrics.jobs_per_minute = metrics.throughput.minute as f64;

        if metrics.total_processed > 0 {
            metrics.fail_rate = metrics.total_failed as f64
                / (metrics.total_processed + metrics.total_failed) as f64
                * 100.0;
        }

        Ok(metrics)
    }

    /// Metrics for every known queue; queues that error while being read are
    /// skipped.
    pub async fn all_queues_metrics(&self) -> HorizonResult<Vec<QueueMetrics>> {
        let queues = self.queue.queues().await?;

        let mut metrics = Vec::with_capacity(queues.len());
        for queue in queues {
            match self.queue_metrics(&queue).await {
                Ok(qm) => metrics.push(qm),
                Err(err) => warn!("[queue:{}] failed to read metrics, skipping: {}", queue, err),
            }
        }
        Ok(metrics)
    }

    /// Read a job type's counters.
    pub async fn job_metrics(&self, name: &str) -> HorizonResult<JobMetrics> {
        let mut conn = self.conn.clone();
        let data: HashMap<String, String> = conn.hgetall(self.keys.metrics_job(name)).await?;

        let mut metrics = JobMetrics {
            job_name: name.to_owned(),
            ..JobMetrics::default()
        };
        if let Some(v) = data.get("total_runs") {
            metrics.total_runs = v.parse().unwrap_or(0);
        }
        if let Some(v) = data.get("total_failed") {
            metrics.total_failed = v.parse().unwrap_or(0);
        }
        if let Some(v) = data.get("last_runtime_ns") {
            metrics.last_runtime_ns = v.parse().unwrap_or(0);
        }
        if let Some(v) = data.get("last_run_at") {
            if let Ok(secs) = v.parse::<i64>() {
                metrics.last_run_at = Some(DateTime::from_unix(secs));
            }
        }
        Ok(metrics)
    }

    /// Aggregate all queues into a snapshot and append it to the snapshot
    /// set, scored by its timestamp.
    pub async fn take_snapshot(&self) -> HorizonResult<()> {
        let queues = self.all_queues_metrics().await?;

        let mut total_pending = 0i64;
        let mut total_failed = 0i64;
        let mut jobs_per_minute = 0f64;
        for qm in &queues {
            total_pending += qm.pending_jobs;
            total_failed += qm.total_failed;
            jobs_per_minute += qm.jobs_per_minute;
        }

        let snapshot = Snapshot {
            timestamp: DateTime::now(),
            total_pending,
            total_failed,
            jobs_per_minute,
            queues,
        };
        let data = serde_json::to_vec(&snapshot)?;

        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(self.keys.metrics_snapshots(), data, snapshot.timestamp.unix())
            .await?;
        Ok(())
    }

    /// Historical snapshots with timestamps in `[from, to]`, oldest first,
    /// at most `limit` of them.
    pub async fn snapshots(&self, from: i64, to: i64, limit: i64) -> HorizonResult<Vec<Snapshot>> {
        let mut conn = self.conn.clone();
        let raw: Vec<Vec<u8>> = conn
            .zrangebyscore_limit(self.keys.metrics_snapshots(), from, to, 0, limit as isize)
            .await?;

        let mut snapshots = Vec::with_capacity(raw.len());
        for data in raw {
            match serde_json::from_slice(&data) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(err) => warn!("skipping undecodable snapshot: {}", err),
            }
        }
        Ok(snapshots)
    }

    /// Drop snapshots older than the retention period.
    pub async fn trim_snapshots(&self, retention: std::time::Duration) -> HorizonResult<()> {
        let cutoff = DateTime::now().unix() - retention.as_secs() as i64;
        let mut conn = self.conn.clone();
        conn.zrembyscore::<_, _, _, ()>(self.keys.metrics_snapshots(), "-inf", cutoff)
            .await?;
        Ok(())
    }

    /// Tail of the recent-jobs ring, newest first.
    pub async fn recent_jobs(&self, limit: i64) -> HorizonResult<Vec<RecentJob>> {
        let mut conn = self.conn.clone();
        let raw: Vec<Vec<u8>> = conn
            .lrange(self.keys.recent_jobs(), 0, (limit - 1) as isize)
            .await?;

        let mut jobs = Vec::with_capacity(raw.len());
        for data in raw {
            match serde_json::from_slice(&data) {
                Ok(job) => jobs.push(job),
                Err(err) => warn!("skipping undecodable recent job: {}", err),
            }
        }
        Ok(jobs)
    }

    /// Fold every queue into the global stats view served by `/api/stats`.
    /// `total_workers` is left at zero; the HTTP layer fills it from the live
    /// supervisors.
    pub async fn stats(&self) -> HorizonResult<StatsResponse> {
        let queues = self.all_queues_metrics().await?;
        let failed_count = self.failed.count().await?;

        let mut total_processed = 0i64;
        let mut total_pending = 0i64;
        let mut jobs_per_minute = 0f64;
        for qm in &queues {
            total_processed += qm.total_processed;
            total_pending += qm.pending_jobs + qm.delayed_jobs + qm.reserved_jobs;
            jobs_per_minute += qm.jobs_per_minute;
        }

        Ok(StatsResponse {
            status: "running".to_owned(),
            jobs_per_minute,
            total_processed,
            total_failed: failed_count,
            total_pending,
            total_workers: 0,
            queues,
            updated_at: DateTime::now(),
        })
    }
}
