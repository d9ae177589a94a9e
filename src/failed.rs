//! Persistence, listing, retry and flush of failed jobs.

use log::{info, warn};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::keys::KeyBuilder;
use crate::models::job::{FailedJob, Payload};
use crate::models::{DateTime, HorizonError, HorizonResult};
use crate::queue::Queue;

/// TTL applied to failed job records.
const FAILED_JOB_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Store of jobs that exhausted their retries, kept for 7 days with the
/// exception text that killed them.
#[derive(Clone)]
pub struct FailedJobStore {
    conn: ConnectionManager,
    keys: KeyBuilder,
    queue: Queue,
}

impl FailedJobStore {
    pub fn new(conn: ConnectionManager, keys: KeyBuilder, queue: Queue) -> Self {
        FailedJobStore { conn, keys, queue }
    }

    /// Persist a terminally-failed job: write the failed record, index it by
    /// failure time, drop the reservation and delete the live job record,
    /// all in one pipeline.
    pub async fn store(&self, payload: &Payload, exception: &str) -> HorizonResult<()> {
        let failed = FailedJob {
            id: payload.id.clone(),
            queue: payload.queue.clone(),
            payload: payload.clone(),
            exception: exception.to_owned(),
            failed_at: DateTime::now(),
        };
        let data = serde_json::to_vec(&failed)?;

        let mut conn = self.conn.clone();
        redis::pipe()
            .set_ex(self.keys.failed_job(&payload.id), data, FAILED_JOB_TTL_SECS)
            .ignore()
            .zadd(self.keys.failed_jobs(), &payload.id, failed.failed_at.unix())
            .ignore()
            .zrem(self.keys.queue_reserved(&payload.queue), &payload.id)
            .ignore()
            .del(self.keys.job(&payload.id))
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;

        info!("[job:{}] stored as failed: {}", payload.id, exception);
        Ok(())
    }

    /// List failed jobs, most recent first. Records missing their data (e.g.
    /// TTL'd out from under the index) are skipped. `limit <= 0` lists all.
    pub async fn all(&self, limit: i64) -> HorizonResult<Vec<FailedJob>> {
        let mut conn = self.conn.clone();
        let stop = if limit <= 0 { -1 } else { limit - 1 };
        let ids: Vec<String> = conn
            .zrevrange(self.keys.failed_jobs(), 0, stop as isize)
            .await?;
        self.failed_jobs_by_ids(&ids).await
    }

    /// Fetch a single failed job by id.
    pub async fn find(&self, id: &str) -> HorizonResult<FailedJob> {
        let mut conn = self.conn.clone();
        let data: Option<Vec<u8>> = conn.get(self.keys.failed_job(id)).await?;
        match data {
            Some(data) => Ok(serde_json::from_slice(&data)?),
            None => Err(HorizonError::NoSuchFailedJob(id.to_owned())),
        }
    }

    /// Re-queue a failed job: reset its attempt counter and reservation,
    /// push it back to its original queue, then drop it from the failed set.
    /// A push failure leaves the failed record intact.
    pub async fn retry(&self, id: &str) -> HorizonResult<()> {
        let mut failed = self.find(id).await?;
        failed.payload.attempts = 0;
        failed.payload.reserved_at = None;

        self.queue.push(&failed.queue, &failed.payload).await?;
        self.forget(id).await?;

        info!("[job:{}] retried onto queue '{}'", id, failed.queue);
        Ok(())
    }

    /// Retry every failed job, oldest first; returns how many were
    /// successfully re-queued. Partial success is permitted.
    pub async fn retry_all(&self) -> HorizonResult<usize> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.zrange(self.keys.failed_jobs(), 0, -1).await?;

        let mut count = 0;
        for id in &ids {
            match self.retry(id).await {
                Ok(()) => count += 1,
                Err(err) => warn!("[job:{}] retry failed: {}", id, err),
            }
        }
        Ok(count)
    }

    /// Remove a failed job without retrying it.
    pub async fn forget(&self, id: &str) -> HorizonResult<()> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .zrem(self.keys.failed_jobs(), id)
            .ignore()
            .del(self.keys.failed_job(id))
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Purge the failed set and every failed record.
    pub async fn flush(&self) -> HorizonResult<()> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.zrange(self.keys.failed_jobs(), 0, -1).await?;
        if ids.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.del(self.keys.failed_job(id)).ignore();
        }
        pipe.del(self.keys.failed_jobs()).ignore();
        pipe.query_async::<_, ()>(&mut conn).await?;

        info!("flushed {} failed jobs", ids.len());
        Ok(())
    }

    /// Number of failed jobs currently retained.
    pub async fn count(&self) -> HorizonResult<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.zcard(self.keys.failed_jobs()).await?)
    }

    /// List failed jobs that came from a single queue. `limit <= 0` lists all.
    pub async fn by_queue(&self, queue: &str, limit: i64) -> HorizonResult<Vec<FailedJob>> {
        let all = self.all(-1).await?;
        let mut filtered: Vec<FailedJob> = all.into_iter().filter(|job| job.queue == queue).collect();
        if limit > 0 && filtered.len() > limit as usize {
            filtered.truncate(limit as usize);
        }
        Ok(filtered)
    }

    async fn failed_jobs_by_ids(&self, ids: &[String]) -> HorizonResult<Vec<FailedJob>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for id in ids {
            pipe.get(self.keys.failed_job(id));
        }
        let records: Vec<Option<Vec<u8>>> = pipe.query_async(&mut conn).await?;

        let mut jobs = Vec::with_capacity(ids.len());
        for data in records.into_iter().flatten() {
            match serde_json::from_slice(&data) {
                Ok(job) => jobs.push(job),
                Err(err) => warn!("skipping undecodable failed job record: {}", err),
            }
        }
        Ok(jobs)
    }
}
