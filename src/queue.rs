//! Redis queue operations: push, delayed scheduling, reservation, release
//! and deletion across the pending/delayed/reserved structures.

use log::{debug, warn};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::keys::KeyBuilder;
use crate::models::job::Payload;
use crate::models::{DateTime, Duration, HorizonError, HorizonResult};

/// TTL applied to job records on every write.
const JOB_TTL_SECS: u64 = 24 * 60 * 60;

/// Interface to the per-queue structures in Redis.
///
/// A job id lives in at most one of *pending* (list), *delayed* (zset scored
/// by availability time) or *reserved* (zset scored by reservation expiry);
/// the serialized payload lives in its own key with a 24h TTL. Ids whose
/// record has expired are skipped wherever they surface.
#[derive(Clone)]
pub struct Queue {
    conn: ConnectionManager,
    keys: KeyBuilder,
}

impl Queue {
    pub fn new(conn: ConnectionManager, keys: KeyBuilder) -> Self {
        Queue { conn, keys }
    }

    /// Append a job to the tail of a queue, recording the queue name, the
    /// job record and any tag index entries in one pipeline.
    pub async fn push(&self, queue: &str, payload: &Payload) -> HorizonResult<()> {
        let data = payload.encode()?;
        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        pipe.sadd(self.keys.queues(), queue)
            .ignore()
            .set_ex(self.keys.job(&payload.id), data, JOB_TTL_SECS)
            .ignore()
            .rpush(self.keys.queue(queue), &payload.id)
            .ignore();
        for tag in &payload.tags {
            pipe.sadd(self.keys.jobs_by_tag(tag), &payload.id).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;

        debug!("[job:{}] pushed to queue '{}'", payload.id, queue);
        Ok(())
    }

    /// Schedule a job for execution no earlier than `delay` from now. The id
    /// goes to the delayed set instead of the pending list.
    pub async fn later(&self, queue: &str, mut payload: Payload, delay: Duration) -> HorizonResult<()> {
        payload.available_at = DateTime::now() + delay;
        let data = payload.encode()?;
        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        pipe.sadd(self.keys.queues(), queue)
            .ignore()
            .set_ex(self.keys.job(&payload.id), data, JOB_TTL_SECS)
            .ignore()
            .zadd(
                self.keys.queue_delayed(queue),
                &payload.id,
                payload.available_at.unix(),
            )
            .ignore();
        for tag in &payload.tags {
            pipe.sadd(self.keys.jobs_by_tag(tag), &payload.id).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;

        debug!(
            "[job:{}] delayed on queue '{}' until {}",
            payload.id, queue, payload.available_at
        );
        Ok(())
    }

    /// Reserve the next job from the given queues, scanning them in order.
    ///
    /// Newly-available delayed jobs are migrated first. On a hit the job's
    /// `attempts` is incremented, `reserved_at` stamped, and the id is added
    /// to the reserved set scored by `now + timeout`. Fails with
    /// [`HorizonError::QueueEmpty`] if no queue yielded a job.
    pub async fn pop(&self, queues: &[String]) -> HorizonResult<Payload> {
        for queue in queues {
            self.migrate_delayed_jobs(queue).await?;
        }

        let mut conn = self.conn.clone();
        for queue in queues {
            loop {
                let id: Option<String> = conn.lpop(self.keys.queue(queue), None).await?;
                let id = match id {
                    Some(id) => id,
                    None => break,
                };

                // record may have expired or been deleted since the id was queued
                let data: Option<Vec<u8>> = conn.get(self.keys.job(&id)).await?;
                let data = match data {
                    Some(data) => data,
                    None => {
                        debug!("[job:{}] popped from '{}' but record is gone, skipping", id, queue);
                        continue;
                    }
                };
                let mut payload = match Payload::decode(&data) {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!("[job:{}] undecodable record, skipping: {}", id, err);
                        continue;
                    }
                };

                let now = DateTime::now();
                payload.reserved_at = Some(now);
                payload.attempts += 1;

                let expiry = now.unix() + payload.timeout.as_secs() as i64;
                let data = payload.encode()?;
                redis::pipe()
                    .set_ex(self.keys.job(&id), data, JOB_TTL_SECS)
                    .ignore()
                    .zadd(self.keys.queue_reserved(queue), &id, expiry)
                    .ignore()
                    .query_async::<_, ()>(&mut conn)
                    .await?;

                debug!("[job:{}] reserved from '{}' (attempt {})", id, queue, payload.attempts);
                return Ok(payload);
            }
        }

        Err(HorizonError::QueueEmpty)
    }

    /// Move delayed jobs whose availability time has passed onto the pending
    /// list. Safe to run concurrently from many workers: an id is only
    /// pushed by whichever caller won the ZREM.
    async fn migrate_delayed_jobs(&self, queue: &str) -> HorizonResult<()> {
        let mut conn = self.conn.clone();
        let now = DateTime::now().unix();

        let ready: Vec<String> = conn
            .zrangebyscore(self.keys.queue_delayed(queue), "-inf", now)
            .await?;
        for id in ready {
            let removed: i64 = conn.zrem(self.keys.queue_delayed(queue), &id).await?;
            if removed > 0 {
                conn.rpush::<_, _, ()>(self.keys.queue(queue), &id).await?;
                debug!("[job:{}] migrated from delayed to '{}'", id, queue);
            }
        }
        Ok(())
    }

    /// Return a reserved job to its queue for a later retry: immediately
    /// (tail of pending) when `delay` is zero, via the delayed set otherwise.
    pub async fn release(&self, queue: &str, payload: Payload, delay: Duration) -> HorizonResult<()> {
        let mut conn = self.conn.clone();
        conn.zrem::<_, _, ()>(self.keys.queue_reserved(queue), &payload.id)
            .await?;

        if !delay.is_zero() {
            return self.later(queue, payload, delay).await;
        }
        conn.rpush::<_, _, ()>(self.keys.queue(queue), &payload.id)
            .await?;
        Ok(())
    }

    /// Remove a job from every queue structure, delete its record and drop
    /// its tag index entries.
    pub async fn delete(&self, queue: &str, payload: &Payload) -> HorizonResult<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.lrem(self.keys.queue(queue), 0, &payload.id)
            .ignore()
            .zrem(self.keys.queue_delayed(queue), &payload.id)
            .ignore()
            .zrem(self.keys.queue_reserved(queue), &payload.id)
            .ignore()
            .del(self.keys.job(&payload.id))
            .ignore();
        for tag in &payload.tags {
            pipe.srem(self.keys.jobs_by_tag(tag), &payload.id).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    /// Number of jobs currently pending on a queue.
    pub async fn size(&self, queue: &str) -> HorizonResult<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(self.keys.queue(queue)).await?)
    }

    /// Number of jobs currently delayed on a queue.
    pub async fn delayed_size(&self, queue: &str) -> HorizonResult<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.zcard(self.keys.queue_delayed(queue)).await?)
    }

    /// Number of jobs currently reserved from a queue.
    pub async fn reserved_size(&self, queue: &str) -> HorizonResult<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.zcard(self.keys.queue_reserved(queue)).await?)
    }

    /// Drop the pending/delayed/reserved structures of a queue. Job records
    /// are left to TTL out.
    pub async fn clear(&self, queue: &str) -> HorizonResult<()> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .del(self.keys.queue(queue))
            .ignore()
            .del(self.keys.queue_delayed(queue))
            .ignore()
            .del(self.keys.queue_reserved(queue))
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Get all known queue names, sorted.
    pub async fn queues(&self) -> HorizonResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut names: Vec<String> = conn.smembers(self.keys.queues()).await?;
        names.sort();
        Ok(names)
    }

    /// Decode up to `limit` pending payloads, oldest first.
    pub async fn pending_jobs(&self, queue: &str, limit: i64) -> HorizonResult<Vec<Payload>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn
            .lrange(self.keys.queue(queue), 0, (limit - 1) as isize)
            .await?;
        self.jobs_by_ids(&ids).await
    }

    /// Decode up to `limit` delayed payloads, soonest-available first.
    pub async fn delayed_jobs(&self, queue: &str, limit: i64) -> HorizonResult<Vec<Payload>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn
            .zrange(self.keys.queue_delayed(queue), 0, (limit - 1) as isize)
            .await?;
        self.jobs_by_ids(&ids).await
    }

    /// Batch-fetch job records; ids with a missing or undecodable record are
    /// skipped.
    async fn jobs_by_ids(&self, ids: &[String]) -> HorizonResult<Vec<Payload>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for id in ids {
            pipe.get(self.keys.job(id));
        }
        let records: Vec<Option<Vec<u8>>> = pipe.query_async(&mut conn).await?;

        let mut payloads = Vec::with_capacity(ids.len());
        for data in records.into_iter().flatten() {
            match Payload::decode(&data) {
                Ok(payload) => payloads.push(payload),
                Err(err) => warn!("skipping undecodable job record: {}", err),
            }
        }
        Ok(payloads)
    }
}
