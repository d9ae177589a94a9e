//! Integration tests for the queue storage protocol.
//!
//! Requires the `redis-server` binary; tests start/stop their own private
//! Redis instance and skip when it is unavailable.

mod support;

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use horizon::models::job::Payload;
use horizon::models::Duration;
use horizon::registry::{Job, JobSpec};
use horizon::HorizonError;

#[derive(Debug, Deserialize, Serialize)]
struct Probe {
    n: u32,
}

#[async_trait]
impl Job for Probe {
    const NAME: &'static str = "probe";

    async fn handle(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct Tagged;

#[async_trait]
impl Job for Tagged {
    const NAME: &'static str = "tagged";

    fn spec() -> JobSpec {
        JobSpec {
            tags: vec!["batch".to_owned(), "nightly".to_owned()],
            ..JobSpec::default()
        }
    }

    async fn handle(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

fn probe(n: u32) -> Payload {
    Payload::build(&Probe { n }, "q").unwrap()
}

fn probe_n(payload: &Payload) -> u32 {
    payload.data["n"].as_u64().unwrap() as u32
}

#[tokio::test]
async fn push_pop_fifo() {
    let Some(h) = support::init().await else { return };
    let queues = vec!["q".to_owned()];

    for n in 1..=3 {
        h.queue.push("q", &probe(n)).await.unwrap();
    }
    assert_eq!(h.queue.size("q").await.unwrap(), 3);
    assert_eq!(h.queue.queues().await.unwrap(), vec!["q"]);

    for expected in 1..=3 {
        let payload = h.queue.pop(&queues).await.unwrap();
        assert_eq!(probe_n(&payload), expected);
        assert_eq!(payload.attempts, 1);
        assert!(payload.reserved_at.is_some());
    }
    assert_eq!(h.queue.size("q").await.unwrap(), 0);
    assert_eq!(h.queue.reserved_size("q").await.unwrap(), 3);
    assert_eq!(h.queue.pop(&queues).await, Err(HorizonError::QueueEmpty));
}

#[tokio::test]
async fn pop_scans_queues_in_argument_order() {
    let Some(h) = support::init().await else { return };

    h.queue.push("low", &Payload::build(&Probe { n: 2 }, "low").unwrap()).await.unwrap();
    h.queue.push("high", &Payload::build(&Probe { n: 1 }, "high").unwrap()).await.unwrap();

    let queues = vec!["high".to_owned(), "low".to_owned()];
    assert_eq!(probe_n(&h.queue.pop(&queues).await.unwrap()), 1);
    assert_eq!(probe_n(&h.queue.pop(&queues).await.unwrap()), 2);
}

#[tokio::test]
async fn later_delays_availability() {
    let Some(h) = support::init().await else { return };
    let queues = vec!["q".to_owned()];

    h.queue.later("q", probe(1), Duration::from_secs(1)).await.unwrap();
    assert_eq!(h.queue.size("q").await.unwrap(), 0);
    assert_eq!(h.queue.delayed_size("q").await.unwrap(), 1);
    assert_eq!(h.queue.pop(&queues).await, Err(HorizonError::QueueEmpty));

    tokio::time::sleep(StdDuration::from_millis(1500)).await;
    let payload = h.queue.pop(&queues).await.unwrap();
    assert_eq!(payload.attempts, 1);
    assert_eq!(h.queue.delayed_size("q").await.unwrap(), 0);
}

#[tokio::test]
async fn release_requeues_at_tail() {
    let Some(h) = support::init().await else { return };
    let queues = vec!["q".to_owned()];

    h.queue.push("q", &probe(1)).await.unwrap();
    h.queue.push("q", &probe(2)).await.unwrap();

    let first = h.queue.pop(&queues).await.unwrap();
    assert_eq!(probe_n(&first), 1);
    h.queue.release("q", first, Duration::from_secs(0)).await.unwrap();
    assert_eq!(h.queue.reserved_size("q").await.unwrap(), 0);

    // retry goes behind the job that was already pending
    assert_eq!(probe_n(&h.queue.pop(&queues).await.unwrap()), 2);
    let retried = h.queue.pop(&queues).await.unwrap();
    assert_eq!(probe_n(&retried), 1);
    assert_eq!(retried.attempts, 2);
}

#[tokio::test]
async fn release_with_delay_goes_to_delayed() {
    let Some(h) = support::init().await else { return };
    let queues = vec!["q".to_owned()];

    h.queue.push("q", &probe(1)).await.unwrap();
    let payload = h.queue.pop(&queues).await.unwrap();
    h.queue.release("q", payload, Duration::from_secs(1)).await.unwrap();

    assert_eq!(h.queue.size("q").await.unwrap(), 0);
    assert_eq!(h.queue.delayed_size("q").await.unwrap(), 1);
    assert_eq!(h.queue.reserved_size("q").await.unwrap(), 0);

    tokio::time::sleep(StdDuration::from_millis(1500)).await;
    let retried = h.queue.pop(&queues).await.unwrap();
    assert_eq!(retried.attempts, 2);
}

#[tokio::test]
async fn delete_removes_all_traces() {
    let Some(h) = support::init().await else { return };
    let queues = vec!["default".to_owned()];

    let payload = Payload::build(&Tagged, "default").unwrap();
    h.queue.push("default", &payload).await.unwrap();

    let mut conn = h.conn.clone();
    let tagged: Vec<String> = conn.smembers(h.keys.jobs_by_tag("batch")).await.unwrap();
    assert_eq!(tagged, vec![payload.id.clone()]);

    let reserved = h.queue.pop(&queues).await.unwrap();
    h.queue.delete("default", &reserved).await.unwrap();

    assert_eq!(h.queue.size("default").await.unwrap(), 0);
    assert_eq!(h.queue.delayed_size("default").await.unwrap(), 0);
    assert_eq!(h.queue.reserved_size("default").await.unwrap(), 0);

    let record: Option<Vec<u8>> = conn.get(h.keys.job(&payload.id)).await.unwrap();
    assert!(record.is_none());
    let tagged: Vec<String> = conn.smembers(h.keys.jobs_by_tag("batch")).await.unwrap();
    assert!(tagged.is_empty());
}

#[tokio::test]
async fn clear_drops_all_structures() {
    let Some(h) = support::init().await else { return };
    let queues = vec!["q".to_owned()];

    h.queue.push("q", &probe(1)).await.unwrap();
    h.queue.push("q", &probe(2)).await.unwrap();
    h.queue.later("q", probe(3), Duration::from_secs(60)).await.unwrap();
    h.queue.pop(&queues).await.unwrap();

    h.queue.clear("q").await.unwrap();
    assert_eq!(h.queue.size("q").await.unwrap(), 0);
    assert_eq!(h.queue.delayed_size("q").await.unwrap(), 0);
    assert_eq!(h.queue.reserved_size("q").await.unwrap(), 0);
}

#[tokio::test]
async fn pop_skips_ids_with_expired_records() {
    let Some(h) = support::init().await else { return };
    let queues = vec!["q".to_owned()];

    let orphan = probe(1);
    h.queue.push("q", &orphan).await.unwrap();
    h.queue.push("q", &probe(2)).await.unwrap();

    let mut conn = h.conn.clone();
    conn.del::<_, ()>(h.keys.job(&orphan.id)).await.unwrap();

    let payload = h.queue.pop(&queues).await.unwrap();
    assert_eq!(probe_n(&payload), 2);
    assert_eq!(h.queue.pop(&queues).await, Err(HorizonError::QueueEmpty));
}

#[tokio::test]
async fn listing_pending_and_delayed() {
    let Some(h) = support::init().await else { return };

    h.queue.push("q", &probe(1)).await.unwrap();
    h.queue.push("q", &probe(2)).await.unwrap();
    h.queue.later("q", probe(3), Duration::from_secs(60)).await.unwrap();

    let pending = h.queue.pending_jobs("q", 10).await.unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(probe_n(&pending[0]), 1);
    assert_eq!(probe_n(&pending[1]), 2);

    let pending = h.queue.pending_jobs("q", 1).await.unwrap();
    assert_eq!(pending.len(), 1);

    let delayed = h.queue.delayed_jobs("q", 10).await.unwrap();
    assert_eq!(delayed.len(), 1);
    assert_eq!(probe_n(&delayed[0]), 3);
}

#[tokio::test]
async fn known_queues_are_sorted() {
    let Some(h) = support::init().await else { return };

    for name in ["zeta", "alpha", "mid"] {
        h.queue
            .push(name, &Payload::build(&Probe { n: 0 }, name).unwrap())
            .await
            .unwrap();
    }
    assert_eq!(h.queue.queues().await.unwrap(), vec!["alpha", "mid", "zeta"]);
}
