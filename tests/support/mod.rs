//! Test support: each test gets its own throwaway `redis-server` on a
//! random port, so every test starts against a clean database. Tests skip
//! themselves (with a notice) on machines without the `redis-server`
//! binary.

#![allow(dead_code)]

use std::net::TcpListener;
use std::process::{Child, Command, Stdio};

use redis::aio::ConnectionManager;

use horizon::failed::FailedJobStore;
use horizon::keys::KeyBuilder;
use horizon::metrics::MetricsCollector;
use horizon::queue::Queue;

pub const TEST_PREFIX: &str = "horizon_test";

pub struct TestContext {
    server: Child,
    pub port: u16,
    pub url: String,
}

impl TestContext {
    /// Start a private redis-server. Returns None when the binary is not
    /// installed.
    pub fn new() -> Option<TestContext> {
        let port = free_port()?;
        let server = Command::new("redis-server")
            .args([
                "--port",
                &port.to_string(),
                "--save",
                "",
                "--appendonly",
                "no",
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .ok()?;
        Some(TestContext {
            server,
            port,
            url: format!("redis://127.0.0.1:{}", port),
        })
    }

    pub async fn connection(&self) -> ConnectionManager {
        let client = redis::Client::open(self.url.as_str()).unwrap();
        for _ in 0..100 {
            if let Ok(conn) = ConnectionManager::new(client.clone()).await {
                return conn;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("redis-server did not accept connections at {}", self.url);
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        let _ = self.server.kill();
        let _ = self.server.wait();
    }
}

fn free_port() -> Option<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").ok()?;
    Some(listener.local_addr().ok()?.port())
}

pub struct TestHarness {
    pub ctx: TestContext,
    pub conn: ConnectionManager,
    pub keys: KeyBuilder,
    pub queue: Queue,
    pub failed: FailedJobStore,
    pub metrics: MetricsCollector,
}

/// Spin up a fresh redis-server and build the storage components against it.
pub async fn init() -> Option<TestHarness> {
    let ctx = match TestContext::new() {
        Some(ctx) => ctx,
        None => {
            eprintln!("skipping: redis-server binary not available");
            return None;
        }
    };
    let conn = ctx.connection().await;
    let keys = KeyBuilder::new(TEST_PREFIX);
    let queue = Queue::new(conn.clone(), keys.clone());
    let failed = FailedJobStore::new(conn.clone(), keys.clone(), queue.clone());
    let metrics = MetricsCollector::new(conn.clone(), keys.clone(), queue.clone(), failed.clone());
    Some(TestHarness {
        ctx,
        conn,
        keys,
        queue,
        failed,
        metrics,
    })
}
