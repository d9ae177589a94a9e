//! Job trait, per-type capabilities and the factory registry used to
//! reconstruct user jobs from stored payloads.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::models::job::{Payload, DEFAULT_MAX_ATTEMPTS, DEFAULT_QUEUE};
use crate::models::{DateTime, Duration, HorizonError, HorizonResult};

/// Optional capabilities a job type may declare; anything left `None` falls
/// back to the runtime defaults when a payload is built.
#[derive(Clone, Debug, Default)]
pub struct JobSpec {
    /// Route to this queue instead of `"default"`.
    pub queue: Option<String>,

    /// Tags applied to every dispatch of this job type.
    pub tags: Vec<String>,

    /// Attempt ceiling (default 3).
    pub max_attempts: Option<u32>,

    /// Base delay before a failed run is re-queued (default 5s).
    pub retry_delay: Option<Duration>,

    /// Per-run deadline (default 60s).
    pub timeout: Option<Duration>,
}

/// A queueable job.
///
/// The job body is serialised into the payload's `data` field on dispatch
/// and restored into a fresh instance before `handle` runs, so implementors
/// must round-trip through serde.
#[async_trait]
pub trait Job: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Unique job type name; the registry key.
    const NAME: &'static str;

    /// Per-type capability overrides.
    fn spec() -> JobSpec {
        JobSpec::default()
    }

    /// Execute the job logic.
    async fn handle(&self) -> anyhow::Result<()>;
}

/// Object-safe view of a hydrated job, ready to execute.
#[async_trait]
pub trait RunnableJob: Send + Sync {
    async fn run(&self) -> anyhow::Result<()>;
}

#[async_trait]
impl<J: Job> RunnableJob for J {
    async fn run(&self) -> anyhow::Result<()> {
        self.handle().await
    }
}

type Factory = Box<dyn Fn(&Value) -> HorizonResult<Box<dyn RunnableJob>> + Send + Sync>;

/// Maps job type names to decode-and-run factories.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Factory>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        JobRegistry {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Register a job type, keyed by `J::NAME`. Re-registering a name
    /// replaces the previous factory.
    pub fn register<J: Job>(&self) {
        let factory: Factory = Box::new(|data| {
            let job: J = serde_json::from_value(data.clone())
                .map_err(|err| HorizonError::Parse(err.to_string()))?;
            Ok(Box::new(job))
        });
        self.jobs
            .write()
            .expect("job registry lock poisoned")
            .insert(J::NAME.to_owned(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.jobs
            .read()
            .expect("job registry lock poisoned")
            .contains_key(name)
    }

    /// Get all registered job names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .jobs
            .read()
            .expect("job registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Construct a fresh job instance from a stored payload.
    pub fn hydrate(&self, payload: &Payload) -> HorizonResult<Box<dyn RunnableJob>> {
        let jobs = self.jobs.read().expect("job registry lock poisoned");
        let factory = jobs
            .get(&payload.name)
            .ok_or_else(|| HorizonError::NotRegistered(payload.name.clone()))?;
        factory(&payload.data)
    }
}

impl Payload {
    /// Build a payload for a job: fresh id, `created_at = available_at = now`,
    /// runtime defaults, then the job type's declared capabilities on top.
    pub fn build<J: Job>(job: &J, queue: &str) -> HorizonResult<Payload> {
        let spec = J::spec();
        let now = DateTime::now();
        Ok(Payload {
            id: Uuid::new_v4().to_string(),
            name: J::NAME.to_owned(),
            queue: queue.to_owned(),
            data: serde_json::to_value(job)?,
            attempts: 0,
            max_attempts: spec.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            tags: spec.tags,
            created_at: now,
            available_at: now,
            reserved_at: None,
            timeout: spec.timeout.unwrap_or_else(crate::models::job::default_timeout),
            retry_delay: spec
                .retry_delay
                .unwrap_or_else(crate::models::job::default_retry_delay),
            metadata: serde_json::Map::new(),
        })
    }

    /// Queue a job type routes to when the dispatch doesn't name one.
    pub fn default_queue<J: Job>() -> String {
        J::spec().queue.unwrap_or_else(|| DEFAULT_QUEUE.to_owned())
    }
}
