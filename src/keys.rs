//! Redis key naming for everything the runtime stores.
//!
//! All storage code goes through [`KeyBuilder`]; no key literal appears
//! anywhere else, so a single prefix isolates one horizon deployment from
//! anything else living on the same Redis server.

/// Builds Redis keys of the form `<prefix>:<kind>[:<arg>...]`.
#[derive(Clone, Debug)]
pub struct KeyBuilder {
    prefix: String,
}

impl KeyBuilder {
    pub fn new<S: Into<String>>(prefix: S) -> Self {
        KeyBuilder {
            prefix: prefix.into(),
        }
    }

    /// Set of all known queue names.
    pub fn queues(&self) -> String {
        format!("{}:queues", self.prefix)
    }

    /// List of pending job ids for a queue (FIFO, right-push / left-pop).
    pub fn queue(&self, name: &str) -> String {
        format!("{}:queue:{}", self.prefix, name)
    }

    /// Sorted set of delayed job ids, scored by availability time.
    pub fn queue_delayed(&self, name: &str) -> String {
        format!("{}:queue:{}:delayed", self.prefix, name)
    }

    /// Sorted set of reserved job ids, scored by reservation expiry.
    pub fn queue_reserved(&self, name: &str) -> String {
        format!("{}:queue:{}:reserved", self.prefix, name)
    }

    /// Serialized job payload, kept with a 24h TTL from last write.
    pub fn job(&self, id: &str) -> String {
        format!("{}:job:{}", self.prefix, id)
    }

    /// Sorted set of failed job ids, scored by failure time.
    pub fn failed_jobs(&self) -> String {
        format!("{}:failed_jobs", self.prefix)
    }

    /// Serialized failed job record, kept with a 7 day TTL.
    pub fn failed_job(&self, id: &str) -> String {
        format!("{}:failed_job:{}", self.prefix, id)
    }

    /// Capped list of recently completed/failed jobs.
    pub fn recent_jobs(&self) -> String {
        format!("{}:recent_jobs", self.prefix)
    }

    /// Sorted set of metric snapshots, scored by snapshot timestamp.
    pub fn metrics_snapshots(&self) -> String {
        format!("{}:metrics:snapshots", self.prefix)
    }

    /// Hash of per-queue counters.
    pub fn metrics_queue(&self, queue: &str) -> String {
        format!("{}:metrics:queue:{}", self.prefix, queue)
    }

    /// Hash of per-job-type counters.
    pub fn metrics_job(&self, name: &str) -> String {
        format!("{}:metrics:job:{}", self.prefix, name)
    }

    /// Minute-bucketed throughput counters for completed jobs.
    pub fn queue_throughput(&self, queue: &str) -> String {
        format!("{}:metrics:queue:{}:throughput", self.prefix, queue)
    }

    /// Minute-bucketed throughput counters for failed jobs.
    pub fn queue_failed_throughput(&self, queue: &str) -> String {
        format!("{}:metrics:queue:{}:failed_throughput", self.prefix, queue)
    }

    /// Set of registered supervisor names.
    pub fn supervisors(&self) -> String {
        format!("{}:supervisors", self.prefix)
    }

    /// JSON record for a single supervisor.
    pub fn supervisor(&self, name: &str) -> String {
        format!("{}:supervisor:{}", self.prefix, name)
    }

    /// Set of worker ids owned by a supervisor.
    pub fn supervisor_workers(&self, name: &str) -> String {
        format!("{}:supervisor:{}:workers", self.prefix, name)
    }

    /// JSON heartbeat record for a single worker, kept with a 5 minute TTL.
    pub fn worker(&self, id: &str) -> String {
        format!("{}:worker:{}", self.prefix, id)
    }

    /// Set of job ids carrying a given tag.
    pub fn jobs_by_tag(&self, tag: &str) -> String {
        format!("{}:tag:{}:jobs", self.prefix, tag)
    }
}
