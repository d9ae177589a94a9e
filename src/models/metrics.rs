//! Metric aggregates and the JSON bodies served by the HTTP surface.

use serde::{Deserialize, Serialize};

use super::job::RecentJob;
use super::DateTime;

/// Jobs processed over the trailing windows of the throughput buckets.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Throughput {
    pub minute: i64,
    pub hour: i64,
}

/// Point-in-time view of a single queue.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct QueueMetrics {
    pub queue: String,
    pub total_processed: i64,
    pub total_failed: i64,
    pub pending_jobs: i64,
    pub delayed_jobs: i64,
    pub reserved_jobs: i64,
    pub last_runtime_ns: u64,
    pub jobs_per_minute: f64,
    /// `failed / (processed + failed) * 100`, 0 until anything was processed.
    pub fail_rate: f64,
    pub throughput: Throughput,
}

/// Counters kept per job type.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct JobMetrics {
    pub job_name: String,
    pub total_runs: i64,
    pub total_failed: i64,
    pub last_runtime_ns: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime>,
}

/// A timestamped aggregate of queue metrics, stored in the snapshot set.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Snapshot {
    pub timestamp: DateTime,
    pub total_pending: i64,
    pub total_failed: i64,
    pub jobs_per_minute: f64,
    pub queues: Vec<QueueMetrics>,
}

/// Body of `GET /api/stats`.
#[derive(Clone, Debug, Serialize)]
pub struct StatsResponse {
    pub status: String,
    pub jobs_per_minute: f64,
    pub total_processed: i64,
    pub total_failed: i64,
    pub total_pending: i64,
    pub total_workers: usize,
    pub queues: Vec<QueueMetrics>,
    pub updated_at: DateTime,
}

/// Body of `GET /api/workload`.
#[derive(Clone, Debug, Serialize)]
pub struct WorkloadResponse {
    pub queues: Vec<QueueWorkload>,
}

#[derive(Clone, Debug, Serialize)]
pub struct QueueWorkload {
    pub name: String,
    /// Pending plus delayed jobs.
    pub length: i64,
    /// Estimated drain time at the current per-minute throughput.
    pub wait: String,
    /// Live workers across supervisors serving this queue.
    pub workers: usize,
}

/// Body of `GET /api/supervisors`.
#[derive(Clone, Debug, Serialize)]
pub struct SupervisorsResponse {
    pub supervisors: Vec<SupervisorInfo>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SupervisorInfo {
    pub name: String,
    pub status: String,
    pub workers: usize,
    pub queues: Vec<String>,
    pub balance: String,
}

/// Body of `GET /api/jobs/recent`.
#[derive(Clone, Debug, Serialize)]
pub struct RecentJobsResponse {
    pub jobs: Vec<RecentJob>,
}

/// Body of `GET /api/metrics/snapshots`.
#[derive(Clone, Debug, Serialize)]
pub struct SnapshotsResponse {
    pub snapshots: Vec<Snapshot>,
}
