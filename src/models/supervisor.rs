//! Configuration and status types for supervisors and their workers.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::Duration;

/// Strategy a supervisor uses to decide its worker count.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceMode {
    /// Fixed worker count of `min_processes`.
    Simple,
    /// Worker count follows total pending depth across the supervised queues.
    Auto,
    /// One worker per declared queue.
    Null,
}

impl AsRef<str> for BalanceMode {
    fn as_ref(&self) -> &str {
        match self {
            BalanceMode::Simple => "simple",
            BalanceMode::Auto => "auto",
            BalanceMode::Null => "null",
        }
    }
}

impl fmt::Display for BalanceMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

/// Current state of a supervisor.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorStatus {
    Running,
    Paused,
    Stopped,
}

impl AsRef<str> for SupervisorStatus {
    fn as_ref(&self) -> &str {
        match self {
            SupervisorStatus::Running => "running",
            SupervisorStatus::Paused => "paused",
            SupervisorStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for SupervisorStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

/// Current state of a single worker loop.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Running,
    Paused,
    Stopping,
    Stopped,
}

impl AsRef<str> for WorkerStatus {
    fn as_ref(&self) -> &str {
        match self {
            WorkerStatus::Idle => "idle",
            WorkerStatus::Running => "running",
            WorkerStatus::Paused => "paused",
            WorkerStatus::Stopping => "stopping",
            WorkerStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

/// Policy for a named pool of workers over a fixed set of queues.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Supervisor name; filled from the config map key when loaded from file.
    pub name: String,

    /// Queues the pool consumes, in pop-priority order.
    pub queues: Vec<String>,

    pub balance: BalanceMode,

    pub min_processes: usize,
    pub max_processes: usize,

    /// Maximum lifetime of a single worker before it exits (0 = unlimited).
    pub max_time: Duration,

    /// Maximum outcomes a single worker handles before it exits (0 = unlimited).
    pub max_jobs: u64,

    /// Default attempt ceiling for jobs handled by this pool.
    pub tries: u32,

    /// Default per-run deadline for jobs handled by this pool.
    pub timeout: Duration,

    /// How long a worker sleeps after finding all its queues empty.
    pub sleep: Duration,
}

impl SupervisorConfig {
    pub fn new<S: Into<String>>(name: S) -> Self {
        SupervisorConfig {
            name: name.into(),
            ..SupervisorConfig::default()
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        SupervisorConfig {
            name: String::new(),
            queues: vec!["default".to_owned()],
            balance: BalanceMode::Simple,
            min_processes: 1,
            max_processes: 10,
            max_time: Duration::from_secs(0),
            max_jobs: 0,
            tries: 3,
            timeout: Duration::from_secs(60),
            sleep: Duration::from_secs(3),
        }
    }
}
