//! Redis-backed multi-queue job runtime.
//!
//! Producers register job types and dispatch them through [`Horizon`];
//! supervisor-managed worker pools reserve jobs, run them under per-job
//! deadlines and retry failures with backoff until they land in the
//! failed-job store. A metrics pipeline keeps counters, throughput windows
//! and point-in-time snapshots, all exposed over an authenticated HTTP
//! surface.

pub mod config;
pub mod failed;
pub mod handlers;
pub mod horizon;
pub mod keys;
pub mod metrics;
pub mod models;
pub mod queue;
pub mod registry;
pub mod supervisor;
pub mod worker;

pub use crate::config::Config;
pub use crate::horizon::{DispatchOptions, Horizon};
pub use crate::models::{HorizonError, HorizonResult};
pub use crate::registry::{Job, JobRegistry, JobSpec};
