//! Defines server state passed to HTTP handlers by actix-web as required.

use std::collections::HashMap;
use std::sync::Arc;

use redis::aio::ConnectionManager;

use crate::config::Config;
use crate::failed::FailedJobStore;
use crate::metrics::MetricsCollector;
use crate::queue::Queue;
use crate::supervisor::Supervisor;

#[derive(Clone)]
pub struct ApplicationState {
    pub conn: ConnectionManager,
    pub config: Config,
    pub queue: Queue,
    pub failed: FailedJobStore,
    pub metrics: MetricsCollector,
    pub supervisors: HashMap<String, Arc<Supervisor>>,
}
