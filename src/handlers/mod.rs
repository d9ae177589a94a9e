//! HTTP handlers for the control/inspection surface, mounted under the
//! configurable base path.

pub mod auth;
pub mod health;
pub mod job;
pub mod metrics;
pub mod queue;
pub mod stats;
pub mod supervisor;

use actix_web::{web, Scope};

/// Build the route tree for the API. Reads are GET, actions are POST; a
/// known path with the wrong method gets a 405.
pub fn scope(base_path: &str) -> Scope {
    web::scope(base_path.trim_end_matches('/'))
        .service(web::resource("/api/stats").route(web::get().to(stats::index)))
        .service(web::resource("/api/queues").route(web::get().to(queue::index)))
        .service(web::resource("/api/workload").route(web::get().to(stats::workload)))
        .service(web::resource("/api/supervisors").route(web::get().to(supervisor::index)))
        .service(web::resource("/api/supervisors/pause").route(web::post().to(supervisor::pause)))
        .service(web::resource("/api/supervisors/continue").route(web::post().to(supervisor::resume)))
        .service(web::resource("/api/supervisors/scale").route(web::post().to(supervisor::scale)))
        .service(web::resource("/api/jobs/recent").route(web::get().to(job::recent)))
        .service(web::resource("/api/jobs/failed").route(web::get().to(job::failed)))
        .service(web::resource("/api/jobs/retry").route(web::post().to(job::retry)))
        .service(web::resource("/api/jobs/retry-all").route(web::post().to(job::retry_all)))
        .service(web::resource("/api/jobs/flush").route(web::post().to(job::flush)))
        .service(web::resource("/api/metrics/snapshots").route(web::get().to(metrics::snapshots)))
        .service(web::resource("/api/health").route(web::get().to(health::index)))
}
