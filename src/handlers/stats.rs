//! Handlers for the `/api/stats` and `/api/workload` endpoints.

use actix_web::{web, HttpRequest, HttpResponse, ResponseError};
use log::error;

use crate::handlers::auth;
use crate::models::metrics::{QueueWorkload, WorkloadResponse};
use crate::models::ApplicationState;

/// Handles `GET /api/stats`: global stats plus per-queue metrics.
pub async fn index(req: HttpRequest, data: web::Data<ApplicationState>) -> HttpResponse {
    if let Err(response) = auth::check(&req, &data.config.http.auth) {
        return response;
    }

    match data.metrics.stats().await {
        Ok(mut stats) => {
            stats.total_workers = data.supervisors.values().map(|s| s.worker_count()).sum();
            HttpResponse::Ok().json(stats)
        }
        Err(err) => {
            error!("failed to collect stats: {}", err);
            err.error_response()
        }
    }
}

/// Handles `GET /api/workload`: per-queue depth, estimated wait and live
/// worker count.
pub async fn workload(req: HttpRequest, data: web::Data<ApplicationState>) -> HttpResponse {
    if let Err(response) = auth::check(&req, &data.config.http.auth) {
        return response;
    }

    let metrics = match data.metrics.all_queues_metrics().await {
        Ok(metrics) => metrics,
        Err(err) => {
            error!("failed to collect workload: {}", err);
            return err.error_response();
        }
    };

    let mut queues = Vec::with_capacity(metrics.len());
    for m in metrics {
        let workers = data
            .supervisors
            .values()
            .filter(|s| s.config().queues.contains(&m.queue))
            .map(|s| s.worker_count())
            .sum();
        let length = m.pending_jobs + m.delayed_jobs;
        let wait = if m.jobs_per_minute > 0.0 && length > 0 {
            let secs = (length as f64 / m.jobs_per_minute * 60.0) as u64;
            humantime::format_duration(std::time::Duration::from_secs(secs)).to_string()
        } else {
            "0s".to_owned()
        };
        queues.push(QueueWorkload {
            name: m.queue,
            length,
            wait,
            workers,
        });
    }

    HttpResponse::Ok().json(WorkloadResponse { queues })
}
