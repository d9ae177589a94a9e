//! Handler for the `/api/health` endpoint.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Serialize;

use crate::handlers::auth;
use crate::models::ApplicationState;

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum Liveness {
    Healthy,
    Unhealthy,
}

/// Runtime health: whether the Redis store is reachable, plus the live
/// worker topology of this process.
#[derive(Serialize)]
struct HealthReport {
    status: Liveness,

    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,

    supervisors: usize,
    workers: usize,

    /// Known queue count; absent when the store could not be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    queues: Option<usize>,
}

impl HealthReport {
    fn healthy(supervisors: usize, workers: usize, queues: usize) -> Self {
        HealthReport {
            status: Liveness::Healthy,
            error: None,
            supervisors,
            workers,
            queues: Some(queues),
        }
    }

    fn unhealthy<S: Into<String>>(err: S, supervisors: usize, workers: usize) -> Self {
        HealthReport {
            status: Liveness::Unhealthy,
            error: Some(err.into()),
            supervisors,
            workers,
            queues: None,
        }
    }
}

/// Handles `GET /api/health`: pings Redis, counts the known queues and
/// reports them alongside this process's supervisors and workers.
pub async fn index(req: HttpRequest, data: web::Data<ApplicationState>) -> HttpResponse {
    if let Err(response) = auth::check(&req, &data.config.http.auth) {
        return response;
    }

    let supervisors = data.supervisors.len();
    let workers = data.supervisors.values().map(|s| s.worker_count()).sum();

    let mut conn = data.conn.clone();
    let report = match redis::cmd("PING").query_async::<_, String>(&mut conn).await {
        Ok(reply) if reply == "PONG" => match data.queue.queues().await {
            Ok(names) => HealthReport::healthy(supervisors, workers, names.len()),
            Err(err) => HealthReport::unhealthy(err.to_string(), supervisors, workers),
        },
        Ok(reply) => HealthReport::unhealthy(
            format!("unexpected PING reply from Redis: {}", reply),
            supervisors,
            workers,
        ),
        Err(err) => HealthReport::unhealthy(err.to_string(), supervisors, workers),
    };
    HttpResponse::Ok().json(report)
}
