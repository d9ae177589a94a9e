//! Handlers for `/api/supervisors`: the supervisor table plus the
//! pause/continue/scale control actions.

use actix_web::{web, HttpRequest, HttpResponse, ResponseError};
use log::error;
use serde::Deserialize;

use crate::handlers::auth;
use crate::models::metrics::{SupervisorInfo, SupervisorsResponse};
use crate::models::{ApplicationState, HorizonError};
use crate::supervisor::Supervisor;

#[derive(Deserialize)]
pub struct NameRequest {
    name: String,
}

#[derive(Deserialize)]
pub struct ScaleRequest {
    name: String,
    workers: usize,
}

/// Handles `GET /api/supervisors`: status, worker count, queues and balance
/// mode of every supervisor in this process.
pub async fn index(req: HttpRequest, data: web::Data<ApplicationState>) -> HttpResponse {
    if let Err(response) = auth::check(&req, &data.config.http.auth) {
        return response;
    }

    let mut supervisors: Vec<SupervisorInfo> = data
        .supervisors
        .values()
        .map(|s| SupervisorInfo {
            name: s.name().to_owned(),
            status: s.status().to_string(),
            workers: s.worker_count(),
            queues: s.config().queues.clone(),
            balance: s.config().balance.to_string(),
        })
        .collect();
    supervisors.sort_by(|a, b| a.name.cmp(&b.name));

    HttpResponse::Ok().json(SupervisorsResponse { supervisors })
}

fn lookup<'a>(
    data: &'a ApplicationState,
    name: &str,
) -> Result<&'a std::sync::Arc<Supervisor>, HttpResponse> {
    data.supervisors
        .get(name)
        .ok_or_else(|| HorizonError::NoSuchSupervisor(name.to_owned()).error_response())
}

/// Handles `POST /api/supervisors/pause` with body `{"name": ...}`.
pub async fn pause(
    req: HttpRequest,
    body: web::Json<NameRequest>,
    data: web::Data<ApplicationState>,
) -> HttpResponse {
    if let Err(response) = auth::check(&req, &data.config.http.auth) {
        return response;
    }
    let supervisor = match lookup(&data, &body.name) {
        Ok(supervisor) => supervisor,
        Err(response) => return response,
    };

    match supervisor.pause().await {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({ "success": true })),
        Err(err) => {
            error!("[supervisor:{}] failed to pause: {}", body.name, err);
            err.error_response()
        }
    }
}

/// Handles `POST /api/supervisors/continue` with body `{"name": ...}`.
pub async fn resume(
    req: HttpRequest,
    body: web::Json<NameRequest>,
    data: web::Data<ApplicationState>,
) -> HttpResponse {
    if let Err(response) = auth::check(&req, &data.config.http.auth) {
        return response;
    }
    let supervisor = match lookup(&data, &body.name) {
        Ok(supervisor) => supervisor,
        Err(response) => return response,
    };

    match supervisor.resume().await {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({ "success": true })),
        Err(err) => {
            error!("[supervisor:{}] failed to resume: {}", body.name, err);
            err.error_response()
        }
    }
}

/// Handles `POST /api/supervisors/scale` with body `{"name": ..., "workers": n}`.
/// The requested count is clamped to the supervisor's process bounds.
pub async fn scale(
    req: HttpRequest,
    body: web::Json<ScaleRequest>,
    data: web::Data<ApplicationState>,
) -> HttpResponse {
    if let Err(response) = auth::check(&req, &data.config.http.auth) {
        return response;
    }
    let supervisor = match lookup(&data, &body.name) {
        Ok(supervisor) => supervisor,
        Err(response) => return response,
    };

    match supervisor.scale(body.workers).await {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "workers": supervisor.worker_count(),
        })),
        Err(err) => {
            error!("[supervisor:{}] failed to scale: {}", body.name, err);
            err.error_response()
        }
    }
}
