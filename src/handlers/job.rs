//! Handlers for `/api/jobs/*`: recent and failed listings plus the
//! retry/retry-all/flush actions.

use actix_web::{web, HttpRequest, HttpResponse, ResponseError};
use log::error;
use serde::Deserialize;

use crate::handlers::auth;
use crate::models::metrics::RecentJobsResponse;
use crate::models::{ApplicationState, HorizonError};

#[derive(Deserialize)]
pub struct LimitQuery {
    limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct RetryRequest {
    id: String,
}

/// Handles `GET /api/jobs/recent?limit=`: the tail of terminal outcomes.
pub async fn recent(
    req: HttpRequest,
    query: web::Query<LimitQuery>,
    data: web::Data<ApplicationState>,
) -> HttpResponse {
    if let Err(response) = auth::check(&req, &data.config.http.auth) {
        return response;
    }
    let limit = query.limit.unwrap_or(50);

    match data.metrics.recent_jobs(limit).await {
        Ok(jobs) => HttpResponse::Ok().json(RecentJobsResponse { jobs }),
        Err(err) => {
            error!("failed to list recent jobs: {}", err);
            err.error_response()
        }
    }
}

/// Handles `GET /api/jobs/failed?limit=`: failed jobs, most recent first.
pub async fn failed(
    req: HttpRequest,
    query: web::Query<LimitQuery>,
    data: web::Data<ApplicationState>,
) -> HttpResponse {
    if let Err(response) = auth::check(&req, &data.config.http.auth) {
        return response;
    }
    let limit = query.limit.unwrap_or(50);

    match data.failed.all(limit).await {
        Ok(jobs) => {
            let total_count = data.failed.count().await.unwrap_or(0);
            HttpResponse::Ok().json(serde_json::json!({
                "jobs": jobs,
                "total_count": total_count,
            }))
        }
        Err(err) => {
            error!("failed to list failed jobs: {}", err);
            err.error_response()
        }
    }
}

/// Handles `POST /api/jobs/retry` with body `{"id": ...}`: re-queue one
/// failed job.
pub async fn retry(
    req: HttpRequest,
    body: web::Json<RetryRequest>,
    data: web::Data<ApplicationState>,
) -> HttpResponse {
    if let Err(response) = auth::check(&req, &data.config.http.auth) {
        return response;
    }

    match data.failed.retry(&body.id).await {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({ "success": true })),
        Err(err @ HorizonError::NoSuchFailedJob(_)) => err.error_response(),
        Err(err) => {
            error!("[job:{}] failed to retry: {}", body.id, err);
            err.error_response()
        }
    }
}

/// Handles `POST /api/jobs/retry-all`: re-queue every failed job.
pub async fn retry_all(req: HttpRequest, data: web::Data<ApplicationState>) -> HttpResponse {
    if let Err(response) = auth::check(&req, &data.config.http.auth) {
        return response;
    }

    match data.failed.retry_all().await {
        Ok(count) => HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "count": count,
        })),
        Err(err) => {
            error!("failed to retry all failed jobs: {}", err);
            err.error_response()
        }
    }
}

/// Handles `POST /api/jobs/flush`: purge the failed-job store.
pub async fn flush(req: HttpRequest, data: web::Data<ApplicationState>) -> HttpResponse {
    if let Err(response) = auth::check(&req, &data.config.http.auth) {
        return response;
    }

    match data.failed.flush().await {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({ "success": true })),
        Err(err) => {
            error!("failed to flush failed jobs: {}", err);
            err.error_response()
        }
    }
}
