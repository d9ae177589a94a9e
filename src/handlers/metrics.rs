//! Handler for the `/api/metrics/snapshots` endpoint.

use actix_web::{web, HttpRequest, HttpResponse, ResponseError};
use log::error;
use serde::Deserialize;

use crate::handlers::auth;
use crate::models::metrics::SnapshotsResponse;
use crate::models::{ApplicationState, DateTime};

#[derive(Deserialize)]
pub struct SnapshotsQuery {
    /// Unix seconds; defaults to an hour before `to`.
    from: Option<i64>,
    /// Unix seconds; defaults to now.
    to: Option<i64>,
    limit: Option<i64>,
}

/// Handles `GET /api/metrics/snapshots?from=&to=&limit=`: historical
/// point-in-time metrics, oldest first.
pub async fn snapshots(
    req: HttpRequest,
    query: web::Query<SnapshotsQuery>,
    data: web::Data<ApplicationState>,
) -> HttpResponse {
    if let Err(response) = auth::check(&req, &data.config.http.auth) {
        return response;
    }

    let to = query.to.unwrap_or_else(|| DateTime::now().unix());
    let from = query.from.unwrap_or(to - 3600);
    let limit = query.limit.unwrap_or(60);

    match data.metrics.snapshots(from, to, limit).await {
        Ok(snapshots) => HttpResponse::Ok().json(SnapshotsResponse { snapshots }),
        Err(err) => {
            error!("failed to list metric snapshots: {}", err);
            err.error_response()
        }
    }
}
