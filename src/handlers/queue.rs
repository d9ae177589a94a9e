//! Handler for the `/api/queues` endpoint.

use actix_web::{web, HttpRequest, HttpResponse, ResponseError};
use log::error;

use crate::handlers::auth;
use crate::models::ApplicationState;

/// Handles `GET /api/queues`: metrics for every known queue.
pub async fn index(req: HttpRequest, data: web::Data<ApplicationState>) -> HttpResponse {
    if let Err(response) = auth::check(&req, &data.config.http.auth) {
        return response;
    }

    match data.metrics.all_queues_metrics().await {
        Ok(queues) => HttpResponse::Ok().json(serde_json::json!({ "queues": queues })),
        Err(err) => {
            error!("failed to collect queue metrics: {}", err);
            err.error_response()
        }
    }
}
