use crate::error::ApiError;
use crate::models::AppState;
use axum::Json;
use axum::Router;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::Query;

pub mod appointment_routes;
pub mod auth_routes;
pub mod campaign_routes;
pub mod dashboard_routes;
pub mod home_routes;
pub mod message_routes;
pub mod patient_routes;
pub mod radar_routes;

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1/auth", auth_routes::router())
        .nest("/api/v1/patients", patient_routes::router())
        .nest("/api/v1/radar", radar_routes::router())
        .nest("/api/v1/campaigns", campaign_routes::router())
        .nest("/api/v1/appointments", appointment_routes::router())
        .nest("/api/v1/messages", message_routes::router())
        .nest("/api/v1", dashboard_routes::router())
        .merge(home_routes::router())
        .with_state(state)
}

/// Unwraps a JSON body, turning axum's plain-text rejection into the usual
/// `{ success: false, error }` payload.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| ApiError::validation(format!("Invalid request body: {}", e.body_text())))
}

pub(crate) fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    query
        .map(|Query(q)| q)
        .map_err(|e| ApiError::validation(format!("Invalid query: {}", e.body_text())))
}
