use axum::{Json, Router, routing::get};
use serde::Serialize;

use crate::models::{ApiOk, AppState};

#[derive(Serialize)]
pub struct HealthData {
    pub status: &'static str,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

pub async fn health() -> Json<ApiOk<HealthData>> {
    Json(ApiOk::new(HealthData { status: "ok" }))
}
