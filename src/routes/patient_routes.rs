use axum::{
    Json, Router,
    extract::State,
    extract::rejection::{JsonRejection, QueryRejection},
    extract::Query,
    routing::get,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::gateway::PatientFilter;
use crate::middleware::auth_context::AuthContext;
use crate::models::{ApiOk, AppState, NewPatient, PatientRow};
use crate::routes::{json_body, query_params};

const DEFAULT_LIST_LIMIT: i64 = 100;
const MAX_LIST_LIMIT: i64 = 500;
const DEFAULT_LANGUAGE: &str = "fr";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePatientRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub language: Option<String>,
    pub practitioner_id: Option<Uuid>,
    pub accepts_short_notice: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientListQuery {
    pub short_notice: Option<bool>,
    pub limit: Option<i64>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_patients).post(create_patient))
}

fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::validation(format!("{field} is required")))
}

fn optional(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// GET /api/v1/patients
pub async fn list_patients(
    State(state): State<AppState>,
    auth: AuthContext,
    query: Result<Query<PatientListQuery>, QueryRejection>,
) -> Result<Json<ApiOk<Vec<PatientRow>>>, ApiError> {
    let q = query_params(query)?;
    let profile = auth.profile(&state).await?;

    let limit = q.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    if !(1..=MAX_LIST_LIMIT).contains(&limit) {
        return Err(ApiError::validation(format!(
            "limit must be between 1 and {MAX_LIST_LIMIT}"
        )));
    }

    let rows = state
        .gateway
        .list_patients(
            profile.clinic_id,
            &PatientFilter {
                ids: None,
                accepts_short_notice: q.short_notice,
                limit: Some(limit),
            },
        )
        .await?;

    Ok(Json(ApiOk::new(rows)))
}

/// POST /api/v1/patients
pub async fn create_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    payload: Result<Json<CreatePatientRequest>, JsonRejection>,
) -> Result<Json<ApiOk<PatientRow>>, ApiError> {
    let profile = auth.profile(&state).await?;
    let req = json_body(payload)?;

    let first_name = required(req.first_name, "firstName")?;
    let last_name = required(req.last_name, "lastName")?;
    let phone = required(req.phone, "phone")?;

    if let Some(practitioner_id) = req.practitioner_id {
        let practitioners = state.gateway.practitioner_names(profile.clinic_id).await?;
        if !practitioners.contains_key(&practitioner_id) {
            return Err(ApiError::validation("Unknown practitioner"));
        }
    }

    let row = state
        .gateway
        .insert_patient(&NewPatient {
            clinic_id: profile.clinic_id,
            practitioner_id: req.practitioner_id,
            first_name,
            last_name,
            phone: Some(phone),
            email: optional(req.email),
            language: Some(optional(req.language).unwrap_or_else(|| DEFAULT_LANGUAGE.to_string())),
            accepts_short_notice: req.accepts_short_notice.unwrap_or(false),
        })
        .await
        .map_err(|e| ApiError::persistence("Failed to create patient", e))?;

    tracing::info!(patient_id = %row.id, clinic_id = %row.clinic_id, "patient created");

    Ok(Json(ApiOk::new(row)))
}
