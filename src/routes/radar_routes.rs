use axum::{
    Json, Router,
    extract::rejection::{JsonRejection, QueryRejection},
    extract::{Query, State},
    routing::{get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::ensure_not_dentist;
use crate::error::ApiError;
use crate::middleware::auth_context::AuthContext;
use crate::models::{ApiOk, AppState, CountResponse};
use crate::reactivation::classifier::{
    DEFAULT_LOOKBACK_MONTHS, SELECTABLE_LOOKBACK_MONTHS, SilentPatient, find_silent_patients,
};
use crate::reactivation::dispatch::queue_reactivation_messages;
use crate::reactivation::parse_patient_ids;
use crate::routes::{json_body, query_params};

#[derive(Debug, Deserialize)]
pub struct RadarQuery {
    pub months: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RadarData {
    pub lookback_months: u32,
    pub patients: Vec<SilentPatient>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactivateRequest {
    pub patient_ids: Option<Vec<String>>,
    pub message_template: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/silent-patients", get(silent_patients))
        .route("/reactivate", post(reactivate))
}

/// GET /api/v1/radar/silent-patients?months=12
pub async fn silent_patients(
    State(state): State<AppState>,
    auth: AuthContext,
    query: Result<Query<RadarQuery>, QueryRejection>,
) -> Result<Json<ApiOk<RadarData>>, ApiError> {
    let q = query_params(query)?;
    let profile = auth.profile(&state).await?;
    ensure_not_dentist(&profile)?;

    let months = q.months.unwrap_or(DEFAULT_LOOKBACK_MONTHS);
    if !SELECTABLE_LOOKBACK_MONTHS.contains(&months) {
        return Err(ApiError::validation("months must be one of 12, 18 or 24"));
    }

    let patients =
        find_silent_patients(state.gateway.as_ref(), profile.clinic_id, months, Utc::now()).await?;

    Ok(Json(ApiOk::new(RadarData {
        lookback_months: months,
        patients,
    })))
}

/// POST /api/v1/radar/reactivate
pub async fn reactivate(
    State(state): State<AppState>,
    auth: AuthContext,
    payload: Result<Json<ReactivateRequest>, JsonRejection>,
) -> Result<Json<CountResponse>, ApiError> {
    let profile = auth.profile(&state).await?;
    let req = json_body(payload)?;
    let patient_ids = parse_patient_ids(req.patient_ids.as_deref(), "No patient selected")?;

    let count = queue_reactivation_messages(
        state.gateway.as_ref(),
        profile.clinic_id,
        &patient_ids,
        req.message_template.as_deref(),
    )
    .await?;

    Ok(Json(CountResponse {
        success: true,
        count,
        message: format!("{count} reactivation message(s) created and queued"),
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use chrono::{Duration, Utc};
    use serde_json::json;
    use uuid::Uuid;

    use crate::gateway::{DataGateway, MessageQuery};
    use crate::models::{AppointmentStatus, PatientRow, Role};
    use crate::routes::test_support::TestApp;

    fn patient(clinic_id: Uuid, first: &str, last: &str) -> PatientRow {
        PatientRow {
            id: Uuid::new_v4(),
            clinic_id,
            practitioner_id: None,
            first_name: first.to_string(),
            last_name: last.to_string(),
            phone: Some("+41790000000".to_string()),
            email: None,
            language: None,
            accepts_short_notice: false,
        }
    }

    #[tokio::test]
    async fn radar_lists_silent_patients_then_reactivates_them() {
        let app = TestApp::new();
        let (_, token) = app.login_as(Role::Assistant).await;
        let dr = app.gateway.add_practitioner(app.clinic_id, "Keller").unwrap();
        let a = app.gateway.add_patient(patient(app.clinic_id, "Alice", "Zimmermann")).unwrap();
        let b = app.gateway.add_patient(patient(app.clinic_id, "Bruno", "Aebi")).unwrap();
        let d = app.gateway.add_patient(patient(app.clinic_id, "Diane", "Muller")).unwrap();
        let now = Utc::now();
        app.gateway
            .add_appointment(app.clinic_id, dr, a.id, now - Duration::days(396), AppointmentStatus::Completed)
            .unwrap();
        app.gateway
            .add_appointment(app.clinic_id, dr, d.id, now - Duration::days(61), AppointmentStatus::Completed)
            .unwrap();

        let (status, body) = app
            .request("GET", "/api/v1/radar/silent-patients", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["lookbackMonths"], 12);
        let patients = body["data"]["patients"].as_array().unwrap();
        assert_eq!(patients.len(), 2);
        assert_eq!(patients[0]["id"], b.id.to_string());
        assert!(patients[0]["monthsSinceVisit"].is_null());
        assert_eq!(patients[1]["id"], a.id.to_string());
        assert_eq!(patients[1]["monthsSinceVisit"], 13);

        let (status, body) = app
            .request(
                "POST",
                "/api/v1/radar/reactivate",
                Some(&token),
                Some(json!({ "patientIds": [a.id, b.id] })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["count"], 2);

        let rows = app
            .gateway
            .list_messages(app.clinic_id, &MessageQuery { limit: 10, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|m| m.body.starts_with("Hello Alice,")));
        assert!(rows.iter().any(|m| m.body.starts_with("Hello Bruno,")));
    }

    #[tokio::test]
    async fn radar_rejects_dentists_and_odd_windows() {
        let app = TestApp::new();
        let (_, dentist) = app.login_as(Role::Dentist).await;
        let (status, _) = app
            .request("GET", "/api/v1/radar/silent-patients", Some(&dentist), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (_, owner) = app.login_as(Role::Owner).await;
        let (status, _) = app
            .request("GET", "/api/v1/radar/silent-patients?months=6", Some(&owner), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, body) = app
            .request("GET", "/api/v1/radar/silent-patients?months=24", Some(&owner), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["lookbackMonths"], 24);
    }

    #[tokio::test]
    async fn reactivate_rejects_empty_and_foreign_ids() {
        let app = TestApp::new();
        let (_, token) = app.login_as(Role::Owner).await;

        let (status, body) = app
            .request("POST", "/api/v1/radar/reactivate", Some(&token), Some(json!({ "patientIds": [] })))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No patient selected");

        let (status, _) = app
            .request(
                "POST",
                "/api/v1/radar/reactivate",
                Some(&token),
                Some(json!({ "patientIds": [Uuid::new_v4()] })),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn reactivate_requires_a_token() {
        let app = TestApp::new();
        let (status, _) = app
            .request("POST", "/api/v1/radar/reactivate", None, Some(json!({ "patientIds": [] })))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
