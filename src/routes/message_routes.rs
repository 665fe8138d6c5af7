use axum::{
    Json, Router,
    extract::rejection::QueryRejection,
    extract::{Query, State},
    routing::get,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::gateway::MessageQuery;
use crate::middleware::auth_context::AuthContext;
use crate::models::{ApiOk, AppState, MessageRow};
use crate::routes::query_params;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageLogQuery {
    pub patient_id: Option<Uuid>,
    pub appointment_id: Option<Uuid>,
    pub limit: Option<i64>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_messages))
}

/// GET /api/v1/messages?patientId=&appointmentId=&limit=20
pub async fn list_messages(
    State(state): State<AppState>,
    auth: AuthContext,
    query: Result<Query<MessageLogQuery>, QueryRejection>,
) -> Result<Json<ApiOk<Vec<MessageRow>>>, ApiError> {
    let q = query_params(query)?;
    let profile = auth.profile(&state).await?;

    let limit = q.limit.unwrap_or(20);
    if !(1..=100).contains(&limit) {
        return Err(ApiError::validation("limit must be between 1 and 100"));
    }

    let rows = state
        .gateway
        .list_messages(
            profile.clinic_id,
            &MessageQuery {
                patient_id: q.patient_id,
                appointment_id: q.appointment_id,
                limit,
            },
        )
        .await?;
    Ok(Json(ApiOk::new(rows)))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use uuid::Uuid;

    use crate::gateway::DataGateway;
    use crate::models::{MessageType, NewMessage, PatientRow, Role};
    use crate::routes::test_support::TestApp;

    fn patient(clinic_id: Uuid, first: &str) -> PatientRow {
        PatientRow {
            id: Uuid::new_v4(),
            clinic_id,
            practitioner_id: None,
            first_name: first.to_string(),
            last_name: "Test".to_string(),
            phone: Some("+41790000000".to_string()),
            email: None,
            language: None,
            accepts_short_notice: false,
        }
    }

    #[tokio::test]
    async fn log_is_scoped_to_the_callers_clinic() {
        let app = TestApp::new();
        let (_, token) = app.login_as(Role::Dentist).await;
        let other = app.gateway.add_clinic("Other", None).unwrap();
        let lea = app.gateway.add_patient(patient(app.clinic_id, "Lea")).unwrap();
        let marc = app.gateway.add_patient(patient(app.clinic_id, "Marc")).unwrap();
        let outsider = app.gateway.add_patient(patient(other.id, "Sam")).unwrap();
        let patient = lea.id;

        app.gateway
            .insert_messages(&[
                NewMessage::queued_sms(app.clinic_id, patient, None, MessageType::Reactivation, "a".into()),
                NewMessage::queued_sms(app.clinic_id, marc.id, None, MessageType::Other, "b".into()),
            ])
            .await
            .unwrap();
        app.gateway
            .insert_messages(&[NewMessage::queued_sms(
                other.id,
                outsider.id,
                None,
                MessageType::Reactivation,
                "c".into(),
            )])
            .await
            .unwrap();

        let (status, body) = app.request("GET", "/api/v1/messages", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 2);

        let (status, body) = app
            .request("GET", &format!("/api/v1/messages?patientId={patient}"), Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let rows = body["data"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["body"], "a");
        assert_eq!(rows[0]["message_type"], "reactivation");

        let (status, _) = app
            .request("GET", "/api/v1/messages?limit=500", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
