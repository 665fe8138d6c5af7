use axum::{
    Json, Router,
    extract::rejection::{JsonRejection, QueryRejection},
    extract::{Path, Query, State},
    routing::{get, patch, post},
};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::gateway::{AppointmentQuery, PatientFilter};
use crate::middleware::auth_context::AuthContext;
use crate::models::{
    ApiOk, AppState, AppointmentRow, AppointmentStatus, CountResponse, NewAppointment, OkResponse,
};
use crate::reactivation::dispatch::{offer_freed_slot, send_reminder};
use crate::routes::{json_body, query_params};

const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 200;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMinuteRequest {
    #[serde(alias = "appointmentId")]
    pub rendez_vous_id: Option<String>,
    pub max_recipients: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderRequest {
    #[serde(alias = "appointmentId")]
    pub rendez_vous_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAppointmentRequest {
    pub patient_id: Option<Uuid>,
    pub practitioner_id: Option<Uuid>,
    /// RFC 3339, or a local `YYYY-MM-DDTHH:MM[:SS]` in the clinic time zone.
    pub starts_at: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: AppointmentStatus,
}

#[derive(Debug, Deserialize)]
pub struct AppointmentListQuery {
    pub from: Option<DateTime<Utc>>,
    pub status: Option<AppointmentStatus>,
    pub limit: Option<i64>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_appointments).post(create_appointment))
        .route("/{appointment_id}/status", patch(update_status))
        .route("/last-minute-notify", post(last_minute_notify))
        .route("/send-reminder", post(send_appointment_reminder))
}

fn appointment_id(raw: Option<&str>) -> Result<Uuid, ApiError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::validation("Missing appointment id"))?;
    Uuid::parse_str(raw).map_err(|_| ApiError::validation("Invalid appointment id"))
}

/// Start time as sent by the booking form. Times without an offset are wall
/// clock times of the clinic.
pub fn parse_starts_at(raw: &str, tz: Tz) -> Result<DateTime<Utc>, ApiError> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .and_then(|naive| tz.from_local_datetime(&naive).earliest())
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| ApiError::validation("Invalid startsAt"))
}

/// GET /api/v1/appointments
pub async fn list_appointments(
    State(state): State<AppState>,
    auth: AuthContext,
    query: Result<Query<AppointmentListQuery>, QueryRejection>,
) -> Result<Json<ApiOk<Vec<AppointmentRow>>>, ApiError> {
    let q = query_params(query)?;
    let profile = auth.profile(&state).await?;

    let limit = q.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    if !(1..=MAX_LIST_LIMIT).contains(&limit) {
        return Err(ApiError::validation(format!(
            "limit must be between 1 and {MAX_LIST_LIMIT}"
        )));
    }

    // upcoming only unless a start bound is given
    let rows = state
        .gateway
        .list_appointments(
            profile.clinic_id,
            &AppointmentQuery {
                status: q.status,
                starts_from: Some(q.from.unwrap_or_else(Utc::now)),
                limit,
            },
        )
        .await?;

    Ok(Json(ApiOk::new(rows)))
}

/// POST /api/v1/appointments
pub async fn create_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    payload: Result<Json<CreateAppointmentRequest>, JsonRejection>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    let profile = auth.profile(&state).await?;
    let req = json_body(payload)?;

    let (Some(patient_id), Some(practitioner_id), Some(starts_at)) =
        (req.patient_id, req.practitioner_id, req.starts_at.as_deref())
    else {
        return Err(ApiError::validation(
            "patientId, practitionerId and startsAt are required",
        ));
    };
    let starts_at = parse_starts_at(starts_at, state.clinic_tz)?;

    let patients = state
        .gateway
        .list_patients(
            profile.clinic_id,
            &PatientFilter {
                ids: Some(vec![patient_id]),
                ..Default::default()
            },
        )
        .await?;
    if patients.is_empty() {
        return Err(ApiError::validation("Unknown patient"));
    }
    let practitioners = state.gateway.practitioner_names(profile.clinic_id).await?;
    if !practitioners.contains_key(&practitioner_id) {
        return Err(ApiError::validation("Unknown practitioner"));
    }

    let row = state
        .gateway
        .insert_appointment(&NewAppointment {
            clinic_id: profile.clinic_id,
            practitioner_id,
            patient_id,
            starts_at,
            notes: req
                .notes
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
        })
        .await
        .map_err(|e| ApiError::persistence("Failed to create appointment", e))?;

    tracing::info!(appointment_id = %row.id, clinic_id = %row.clinic_id, "appointment created");

    Ok(Json(ApiOk::new(row)))
}

/// PATCH /api/v1/appointments/{appointment_id}/status
pub async fn update_status(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    payload: Result<Json<StatusRequest>, JsonRejection>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    let profile = auth.profile(&state).await?;
    let req = json_body(payload)?;

    let row = state
        .gateway
        .update_appointment_status(profile.clinic_id, appointment_id, req.status)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound("APPOINTMENT_NOT_FOUND", "Appointment not found".into())
        })?;

    tracing::info!(appointment_id = %row.id, status = ?row.status, "appointment status changed");

    Ok(Json(ApiOk::new(row)))
}

/// POST /api/v1/appointments/last-minute-notify
pub async fn last_minute_notify(
    State(state): State<AppState>,
    auth: AuthContext,
    payload: Result<Json<LastMinuteRequest>, JsonRejection>,
) -> Result<Json<CountResponse>, ApiError> {
    let profile = auth.profile(&state).await?;
    let req = json_body(payload)?;
    let appointment_id = appointment_id(req.rendez_vous_id.as_deref())?;

    let count = offer_freed_slot(
        state.gateway.as_ref(),
        profile.clinic_id,
        appointment_id,
        req.max_recipients,
        Utc::now(),
        state.clinic_tz,
    )
    .await?;

    Ok(Json(CountResponse {
        success: true,
        count,
        message: format!("{count} flexible patient(s) notified"),
    }))
}

/// POST /api/v1/appointments/send-reminder
pub async fn send_appointment_reminder(
    State(state): State<AppState>,
    auth: AuthContext,
    payload: Result<Json<ReminderRequest>, JsonRejection>,
) -> Result<Json<OkResponse>, ApiError> {
    // missing profile is a 403 here, not a 404
    let profile = state
        .gateway
        .find_profile(auth.user_id)
        .await?
        .ok_or_else(|| ApiError::forbidden("Profile not found"))?;
    let req = json_body(payload)?;
    let appointment_id = appointment_id(req.rendez_vous_id.as_deref())?;

    send_reminder(
        state.gateway.as_ref(),
        state.transport.as_ref(),
        profile.clinic_id,
        appointment_id,
        Utc::now(),
        state.clinic_tz,
    )
    .await?;

    Ok(Json(OkResponse { success: true }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use chrono::{Duration, Utc};
    use serde_json::json;
    use uuid::Uuid;

    use super::parse_starts_at;
    use crate::gateway::{DataGateway, MessageQuery};
    use crate::models::{AppointmentStatus, MessageStatus, PatientRow, Role};
    use crate::routes::test_support::TestApp;

    fn patient(clinic_id: Uuid, first: &str, short_notice: bool) -> PatientRow {
        PatientRow {
            id: Uuid::new_v4(),
            clinic_id,
            practitioner_id: None,
            first_name: first.to_string(),
            last_name: "Test".to_string(),
            phone: Some("+41790000000".to_string()),
            email: None,
            language: None,
            accepts_short_notice: short_notice,
        }
    }

    #[tokio::test]
    async fn last_minute_offer_accepts_either_id_field() {
        let app = TestApp::new();
        let (_, token) = app.login_as(Role::Assistant).await;
        let dr = app.gateway.add_practitioner(app.clinic_id, "Keller").unwrap();
        let p = app.gateway.add_patient(patient(app.clinic_id, "Lea", true)).unwrap();
        let appt = app
            .gateway
            .add_appointment(app.clinic_id, dr, p.id, Utc::now() + Duration::hours(5), AppointmentStatus::Cancelled)
            .unwrap();

        for body in [
            json!({ "rendezVousId": appt.id }),
            json!({ "appointmentId": appt.id, "maxRecipients": 2 }),
        ] {
            let (status, resp) = app
                .request("POST", "/api/v1/appointments/last-minute-notify", Some(&token), Some(body))
                .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(resp["count"], 1);
        }
    }

    #[tokio::test]
    async fn last_minute_offer_errors() {
        let app = TestApp::new();
        let (_, token) = app.login_as(Role::Owner).await;
        let dr = app.gateway.add_practitioner(app.clinic_id, "Keller").unwrap();
        let p = app.gateway.add_patient(patient(app.clinic_id, "Lea", true)).unwrap();
        let confirmed = app
            .gateway
            .add_appointment(app.clinic_id, dr, p.id, Utc::now() + Duration::hours(5), AppointmentStatus::Confirmed)
            .unwrap();

        let (status, _) = app
            .request("POST", "/api/v1/appointments/last-minute-notify", Some(&token), Some(json!({})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .request(
                "POST",
                "/api/v1/appointments/last-minute-notify",
                Some(&token),
                Some(json!({ "rendezVousId": confirmed.id })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .request(
                "POST",
                "/api/v1/appointments/last-minute-notify",
                Some(&token),
                Some(json!({ "rendezVousId": Uuid::new_v4() })),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn reminder_is_recorded_as_sent() {
        let app = TestApp::new();
        let (_, token) = app.login_as(Role::Dentist).await;
        let dr = app.gateway.add_practitioner(app.clinic_id, "Keller").unwrap();
        let p = app.gateway.add_patient(patient(app.clinic_id, "Lea", false)).unwrap();
        let appt = app
            .gateway
            .add_appointment(app.clinic_id, dr, p.id, Utc::now() + Duration::days(1), AppointmentStatus::Confirmed)
            .unwrap();

        let (status, body) = app
            .request(
                "POST",
                "/api/v1/appointments/send-reminder",
                Some(&token),
                Some(json!({ "rendezVousId": appt.id })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true }));

        let rows = app
            .gateway
            .list_messages(
                app.clinic_id,
                &MessageQuery { appointment_id: Some(appt.id), limit: 10, ..Default::default() },
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, MessageStatus::Sent);
        assert!(rows[0].body.contains("Test Clinic"));
    }

    #[tokio::test]
    async fn reminder_for_unknown_appointment_is_forbidden() {
        let app = TestApp::new();
        let (_, token) = app.login_as(Role::Assistant).await;
        let (status, _) = app
            .request(
                "POST",
                "/api/v1/appointments/send-reminder",
                Some(&token),
                Some(json!({ "rendezVousId": Uuid::new_v4() })),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn starts_at_accepts_offsets_and_clinic_local_times() {
        let tz = chrono_tz::Europe::Zurich;
        let utc = parse_starts_at("2026-10-20T12:30:00Z", tz).unwrap();
        assert_eq!(utc.to_rfc3339(), "2026-10-20T12:30:00+00:00");

        // UTC+2 until the last Sunday of October
        let local = parse_starts_at("2026-10-20T14:30", tz).unwrap();
        assert_eq!(local, utc);
        let winter = parse_starts_at("2026-12-01T09:00:00", tz).unwrap();
        assert_eq!(winter.to_rfc3339(), "2026-12-01T08:00:00+00:00");

        assert!(parse_starts_at("tomorrow", tz).is_err());
        // skipped by the spring-forward change
        assert!(parse_starts_at("2026-03-29T02:30", tz).is_err());
    }

    #[tokio::test]
    async fn appointment_is_booked_listed_and_completed() {
        let app = TestApp::new();
        let (_, token) = app.login_as(Role::Assistant).await;
        let dr = app.gateway.add_practitioner(app.clinic_id, "Keller").unwrap();
        let p = app.gateway.add_patient(patient(app.clinic_id, "Lea", false)).unwrap();
        let starts_at = (Utc::now() + Duration::days(3)).to_rfc3339();

        let (status, body) = app
            .request(
                "POST",
                "/api/v1/appointments",
                Some(&token),
                Some(json!({
                    "patientId": p.id,
                    "practitionerId": dr,
                    "startsAt": starts_at,
                    "notes": "check-up"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "scheduled");
        assert_eq!(body["data"]["notes"], "check-up");
        let id = body["data"]["id"].as_str().unwrap().to_string();

        app.gateway
            .add_appointment(app.clinic_id, dr, p.id, Utc::now() - Duration::days(30), AppointmentStatus::Completed)
            .unwrap();
        let (status, body) = app.request("GET", "/api/v1/appointments", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        let rows = body["data"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], id);

        let (status, body) = app
            .request(
                "PATCH",
                &format!("/api/v1/appointments/{id}/status"),
                Some(&token),
                Some(json!({ "status": "completed" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "completed");

        // any status may follow any other
        let (status, body) = app
            .request(
                "PATCH",
                &format!("/api/v1/appointments/{id}/status"),
                Some(&token),
                Some(json!({ "status": "scheduled" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "scheduled");
    }

    #[tokio::test]
    async fn booking_requires_patient_and_practitioner_of_the_clinic() {
        let app = TestApp::new();
        let (_, token) = app.login_as(Role::Owner).await;
        let other = app.gateway.add_clinic("Other", None).unwrap();
        let dr = app.gateway.add_practitioner(app.clinic_id, "Keller").unwrap();
        let foreign_dr = app.gateway.add_practitioner(other.id, "Elsewhere").unwrap();
        let p = app.gateway.add_patient(patient(app.clinic_id, "Lea", false)).unwrap();
        let foreign = app.gateway.add_patient(patient(other.id, "Sam", false)).unwrap();

        for body in [
            json!({ "patientId": foreign.id, "practitionerId": dr, "startsAt": "2026-11-02T09:00" }),
            json!({ "patientId": p.id, "practitionerId": foreign_dr, "startsAt": "2026-11-02T09:00" }),
            json!({ "patientId": p.id, "practitionerId": dr, "startsAt": "soon" }),
            json!({ "patientId": p.id, "startsAt": "2026-11-02T09:00" }),
        ] {
            let (status, resp) = app
                .request("POST", "/api/v1/appointments", Some(&token), Some(body))
                .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(resp["success"], false);
        }

        let (_, body) = app
            .request("GET", "/api/v1/appointments?from=2000-01-01T00:00:00Z", Some(&token), None)
            .await;
        assert!(body["data"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn status_change_is_scoped_to_the_clinic() {
        let app = TestApp::new();
        let (_, token) = app.login_as(Role::Dentist).await;
        let other = app.gateway.add_clinic("Other", None).unwrap();
        let dr = app.gateway.add_practitioner(other.id, "Elsewhere").unwrap();
        let p = app.gateway.add_patient(patient(other.id, "Sam", false)).unwrap();
        let foreign = app
            .gateway
            .add_appointment(other.id, dr, p.id, Utc::now() + Duration::days(1), AppointmentStatus::Scheduled)
            .unwrap();

        let (status, _) = app
            .request(
                "PATCH",
                &format!("/api/v1/appointments/{}/status", foreign.id),
                Some(&token),
                Some(json!({ "status": "cancelled" })),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let unchanged = app.gateway.find_appointment(other.id, foreign.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, AppointmentStatus::Scheduled);

        let (status, _) = app
            .request(
                "PATCH",
                &format!("/api/v1/appointments/{}/status", foreign.id),
                Some(&token),
                Some(json!({ "status": "done" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
