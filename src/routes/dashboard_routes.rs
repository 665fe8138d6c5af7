use axum::{Json, Router, extract::State, routing::get};
use chrono::{DateTime, Days, Months, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use uuid::Uuid;

use crate::auth::ensure_owner;
use crate::error::ApiError;
use crate::gateway::{AppointmentCountFilter, DataGateway};
use crate::middleware::auth_context::AuthContext;
use crate::models::{ApiOk, AppState, AppointmentStatus};
use crate::reactivation::classifier::{DEFAULT_LOOKBACK_MONTHS, find_silent_patients};

const STATS_WINDOW_MONTHS: u32 = 6;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub total_patients: i64,
    pub appointments_today: i64,
    pub appointments_tomorrow: i64,
    pub practice_score: i64,
    pub silent_patients: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsData {
    pub appointments: i64,
    pub no_shows: i64,
    /// Percent, one decimal.
    pub no_show_rate: f64,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/dashboard/summary", get(summary))
        .route("/analytics", get(analytics))
}

fn no_show_ratio(appointments: i64, no_shows: i64) -> f64 {
    if appointments > 0 {
        no_shows as f64 / appointments as f64
    } else {
        0.0
    }
}

/// 100 minus the no-show rate in whole percent, floored at zero.
pub fn practice_score(appointments: i64, no_shows: i64) -> i64 {
    let rate = (no_show_ratio(appointments, no_shows) * 100.0).round() as i64;
    (100 - rate).max(0)
}

pub fn no_show_percent(appointments: i64, no_shows: i64) -> f64 {
    (no_show_ratio(appointments, no_shows) * 1000.0).round() / 10.0
}

fn local_midnight(tz: Tz, day: NaiveDate) -> Result<DateTime<Utc>, ApiError> {
    day.and_hms_opt(0, 0, 0)
        .and_then(|naive| tz.from_local_datetime(&naive).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| ApiError::Internal(format!("no local midnight on {day}")))
}

async fn appointments_between(
    gateway: &dyn DataGateway,
    clinic_id: Uuid,
    from: DateTime<Utc>,
    before: DateTime<Utc>,
) -> Result<i64, ApiError> {
    let filter = AppointmentCountFilter {
        starts_from: Some(from),
        starts_before: Some(before),
        ..Default::default()
    };
    Ok(gateway.count_appointments(clinic_id, &filter).await?)
}

/// Appointments and no-shows starting on or after six months ago.
async fn no_show_stats(
    gateway: &dyn DataGateway,
    clinic_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(i64, i64), ApiError> {
    let since = now
        .checked_sub_months(Months::new(STATS_WINDOW_MONTHS))
        .ok_or_else(|| ApiError::Internal("date out of range".into()))?;

    let all = AppointmentCountFilter {
        starts_from: Some(since),
        ..Default::default()
    };
    let no_shows = AppointmentCountFilter {
        status: Some(AppointmentStatus::NoShow),
        ..all.clone()
    };
    let total = gateway.count_appointments(clinic_id, &all).await?;
    let missed = gateway.count_appointments(clinic_id, &no_shows).await?;
    Ok((total, missed))
}

pub async fn build_summary(
    gateway: &dyn DataGateway,
    clinic_id: Uuid,
    now: DateTime<Utc>,
    tz: Tz,
) -> Result<DashboardSummary, ApiError> {
    let today = now.with_timezone(&tz).date_naive();
    let out_of_range = || ApiError::Internal("date out of range".into());
    let tomorrow = today.checked_add_days(Days::new(1)).ok_or_else(out_of_range)?;
    let day_after = today.checked_add_days(Days::new(2)).ok_or_else(out_of_range)?;

    let (start_today, start_tomorrow, start_day_after) = (
        local_midnight(tz, today)?,
        local_midnight(tz, tomorrow)?,
        local_midnight(tz, day_after)?,
    );

    let total_patients = gateway.count_patients(clinic_id).await?;
    let appointments_today =
        appointments_between(gateway, clinic_id, start_today, start_tomorrow).await?;
    let appointments_tomorrow =
        appointments_between(gateway, clinic_id, start_tomorrow, start_day_after).await?;
    let (appointments, no_shows) = no_show_stats(gateway, clinic_id, now).await?;
    let silent = find_silent_patients(gateway, clinic_id, DEFAULT_LOOKBACK_MONTHS, now).await?;

    Ok(DashboardSummary {
        total_patients,
        appointments_today,
        appointments_tomorrow,
        practice_score: practice_score(appointments, no_shows),
        silent_patients: silent.len(),
    })
}

/// GET /api/v1/dashboard/summary
pub async fn summary(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<DashboardSummary>>, ApiError> {
    let profile = auth.profile(&state).await?;
    let data = build_summary(
        state.gateway.as_ref(),
        profile.clinic_id,
        Utc::now(),
        state.clinic_tz,
    )
    .await?;
    Ok(Json(ApiOk::new(data)))
}

/// GET /api/v1/analytics (owner only)
pub async fn analytics(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<AnalyticsData>>, ApiError> {
    let profile = auth.profile(&state).await?;
    ensure_owner(&profile)?;

    let (appointments, no_shows) =
        no_show_stats(state.gateway.as_ref(), profile.clinic_id, Utc::now()).await?;

    Ok(Json(ApiOk::new(AnalyticsData {
        appointments,
        no_shows,
        no_show_rate: no_show_percent(appointments, no_shows),
    })))
}
