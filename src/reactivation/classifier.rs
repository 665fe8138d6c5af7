//! Silent-patient radar.
//!
//! A patient is silent when their latest completed or confirmed appointment
//! is older than the lookback window, or when they never had one. Months are
//! approximated as 30.44 days, both for the window and for the reported
//! "months since last visit".

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::gateway::{DataGateway, PatientFilter};

pub const DAYS_PER_MONTH: f64 = 30.44;
pub const DEFAULT_LOOKBACK_MONTHS: u32 = 12;
/// Windows offered by the radar screen.
pub const SELECTABLE_LOOKBACK_MONTHS: [u32; 3] = [12, 18, 24];

const MILLIS_PER_MONTH: f64 = 1000.0 * 60.0 * 60.0 * 24.0 * DAYS_PER_MONTH;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    NeverVisited,
    Silent { months_since_visit: i64 },
    Active,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SilentPatient {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    /// `None` when no practitioner is assigned.
    pub practitioner_name: Option<String>,
    pub last_visit_at: Option<DateTime<Utc>>,
    /// `None` for patients who never visited.
    pub months_since_visit: Option<i64>,
}

/// Elapsed time from `from` to `to` in 30.44-day months.
pub fn months_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / MILLIS_PER_MONTH
}

pub fn classify_visit(
    last_visit: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    lookback_months: u32,
) -> Activity {
    let Some(last_visit) = last_visit else {
        return Activity::NeverVisited;
    };
    let months = months_between(last_visit, now);
    if months > f64::from(lookback_months) {
        Activity::Silent {
            months_since_visit: months.round() as i64,
        }
    } else {
        Activity::Active
    }
}

/// Silent patients of `clinic_id`, ordered by last name.
pub async fn find_silent_patients(
    gateway: &dyn DataGateway,
    clinic_id: Uuid,
    lookback_months: u32,
    now: DateTime<Utc>,
) -> Result<Vec<SilentPatient>, ApiError> {
    if lookback_months == 0 {
        return Err(ApiError::validation("lookback must be at least one month"));
    }

    let patients = gateway
        .list_patients(clinic_id, &PatientFilter::default())
        .await?;
    if patients.is_empty() {
        return Ok(Vec::new());
    }

    let last_visits = gateway.last_visits(clinic_id).await?;
    let practitioners = gateway.practitioner_names(clinic_id).await?;

    let silent: Vec<SilentPatient> = patients
        .into_iter()
        .filter_map(|p| {
            let last_visit_at = last_visits.get(&p.id).copied();
            let months_since_visit = match classify_visit(last_visit_at, now, lookback_months) {
                Activity::Active => return None,
                Activity::NeverVisited => None,
                Activity::Silent { months_since_visit } => Some(months_since_visit),
            };
            let practitioner_name = p
                .practitioner_id
                .and_then(|id| practitioners.get(&id).cloned());
            Some(SilentPatient {
                id: p.id,
                first_name: p.first_name,
                last_name: p.last_name,
                phone: p.phone,
                email: p.email,
                practitioner_name,
                last_visit_at,
                months_since_visit,
            })
        })
        .collect();

    tracing::debug!(%clinic_id, lookback_months, silent = silent.len(), "silent patient scan");
    Ok(silent)
}
