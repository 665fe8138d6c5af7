//! Tenant-scoped data access.
//!
//! Every method that touches clinic data takes the caller's `clinic_id` and
//! only ever reads or writes rows of that clinic.

mod inmemory;
mod postgres;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use inmemory::InMemoryGateway;
pub use postgres::PostgresGateway;

use crate::models::{
    AppointmentRow, AppointmentStatus, CampaignRecipientRow, CampaignRow, CampaignType, ClinicRow,
    MessageRow, NewAppointment, NewCampaign, NewMessage, NewPatient, PatientRow, ProfileRow,
    RecipientDraft, ReminderContext, SessionLookupRow, SessionTokenRow, UserRow,
};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    /// A row refers to a patient, practitioner or appointment outside its clinic.
    #[error("constraint violation: {0}")]
    Constraint(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, Default)]
pub struct PatientFilter {
    pub ids: Option<Vec<Uuid>>,
    pub accepts_short_notice: Option<bool>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct AppointmentCountFilter {
    pub status: Option<AppointmentStatus>,
    pub starts_from: Option<DateTime<Utc>>,
    pub starts_before: Option<DateTime<Utc>>,
}

impl AppointmentCountFilter {
    pub fn matches(&self, row: &AppointmentRow) -> bool {
        self.status.is_none_or(|s| row.status == s)
            && self.starts_from.is_none_or(|from| row.starts_at >= from)
            && self.starts_before.is_none_or(|before| row.starts_at < before)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppointmentQuery {
    pub status: Option<AppointmentStatus>,
    pub starts_from: Option<DateTime<Utc>>,
    pub limit: i64,
}

#[derive(Debug, Clone, Default)]
pub struct CampaignQuery {
    pub campaign_type: Option<CampaignType>,
    pub limit: i64,
}

#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    pub patient_id: Option<Uuid>,
    pub appointment_id: Option<Uuid>,
    pub limit: i64,
}

#[async_trait::async_trait]
pub trait DataGateway: Send + Sync {
    /* identity */
    async fn find_user_by_email(&self, email: &str) -> GatewayResult<Option<UserRow>>;
    async fn insert_session(
        &self,
        user_id: Uuid,
        token_hash: &str,
        device_name: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> GatewayResult<SessionTokenRow>;
    /// Session that is not revoked, not expired, and whose user is active.
    async fn find_active_session(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> GatewayResult<Option<SessionLookupRow>>;
    async fn touch_session(&self, session_token_id: Uuid) -> GatewayResult<()>;
    async fn revoke_session(&self, session_token_id: Uuid) -> GatewayResult<()>;
    async fn find_profile(&self, user_id: Uuid) -> GatewayResult<Option<ProfileRow>>;
    async fn find_clinic(&self, clinic_id: Uuid) -> GatewayResult<Option<ClinicRow>>;

    /* patients */
    /// Ordered by last name, then first name.
    async fn list_patients(
        &self,
        clinic_id: Uuid,
        filter: &PatientFilter,
    ) -> GatewayResult<Vec<PatientRow>>;
    async fn count_patients(&self, clinic_id: Uuid) -> GatewayResult<i64>;
    async fn insert_patient(&self, patient: &NewPatient) -> GatewayResult<PatientRow>;
    /// Latest `starts_at` per patient over completed or confirmed appointments.
    async fn last_visits(&self, clinic_id: Uuid) -> GatewayResult<HashMap<Uuid, DateTime<Utc>>>;
    async fn practitioner_names(&self, clinic_id: Uuid) -> GatewayResult<HashMap<Uuid, String>>;

    /* appointments */
    async fn find_appointment(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
    ) -> GatewayResult<Option<AppointmentRow>>;
    async fn count_appointments(
        &self,
        clinic_id: Uuid,
        filter: &AppointmentCountFilter,
    ) -> GatewayResult<i64>;
    /// Ordered by start time, earliest first.
    async fn list_appointments(
        &self,
        clinic_id: Uuid,
        query: &AppointmentQuery,
    ) -> GatewayResult<Vec<AppointmentRow>>;
    async fn insert_appointment(
        &self,
        appointment: &NewAppointment,
    ) -> GatewayResult<AppointmentRow>;
    /// Any status may follow any other. `None` when the appointment is not
    /// in the clinic.
    async fn update_appointment_status(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
        status: AppointmentStatus,
    ) -> GatewayResult<Option<AppointmentRow>>;
    async fn reminder_context(
        &self,
        clinic_id: Uuid,
        appointment_id: Uuid,
    ) -> GatewayResult<Option<ReminderContext>>;

    /* campaigns */
    /// Inserts the campaign and all its recipients as one unit: either both
    /// exist afterwards or neither does.
    async fn create_campaign(
        &self,
        campaign: &NewCampaign,
        recipients: &[RecipientDraft],
    ) -> GatewayResult<CampaignRow>;
    async fn find_campaign(
        &self,
        clinic_id: Uuid,
        campaign_id: Uuid,
    ) -> GatewayResult<Option<CampaignRow>>;
    /// Newest first.
    async fn list_campaigns(
        &self,
        clinic_id: Uuid,
        query: &CampaignQuery,
    ) -> GatewayResult<Vec<CampaignRow>>;
    async fn list_recipients(
        &self,
        clinic_id: Uuid,
        campaign_id: Uuid,
    ) -> GatewayResult<Vec<CampaignRecipientRow>>;

    /* messages */
    /// All rows or none. Returns the number inserted.
    async fn insert_messages(&self, messages: &[NewMessage]) -> GatewayResult<usize>;
    /// Newest first.
    async fn list_messages(
        &self,
        clinic_id: Uuid,
        query: &MessageQuery,
    ) -> GatewayResult<Vec<MessageRow>>;
}
