use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::gateway::DataGateway;
use crate::messaging::SmsTransport;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<dyn DataGateway>,
    pub transport: Arc<dyn SmsTransport>,
    pub session_ttl_hours: i64,
    pub clinic_tz: Tz,
}

/* -------------------------
   Enums (Postgres enum types)
--------------------------*/

/// Staff roles. `Dentist` is the lowest-privilege role: clinical staff
/// without administrative rights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Assistant,
    Dentist,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "appointment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    /// Statuses that count as a visit for the silent-patient radar.
    pub fn counts_as_visit(self) -> bool {
        matches!(self, AppointmentStatus::Completed | AppointmentStatus::Confirmed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "campaign_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CampaignType {
    Reactivation,
    LastMinute,
    Reminder,
    Review,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "message_channel", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Sms,
    Whatsapp,
    Email,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "campaign_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Running,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "recipient_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
    Responded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "message_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Reminder,
    LastMinuteOffer,
    Reactivation,
    ReviewRequest,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "message_direction", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Outbound,
    Inbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "message_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Queued,
    Sent,
    Delivered,
    Failed,
    Received,
}

/* -------------------------
   DB Row Models
--------------------------*/

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct SessionTokenRow {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct SessionLookupRow {
    pub session_token_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ProfileRow {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub role: Role,
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ClinicRow {
    pub id: Uuid,
    pub name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct PractitionerRow {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub full_name: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PatientRow {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub practitioner_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub language: Option<String>,
    pub accepts_short_notice: bool,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AppointmentRow {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub practitioner_id: Uuid,
    pub patient_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CampaignRow {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub created_by: Uuid,
    pub name: String,
    pub campaign_type: CampaignType,
    pub channel: Channel,
    pub message_template: String,
    pub status: CampaignStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CampaignRecipientRow {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub status: RecipientStatus,
    pub last_status_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct MessageRow {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub patient_id: Option<Uuid>,
    pub appointment_id: Option<Uuid>,
    pub channel: Channel,
    pub message_type: MessageType,
    pub direction: MessageDirection,
    pub body: String,
    pub status: MessageStatus,
    pub provider_message_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/* -------------------------
   Write models
--------------------------*/

#[derive(Debug, Clone)]
pub struct NewPatient {
    pub clinic_id: Uuid,
    pub practitioner_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub language: Option<String>,
    pub accepts_short_notice: bool,
}

/// New appointments always start out `scheduled`.
#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub clinic_id: Uuid,
    pub practitioner_id: Uuid,
    pub patient_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub clinic_id: Uuid,
    pub created_by: Uuid,
    pub name: String,
    pub campaign_type: CampaignType,
    pub channel: Channel,
    pub message_template: String,
}

/// One targeted patient of a campaign being created; the campaign id is
/// assigned by the gateway.
#[derive(Debug, Clone)]
pub struct RecipientDraft {
    pub patient_id: Uuid,
    pub appointment_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub clinic_id: Uuid,
    pub patient_id: Option<Uuid>,
    pub appointment_id: Option<Uuid>,
    pub channel: Channel,
    pub message_type: MessageType,
    pub direction: MessageDirection,
    pub body: String,
    pub status: MessageStatus,
    pub provider_message_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl NewMessage {
    /// Outbound SMS waiting for the provider.
    pub fn queued_sms(
        clinic_id: Uuid,
        patient_id: Uuid,
        appointment_id: Option<Uuid>,
        message_type: MessageType,
        body: String,
    ) -> Self {
        Self {
            clinic_id,
            patient_id: Some(patient_id),
            appointment_id,
            channel: Channel::Sms,
            message_type,
            direction: MessageDirection::Outbound,
            body,
            status: MessageStatus::Queued,
            provider_message_id: None,
            sent_at: None,
        }
    }
}

/* -------------------------
   Relations
--------------------------*/

/// An embedded relation that the backend may return either as a single
/// object or as an array, depending on the query shape. Resolved once where
/// rows are decoded.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn into_first(self) -> Option<T> {
        match self {
            OneOrMany::One(v) => Some(v),
            OneOrMany::Many(v) => v.into_iter().next(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PatientContact {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PractitionerRef {
    pub full_name: String,
}

/// Everything needed to render an appointment reminder.
#[derive(Debug, Clone)]
pub struct ReminderContext {
    pub appointment_id: Uuid,
    pub clinic_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub patient: Option<PatientContact>,
    pub practitioner: Option<PractitionerRef>,
    pub clinic: Option<ClinicRow>,
}

/* -------------------------
   API DTOs
--------------------------*/

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiOk<T> {
    pub fn new(data: T) -> Self {
        Self { success: true, data }
    }
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub success: bool,
    pub count: usize,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub device_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginData {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub profile: ProfileRow,
    pub clinic: ClinicRow,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeData {
    pub profile: ProfileRow,
    pub clinic: ClinicRow,
    pub session_token_id: Uuid,
}
