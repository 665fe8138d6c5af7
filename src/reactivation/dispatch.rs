//! Outbound patient messages: reactivation batches, freed-slot offers and
//! appointment reminders.
//!
//! Reactivation and freed-slot messages are only queued. Reminders go through
//! the [`SmsTransport`] first and are stored as sent.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use uuid::Uuid;

use crate::error::ApiError;
use crate::gateway::{DataGateway, PatientFilter};
use crate::messaging::SmsTransport;
use crate::models::{
    AppointmentStatus, Channel, MessageDirection, MessageStatus, MessageType, NewMessage,
};

pub const FIRST_NAME_PLACEHOLDER: &str = "{firstName}";

pub const DEFAULT_REACTIVATION_TEMPLATE: &str = "Hello {firstName}, it has been a while since your last visit! We would be glad to take care of your dental health again. Contact us to book an appointment.";

pub const DEFAULT_LAST_MINUTE_RECIPIENTS: i64 = 5;
pub const MAX_LAST_MINUTE_RECIPIENTS: i64 = 50;

/// How far ahead a cancelled slot may still be offered.
pub const LAST_MINUTE_WINDOW_HOURS: i64 = 48;

/// Substitutes the first `{firstName}` of `template`.
pub fn render_first_name(template: &str, first_name: &str) -> String {
    template.replacen(FIRST_NAME_PLACEHOLDER, first_name, 1)
}

pub fn last_minute_body(first_name: &str, starts_at: DateTime<Utc>, tz: Tz) -> String {
    let slot = starts_at.with_timezone(&tz).format("%A %-d %B at %H:%M");
    format!(
        "Hello {first_name}, a slot has opened up on {slot}. If you are interested, contact us quickly!"
    )
}

pub fn reminder_body(
    first_name: &str,
    clinic_name: &str,
    practitioner: &str,
    clinic_phone: Option<&str>,
    starts_at: DateTime<Utc>,
    tz: Tz,
) -> String {
    let local = starts_at.with_timezone(&tz);
    let date = local.format("%A %-d %B %Y");
    let time = local.format("%H:%M");
    let mut body = format!(
        "Hello {first_name},\n\nReminder of your appointment at {clinic_name}:\n{date} at {time}\nDr. {practitioner}\n"
    );
    if let Some(phone) = clinic_phone.filter(|p| !p.trim().is_empty()) {
        body.push_str(&format!("\nFor any question: {phone}\n"));
    }
    body.push_str("\nSee you soon!");
    body
}

/// Queues one reactivation SMS per patient. Every id must belong to
/// `clinic_id`, otherwise nothing is written.
pub async fn queue_reactivation_messages(
    gateway: &dyn DataGateway,
    clinic_id: Uuid,
    patient_ids: &[Uuid],
    message_template: Option<&str>,
) -> Result<usize, ApiError> {
    if patient_ids.is_empty() {
        return Err(ApiError::validation("No patient selected"));
    }

    let filter = PatientFilter {
        ids: Some(patient_ids.to_vec()),
        ..Default::default()
    };
    let patients = gateway
        .list_patients(clinic_id, &filter)
        .await
        .map_err(|e| ApiError::persistence("Failed to load patients", e))?;

    if patients.len() != patient_ids.len() {
        return Err(ApiError::forbidden(
            "Some patients are not accessible or do not belong to your clinic",
        ));
    }

    let template = message_template
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(DEFAULT_REACTIVATION_TEMPLATE);

    let messages: Vec<NewMessage> = patients
        .iter()
        .map(|p| {
            NewMessage::queued_sms(
                clinic_id,
                p.id,
                None,
                MessageType::Reactivation,
                render_first_name(template, &p.first_name),
            )
        })
        .collect();

    let count = gateway
        .insert_messages(&messages)
        .await
        .map_err(|e| ApiError::persistence("Failed to create messages", e))?;

    tracing::info!(%clinic_id, count, "reactivation messages queued");
    Ok(count)
}

/// Offers a cancelled slot starting within the next 48 hours to patients
/// who accept short-notice appointments.
pub async fn offer_freed_slot(
    gateway: &dyn DataGateway,
    clinic_id: Uuid,
    appointment_id: Uuid,
    max_recipients: Option<i64>,
    now: DateTime<Utc>,
    tz: Tz,
) -> Result<usize, ApiError> {
    let max_recipients = max_recipients.unwrap_or(DEFAULT_LAST_MINUTE_RECIPIENTS);
    if !(1..=MAX_LAST_MINUTE_RECIPIENTS).contains(&max_recipients) {
        return Err(ApiError::validation(format!(
            "maxRecipients must be between 1 and {MAX_LAST_MINUTE_RECIPIENTS}"
        )));
    }

    let appointment = gateway
        .find_appointment(clinic_id, appointment_id)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(
                "APPOINTMENT_NOT_FOUND",
                "Appointment not found or not accessible".into(),
            )
        })?;

    if appointment.status != AppointmentStatus::Cancelled {
        return Err(ApiError::precondition(
            "The appointment must be cancelled to offer the slot",
        ));
    }

    let until = appointment.starts_at - now;
    if until <= Duration::zero() || until > Duration::hours(LAST_MINUTE_WINDOW_HOURS) {
        return Err(ApiError::precondition(
            "The appointment must be in the future and within the next 48 hours",
        ));
    }

    let filter = PatientFilter {
        accepts_short_notice: Some(true),
        limit: Some(max_recipients),
        ..Default::default()
    };
    let candidates = gateway
        .list_patients(clinic_id, &filter)
        .await
        .map_err(|e| ApiError::persistence("Failed to load patients", e))?;

    if candidates.is_empty() {
        return Err(ApiError::NotFound(
            "NO_ELIGIBLE_PATIENTS",
            "No flexible patient found in your clinic".into(),
        ));
    }

    let messages: Vec<NewMessage> = candidates
        .iter()
        .map(|p| {
            NewMessage::queued_sms(
                clinic_id,
                p.id,
                Some(appointment.id),
                MessageType::LastMinuteOffer,
                last_minute_body(&p.first_name, appointment.starts_at, tz),
            )
        })
        .collect();

    let count = gateway
        .insert_messages(&messages)
        .await
        .map_err(|e| ApiError::persistence("Failed to create messages", e))?;

    tracing::info!(%clinic_id, %appointment_id, count, "last-minute offers queued");
    Ok(count)
}

/// Sends the reminder for one appointment and records it as sent.
pub async fn send_reminder(
    gateway: &dyn DataGateway,
    transport: &dyn SmsTransport,
    clinic_id: Uuid,
    appointment_id: Uuid,
    now: DateTime<Utc>,
    tz: Tz,
) -> Result<(), ApiError> {
    let ctx = gateway
        .reminder_context(clinic_id, appointment_id)
        .await?
        .ok_or_else(|| ApiError::forbidden("Appointment not found or not authorized"))?;

    let Some(patient) = ctx.patient else {
        return Err(ApiError::precondition("Patient or phone number missing"));
    };
    let Some(phone) = patient.phone.as_deref().filter(|p| !p.trim().is_empty()) else {
        return Err(ApiError::precondition("Patient or phone number missing"));
    };

    let clinic_name = ctx
        .clinic
        .as_ref()
        .map(|c| c.name.as_str())
        .unwrap_or("your dental clinic");
    let practitioner = ctx
        .practitioner
        .as_ref()
        .map(|d| d.full_name.as_str())
        .unwrap_or("");
    let clinic_phone = ctx.clinic.as_ref().and_then(|c| c.phone.as_deref());

    let body = reminder_body(
        &patient.first_name,
        clinic_name,
        practitioner,
        clinic_phone,
        ctx.starts_at,
        tz,
    );

    let provider_message_id = transport.send(phone, &body).await?;

    let message = NewMessage {
        clinic_id: ctx.clinic_id,
        patient_id: Some(patient.id),
        appointment_id: Some(ctx.appointment_id),
        channel: Channel::Sms,
        message_type: MessageType::Reminder,
        direction: MessageDirection::Outbound,
        body,
        status: MessageStatus::Sent,
        provider_message_id,
        sent_at: Some(now),
    };
    gateway
        .insert_messages(std::slice::from_ref(&message))
        .await
        .map_err(|e| ApiError::persistence("Failed to record reminder", e))?;

    tracing::info!(%clinic_id, %appointment_id, "appointment reminder sent");
    Ok(())
}
