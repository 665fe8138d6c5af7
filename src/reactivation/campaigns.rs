//! Reactivation campaigns: one campaign row plus one pending recipient per
//! selected patient, written together.

use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use crate::auth::ensure_not_dentist;
use crate::error::ApiError;
use crate::gateway::DataGateway;
use crate::models::{CampaignType, Channel, NewCampaign, ProfileRow, RecipientDraft};

pub const DEFAULT_CAMPAIGN_TEMPLATE: &str =
    "Hello, it has been a while since we last saw you. Would you like to book an appointment?";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedCampaign {
    pub id: Uuid,
    pub name: String,
    pub recipients_count: usize,
}

#[derive(Debug, Clone)]
pub struct ReactivationCampaignInput {
    pub patient_ids: Vec<Uuid>,
    pub channel: Option<Channel>,
    pub message_template: Option<String>,
    /// Creation day in the clinic's time zone, used for the campaign name.
    pub today: NaiveDate,
}

pub fn campaign_name(today: NaiveDate) -> String {
    format!("Reactivation - {}", today.format("%d.%m.%Y"))
}

/// Creates a draft reactivation campaign for the caller's clinic.
pub async fn create_reactivation_campaign(
    gateway: &dyn DataGateway,
    caller: &ProfileRow,
    input: ReactivationCampaignInput,
) -> Result<CreatedCampaign, ApiError> {
    ensure_not_dentist(caller)?;

    if input.patient_ids.is_empty() {
        return Err(ApiError::validation("Invalid patient IDs"));
    }

    let message_template = input
        .message_template
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_CAMPAIGN_TEMPLATE.to_string());

    let campaign = NewCampaign {
        clinic_id: caller.clinic_id,
        created_by: caller.id,
        name: campaign_name(input.today),
        campaign_type: CampaignType::Reactivation,
        channel: input.channel.unwrap_or(Channel::Sms),
        message_template,
    };

    let recipients: Vec<RecipientDraft> = input
        .patient_ids
        .iter()
        .map(|&patient_id| RecipientDraft {
            patient_id,
            appointment_id: None,
        })
        .collect();

    let row = gateway
        .create_campaign(&campaign, &recipients)
        .await
        .map_err(|e| ApiError::persistence("Failed to create campaign", e))?;

    tracing::info!(
        campaign_id = %row.id,
        clinic_id = %row.clinic_id,
        recipients = recipients.len(),
        "reactivation campaign created"
    );

    Ok(CreatedCampaign {
        id: row.id,
        name: row.name,
        recipients_count: recipients.len(),
    })
}
