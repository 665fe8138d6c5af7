use axum::{
    Json, Router,
    extract::rejection::{JsonRejection, QueryRejection},
    extract::{Path, Query, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::ensure_not_dentist;
use crate::error::ApiError;
use crate::gateway::CampaignQuery;
use crate::middleware::auth_context::AuthContext;
use crate::models::{ApiOk, AppState, CampaignRecipientRow, CampaignRow, CampaignType, Channel};
use crate::reactivation::campaigns::{
    CreatedCampaign, ReactivationCampaignInput, create_reactivation_campaign,
};
use crate::reactivation::parse_patient_ids;
use crate::routes::{json_body, query_params};

const DEFAULT_LIST_LIMIT: i64 = 5;
const MAX_LIST_LIMIT: i64 = 50;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReactivationRequest {
    pub patient_ids: Option<Vec<String>>,
    pub channel: Option<Channel>,
    pub message_template: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateCampaignResponse {
    pub success: bool,
    pub campaign: CreatedCampaign,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(rename = "type")]
    pub campaign_type: Option<CampaignType>,
    pub limit: Option<i64>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_campaigns))
        .route("/reactivation", post(create_reactivation))
        .route("/{campaign_id}/recipients", get(list_recipients))
}

/// POST /api/v1/campaigns/reactivation
pub async fn create_reactivation(
    State(state): State<AppState>,
    auth: AuthContext,
    payload: Result<Json<CreateReactivationRequest>, JsonRejection>,
) -> Result<Json<CreateCampaignResponse>, ApiError> {
    let profile = auth.profile(&state).await?;
    ensure_not_dentist(&profile)?;
    let req = json_body(payload)?;
    let patient_ids = parse_patient_ids(req.patient_ids.as_deref(), "Invalid patient IDs")?;

    let today = chrono::Utc::now().with_timezone(&state.clinic_tz).date_naive();
    let campaign = create_reactivation_campaign(
        state.gateway.as_ref(),
        &profile,
        ReactivationCampaignInput {
            patient_ids,
            channel: req.channel,
            message_template: req.message_template,
            today,
        },
    )
    .await?;

    Ok(Json(CreateCampaignResponse {
        success: true,
        campaign,
    }))
}

/// GET /api/v1/campaigns?type=reactivation&limit=5
pub async fn list_campaigns(
    State(state): State<AppState>,
    auth: AuthContext,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<ApiOk<Vec<CampaignRow>>>, ApiError> {
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
        .list_campaigns(
            profile.clinic_id,
            &CampaignQuery {
                campaign_type: q.campaign_type,
                limit,
            },
        )
        .await?;

    Ok(Json(ApiOk::new(rows)))
}

/// GET /api/v1/campaigns/{campaign_id}/recipients
pub async fn list_recipients(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<ApiOk<Vec<CampaignRecipientRow>>>, ApiError> {
    let profile = auth.profile(&state).await?;

    state
        .gateway
        .find_campaign(profile.clinic_id, campaign_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("CAMPAIGN_NOT_FOUND", "Campaign not found".into()))?;

    let rows = state
        .gateway
        .list_recipients(profile.clinic_id, campaign_id)
        .await?;
    Ok(Json(ApiOk::new(rows)))
}
