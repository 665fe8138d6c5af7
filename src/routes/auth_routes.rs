use axum::{
    Json, Router,
    extract::State,
    extract::rejection::JsonRejection,
    routing::{get, post},
};
use chrono::{Duration, Utc};

use crate::{
    auth::{generate_access_token, hash_access_token, verify_password},
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::*,
    routes::json_body,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/me", get(me))
        .route("/logout", post(logout))
}

async fn load_clinic(state: &AppState, profile: &ProfileRow) -> Result<ClinicRow, ApiError> {
    state
        .gateway
        .find_clinic(profile.clinic_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("CLINIC_NOT_FOUND", "Clinic not found".into()))
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<ApiOk<LoginData>>, ApiError> {
    let req = json_body(payload)?;

    let email = req.email.trim();
    if email.is_empty() || req.password.is_empty() {
        return Err(ApiError::validation("email and password are required"));
    }

    // 1) Load user
    let user = state
        .gateway
        .find_user_by_email(email)
        .await?
        .ok_or_else(ApiError::invalid_credentials)?;

    // 2) Verify password, then account state
    if !verify_password(&req.password, &user.password_hash) {
        return Err(ApiError::invalid_credentials());
    }

    if !user.is_active {
        return Err(ApiError::forbidden("Account is disabled"));
    }

    // 3) Staff profile and clinic
    let profile = state
        .gateway
        .find_profile(user.user_id)
        .await?
        .ok_or_else(ApiError::profile_not_found)?;
    let clinic = load_clinic(&state, &profile).await?;

    // 4) Create session_token
    let access_token = generate_access_token();
    let token_hash = hash_access_token(&access_token);
    let expires_at = Utc::now() + Duration::hours(state.session_ttl_hours);

    let session = state
        .gateway
        .insert_session(user.user_id, &token_hash, req.device_name.as_deref(), expires_at)
        .await?;

    tracing::info!(user_id = %user.user_id, clinic_id = %clinic.id, "login");

    Ok(Json(ApiOk::new(LoginData {
        access_token,
        expires_at: session.expires_at,
        profile,
        clinic,
    })))
}

pub async fn me(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<MeData>>, ApiError> {
    let profile = auth.profile(&state).await?;
    let clinic = load_clinic(&state, &profile).await?;

    Ok(Json(ApiOk::new(MeData {
        profile,
        clinic,
        session_token_id: auth.session_token_id,
    })))
}

pub async fn logout(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<OkResponse>, ApiError> {
    state.gateway.revoke_session(auth.session_token_id).await?;
    Ok(Json(OkResponse { success: true }))
}
