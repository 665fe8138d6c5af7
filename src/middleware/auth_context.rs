use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use chrono::Utc;
use headers::{Authorization, authorization::Bearer};
use uuid::Uuid;

use crate::auth::hash_access_token;
use crate::error::ApiError;
use crate::models::{AppState, ProfileRow};

/// Caller identity resolved from `Authorization: Bearer <token>`.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub session_token_id: Uuid,
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        async move {
            let TypedHeader(authz): TypedHeader<Authorization<Bearer>> =
                TypedHeader::from_request_parts(parts, state)
                    .await
                    .map_err(|_| ApiError::unauthenticated())?;

            let token_hash = hash_access_token(authz.token());

            let session = state
                .gateway
                .find_active_session(&token_hash, Utc::now())
                .await?
                .ok_or_else(ApiError::unauthenticated)?;

            // Best-effort activity stamp
            if let Err(e) = state.gateway.touch_session(session.session_token_id).await {
                tracing::debug!(error = %e, "unable to touch session");
            }

            Ok(AuthContext {
                user_id: session.user_id,
                session_token_id: session.session_token_id,
            })
        }
    }
}

impl AuthContext {
    /// Staff profile of the caller, which carries the clinic (tenant) id.
    pub async fn profile(&self, state: &AppState) -> Result<ProfileRow, ApiError> {
        state
            .gateway
            .find_profile(self.user_id)
            .await?
            .ok_or_else(ApiError::profile_not_found)
    }
}
