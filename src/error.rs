use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::gateway::GatewayError;
use crate::messaging::TransportError;

/// Failure body shared by every endpoint. Internal codes stay in the logs.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(&'static str, String),
    Forbidden(&'static str, String),
    BadRequest(&'static str, String),
    NotFound(&'static str, String),
    Internal(String),
}

impl ApiError {
    pub fn unauthenticated() -> Self {
        ApiError::Unauthorized("UNAUTHENTICATED", "Unauthenticated".into())
    }

    pub fn invalid_credentials() -> Self {
        ApiError::Unauthorized("INVALID_CREDENTIALS", "Email or password is incorrect".into())
    }

    pub fn profile_not_found() -> Self {
        ApiError::NotFound("PROFILE_NOT_FOUND", "Profile not found".into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::BadRequest("VALIDATION_ERROR", message.into())
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        ApiError::BadRequest("PRECONDITION_FAILED", message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden("FORBIDDEN", message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(..) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(..) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(..) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(..) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::Unauthorized(_, msg)
            | ApiError::Forbidden(_, msg)
            | ApiError::BadRequest(_, msg)
            | ApiError::NotFound(_, msg)
            | ApiError::Internal(msg) => msg,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(code, _)
            | ApiError::Forbidden(code, _)
            | ApiError::BadRequest(code, _)
            | ApiError::NotFound(code, _) => code,
            ApiError::Internal(_) => "INTERNAL",
        }
    }

    /// Wraps a persistence failure with the message the caller should see.
    pub fn persistence(context: &str, err: GatewayError) -> Self {
        tracing::error!(error = %err, "{context}");
        ApiError::Internal(context.to_string())
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        tracing::error!(error = %err, "data gateway error");
        ApiError::Internal(format!("db error: {err}"))
    }
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        tracing::error!(error = %err, "sms transport error");
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_client_error() {
            tracing::warn!(code = self.code(), status = status.as_u16(), "{}", self.message());
        }
        let body = Json(ErrorResponse {
            success: false,
            error: self.message().to_string(),
        });
        (status, body).into_response()
    }
}
