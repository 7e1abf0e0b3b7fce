use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::providers::Platform;

/// Unified error type for the social-publisher service.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // ── Request Errors ──────────────────────────────────────────────────
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Authentication required: {0}")]
    Authentication(String),

    #[error("Connection belongs to another user")]
    Ownership,

    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid OAuth state: {0}")]
    MalformedState(String),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Missing configuration: {0}")]
    MissingConfiguration(String),

    // ── Provider Errors ─────────────────────────────────────────────────
    #[error("Provider token error: {0}")]
    ProviderToken(String),

    #[error("Provider identity error: {0}")]
    ProviderIdentity(String),

    #[error("Provider publish error: {message}")]
    ProviderPublish {
        message: String,
        payload: Option<serde_json::Value>,
    },

    /// The provider reported a temporary outage (5xx or a transient error flag).
    #[error("Provider temporarily unavailable: {message}")]
    ProviderUnavailable {
        message: String,
        payload: Option<serde_json::Value>,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Media container {container_id} was not ready before the polling budget ran out")]
    ReadinessTimeout { container_id: String },

    #[error("{0} token expires and cannot be refreshed, reconnect required")]
    RefreshUnsupported(Platform),

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    // ── Internal ────────────────────────────────────────────────────────
    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable snake_case code exposed to API callers.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::Authentication(_) => "authentication_error",
            AppError::Ownership => "ownership_error",
            AppError::NotFound(_) => "not_found",
            AppError::MalformedState(_) => "malformed_state",
            AppError::UnsupportedPlatform(_) => "unsupported_platform",
            AppError::MissingConfiguration(_) => "missing_configuration",
            AppError::ProviderToken(_) => "provider_token_error",
            AppError::ProviderIdentity(_) => "provider_identity_error",
            AppError::ProviderPublish { .. } => "provider_publish_error",
            AppError::ProviderUnavailable { .. } => "provider_unavailable",
            AppError::Network(_) => "network_error",
            AppError::ReadinessTimeout { .. } => "readiness_timeout",
            AppError::RefreshUnsupported(_) => "refresh_unsupported",
            AppError::RefreshFailed(_) => "refresh_failed",
            AppError::Crypto(_) => "crypto_error",
            AppError::Database(_) => "database_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Authentication(_) => StatusCode::UNAUTHORIZED,
            AppError::Ownership => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::MalformedState(_) => StatusCode::BAD_REQUEST,
            AppError::UnsupportedPlatform(_) => StatusCode::BAD_REQUEST,
            AppError::MissingConfiguration(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ProviderToken(_) => StatusCode::BAD_GATEWAY,
            AppError::ProviderIdentity(_) => StatusCode::BAD_GATEWAY,
            AppError::ProviderPublish { .. } => StatusCode::BAD_GATEWAY,
            AppError::ProviderUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Network(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::ReadinessTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            AppError::RefreshUnsupported(_) => StatusCode::CONFLICT,
            AppError::RefreshFailed(_) => StatusCode::BAD_GATEWAY,
            AppError::Crypto(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Transport failures and provider outages are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Network(_) | AppError::ProviderUnavailable { .. })
    }

    /// Structured form embedded in API responses and publish results.
    pub fn to_body(&self) -> ErrorBody {
        let details = match self {
            AppError::ProviderPublish { payload, .. }
            | AppError::ProviderUnavailable { payload, .. } => payload.clone(),
            _ => None,
        };
        ErrorBody {
            code: self.code().to_string(),
            message: self.to_string(),
            details,
        }
    }
}

/// Wire shape of an error: taxonomy code, readable message and, for provider
/// rejections, the provider's original payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!("Database error: {e}");
        AppError::Database(e.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Internal(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), "{self}");
        }

        let body = json!({ "error": self.to_body() });
        (status, axum::Json(body)).into_response()
    }
}
