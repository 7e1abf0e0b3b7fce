//! Caller authentication for the social endpoints.
//!
//! Two paths are accepted:
//! - `Authorization: Bearer <jwt>`: an HS256 session token issued by the app;
//!   `sub` is the user id.
//! - `x-internal-secret` + `x-user-id`: service-to-service calls using the
//!   shared `AUTH_SERVICE_SECRET`.

use axum::http::HeaderMap;
use chrono::Utc;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::crypto::CryptoEngine;
use crate::error::AppError;

/// Identity of an authenticated caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthContext {
    pub user_id: String,
    pub auth_method: AuthMethod,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Session,
    Internal,
}

/// Session JWT claims.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
}

pub struct SessionVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
    internal_secret: Option<String>,
    crypto: Arc<CryptoEngine>,
}

impl SessionVerifier {
    pub fn new(jwt_secret: &str, internal_secret: Option<String>, crypto: Arc<CryptoEngine>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            validation,
            internal_secret: internal_secret.filter(|s| !s.is_empty()),
            crypto,
        }
    }

    /// Authenticate a request from its headers.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<AuthContext, AppError> {
        if let Some(provided) = header(headers, "x-internal-secret") {
            let user_id = header(headers, "x-user-id")
                .ok_or_else(|| AppError::Authentication("x-user-id header is required".into()))?;
            return self.verify_internal(provided, user_id);
        }

        let token = header(headers, "authorization")
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AppError::Authentication("missing bearer token".into()))?;

        self.verify_token(token)
    }

    pub fn verify_token(&self, token: &str) -> Result<AuthContext, AppError> {
        let data = decode::<SessionClaims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    AppError::Authentication("session expired".into())
                }
                _ => AppError::Authentication(format!("invalid session token: {e}")),
            }
        })?;

        let claims = data.claims;
        if claims.sub.trim().is_empty() {
            return Err(AppError::Authentication("session token has no subject".into()));
        }
        if let Some(iat) = claims.iat {
            if iat > Utc::now().timestamp() + 60 {
                return Err(AppError::Authentication("session token issued in the future".into()));
            }
        }

        Ok(AuthContext {
            user_id: claims.sub,
            auth_method: AuthMethod::Session,
        })
    }

    /// Verify a service call using the shared internal secret.
    pub fn verify_internal(&self, provided: &str, user_id: &str) -> Result<AuthContext, AppError> {
        let Some(expected) = self.internal_secret.as_deref() else {
            return Err(AppError::Authentication("internal auth is not enabled".into()));
        };
        if !self.crypto.secrets_match(provided, expected) {
            tracing::warn!("Rejected internal call with a bad shared secret");
            return Err(AppError::Authentication("invalid internal secret".into()));
        }
        if user_id.trim().is_empty() {
            return Err(AppError::Authentication("x-user-id header is required".into()));
        }

        Ok(AuthContext {
            user_id: user_id.to_string(),
            auth_method: AuthMethod::Internal,
        })
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
