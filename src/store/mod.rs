//! Connection store: one credential record per (user, platform).
//!
//! Two backends implement [`ConnectionStore`]: PostgreSQL for deployments and
//! an in-memory map for local development and tests. Both run lookups with the
//! service's own credentials; ownership is checked against the caller's
//! identity after the record is loaded, never delegated to the caller.

pub mod db;
pub mod memory;
pub mod refresh;

pub use db::PgConnectionStore;
pub use memory::MemoryConnectionStore;
pub use refresh::{refresh_daemon, TokenRefresher};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::error::AppError;
use crate::providers::Platform;

/// A linked social account with its (decrypted) credentials.
#[derive(Clone, PartialEq)]
pub struct SocialConnection {
    pub id: String,
    pub user_id: String,
    pub platform: Platform,
    pub platform_user_id: String,
    pub platform_username: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for SocialConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocialConnection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("platform", &self.platform)
            .field("platform_user_id", &self.platform_user_id)
            .field("platform_username", &self.platform_username)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl SocialConnection {
    /// True when the token expires within `margin` of now (or already has).
    pub fn expires_within(&self, margin: Duration) -> bool {
        let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::zero());
        self.expires_at <= Utc::now() + margin
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Metadata safe to return to API callers.
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id.clone(),
            platform: self.platform,
            platform_user_id: self.platform_user_id.clone(),
            platform_username: self.platform_username.clone(),
            expires_at: self.expires_at,
            is_expired: self.is_expired(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// The full record as an upsert, for writes that replace tokens.
    pub fn to_upsert(&self) -> ConnectionUpsert {
        ConnectionUpsert {
            user_id: self.user_id.clone(),
            platform: self.platform,
            platform_user_id: self.platform_user_id.clone(),
            platform_username: self.platform_username.clone(),
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            expires_at: self.expires_at,
        }
    }
}

/// Full replacement record keyed by `(user_id, platform)`.
#[derive(Clone)]
pub struct ConnectionUpsert {
    pub user_id: String,
    pub platform: Platform,
    pub platform_user_id: String,
    pub platform_username: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub id: String,
    pub platform: Platform,
    pub platform_user_id: String,
    pub platform_username: String,
    pub expires_at: DateTime<Utc>,
    pub is_expired: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Insert or atomically replace the record for `(user_id, platform)`.
    /// The connection id survives replacement.
    async fn upsert(&self, conn: &ConnectionUpsert) -> Result<SocialConnection, AppError>;

    /// Privileged lookup by id, without any ownership check.
    async fn find(&self, connection_id: &str) -> Result<Option<SocialConnection>, AppError>;

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<SocialConnection>, AppError>;

    /// Remove a connection owned by `user_id`.
    async fn delete(&self, connection_id: &str, user_id: &str) -> Result<(), AppError>;

    /// Connections with a refresh token whose access token expires within `within`.
    async fn list_expiring(&self, within: Duration) -> Result<Vec<SocialConnection>, AppError>;

    /// Load a connection on behalf of `requesting_user_id`.
    ///
    /// Fails with `NotFound` when no record exists and with `Ownership` when
    /// the record belongs to someone else.
    async fn get_for_use(
        &self,
        connection_id: &str,
        requesting_user_id: &str,
    ) -> Result<SocialConnection, AppError> {
        let conn = self
            .find(connection_id)
            .await?
            .ok_or_else(|| AppError::NotFound("connection".into()))?;

        if conn.user_id != requesting_user_id {
            tracing::warn!(
                connection_id,
                requesting_user_id,
                "Rejected access to another user's connection"
            );
            return Err(AppError::Ownership);
        }

        Ok(conn)
    }
}
