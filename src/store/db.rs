//! PostgreSQL-backed connection store.
//!
//! Tables:
//! - `social_connections`: encrypted tokens per (user_id, platform)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;

use super::{ConnectionStore, ConnectionUpsert, SocialConnection};
use crate::crypto::CryptoEngine;
use crate::error::AppError;

const SELECT_COLUMNS: &str = r#"
    id::text, user_id, platform, platform_user_id, platform_username,
    access_token, refresh_token, expires_at, created_at, updated_at
"#;

/// Connection store backed by PostgreSQL. Tokens are encrypted at rest.
pub struct PgConnectionStore {
    pool: PgPool,
    crypto: Arc<CryptoEngine>,
}

impl PgConnectionStore {
    pub async fn new(db_url: &str, crypto: Arc<CryptoEngine>) -> Result<Self, AppError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(20)
            .connect(db_url)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to PostgreSQL: {e}")))?;

        Ok(Self { pool, crypto })
    }

    /// Run schema migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS social_connections (
                id                 UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                user_id            TEXT NOT NULL,
                platform           TEXT NOT NULL,
                platform_user_id   TEXT NOT NULL DEFAULT '',
                platform_username  TEXT NOT NULL DEFAULT '',
                access_token       TEXT NOT NULL,
                refresh_token      TEXT,
                expires_at         TIMESTAMPTZ NOT NULL,
                created_at         TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at         TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE(user_id, platform)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_social_connections_expiry ON social_connections(expires_at) WHERE refresh_token IS NOT NULL",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_connection(&self, row: &PgRow) -> Result<SocialConnection, AppError> {
        let platform: String = row.try_get("platform")?;
        let enc_access: String = row.try_get("access_token")?;
        let enc_refresh: Option<String> = row.try_get("refresh_token")?;

        let refresh_token = match enc_refresh {
            Some(ref rt) if !rt.is_empty() => Some(self.crypto.decrypt(rt)?),
            _ => None,
        };

        Ok(SocialConnection {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            platform: platform
                .parse()
                .map_err(|_| AppError::Database(format!("unknown platform '{platform}' in store")))?,
            platform_user_id: row.try_get("platform_user_id")?,
            platform_username: row.try_get("platform_username")?,
            access_token: self.crypto.decrypt(&enc_access)?,
            refresh_token,
            expires_at: row.try_get::<DateTime<Utc>, _>("expires_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl ConnectionStore for PgConnectionStore {
    async fn upsert(&self, conn: &ConnectionUpsert) -> Result<SocialConnection, AppError> {
        let enc_access = self.crypto.encrypt(&conn.access_token)?;
        let enc_refresh = match &conn.refresh_token {
            Some(rt) => Some(self.crypto.encrypt(rt)?),
            None => None,
        };

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO social_connections
                (user_id, platform, platform_user_id, platform_username,
                 access_token, refresh_token, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id, platform)
            DO UPDATE SET
                platform_user_id = EXCLUDED.platform_user_id,
                platform_username = EXCLUDED.platform_username,
                access_token = EXCLUDED.access_token,
                refresh_token = EXCLUDED.refresh_token,
                expires_at = EXCLUDED.expires_at,
                updated_at = NOW()
            RETURNING {SELECT_COLUMNS}
            "#
        ))
        .bind(&conn.user_id)
        .bind(conn.platform.as_str())
        .bind(&conn.platform_user_id)
        .bind(&conn.platform_username)
        .bind(&enc_access)
        .bind(&enc_refresh)
        .bind(conn.expires_at)
        .fetch_one(&self.pool)
        .await?;

        self.row_to_connection(&row)
    }

    async fn find(&self, connection_id: &str) -> Result<Option<SocialConnection>, AppError> {
        let Ok(id) = uuid::Uuid::parse_str(connection_id) else {
            return Ok(None);
        };

        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM social_connections WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| self.row_to_connection(&r)).transpose()
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<SocialConnection>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM social_connections WHERE user_id = $1 ORDER BY updated_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|r| self.row_to_connection(r)).collect()
    }

    async fn delete(&self, connection_id: &str, user_id: &str) -> Result<(), AppError> {
        // Distinguish "missing" from "someone else's" the same way reads do.
        self.get_for_use(connection_id, user_id).await?;

        let id = uuid::Uuid::parse_str(connection_id)
            .map_err(|_| AppError::NotFound("connection".into()))?;

        let affected = sqlx::query("DELETE FROM social_connections WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if affected == 0 {
            return Err(AppError::NotFound("connection".into()));
        }

        Ok(())
    }

    async fn list_expiring(&self, within: Duration) -> Result<Vec<SocialConnection>, AppError> {
        let cutoff = Utc::now()
            + chrono::Duration::from_std(within)
                .map_err(|e| AppError::Internal(format!("invalid refresh window: {e}")))?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM social_connections
            WHERE expires_at < $1
              AND refresh_token IS NOT NULL
            "#
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|r| self.row_to_connection(r)).collect()
    }
}
