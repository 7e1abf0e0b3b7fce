use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::AppError;
use crate::providers::{Platform, PlatformIdentity, ProviderRegistry, TokenSet};
use crate::store::{ConnectionStore, ConnectionUpsert, SocialConnection};

/// Exchanges authorization codes and resolves the connected account.
///
/// Network failures are already retried by the shared HTTP client; provider
/// rejections come back as `ProviderToken` / `ProviderIdentity` and are not
/// retried.
pub struct TokenExchangeClient {
    registry: Arc<ProviderRegistry>,
}

impl TokenExchangeClient {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    pub async fn exchange(
        &self,
        platform: Platform,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenSet, AppError> {
        if code.trim().is_empty() {
            return Err(AppError::Validation("authorization code is required".into()));
        }
        let provider = self.registry.require(platform)?;
        provider.exchange_code(code, redirect_uri).await
    }

    pub async fn resolve_identity(
        &self,
        platform: Platform,
        access_token: &str,
    ) -> Result<PlatformIdentity, AppError> {
        let provider = self.registry.require(platform)?;
        provider.fetch_identity(access_token).await
    }

    /// Full callback path: exchange the code, resolve identity and upsert the
    /// connection for `user_id`.
    pub async fn connect(
        &self,
        store: &dyn ConnectionStore,
        platform: Platform,
        user_id: &str,
        code: &str,
        redirect_uri: &str,
    ) -> Result<SocialConnection, AppError> {
        let tokens = self.exchange(platform, code, redirect_uri).await?;
        let identity = self.resolve_identity(platform, &tokens.access_token).await?;

        let ttl = match tokens.expires_in {
            Some(secs) => Duration::from_secs(secs),
            None => self.registry.require(platform)?.token_ttl(),
        };
        let expires_at =
            Utc::now() + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(1));

        let conn = store
            .upsert(&ConnectionUpsert {
                user_id: user_id.to_string(),
                platform,
                platform_user_id: identity.platform_user_id,
                platform_username: identity.platform_username,
                access_token: tokens.access_token,
                refresh_token: tokens.refresh_token,
                expires_at,
            })
            .await?;

        info!(
            connection_id = %conn.id,
            user_id,
            platform = %platform,
            platform_username = %conn.platform_username,
            "Social account connected"
        );
        Ok(conn)
    }
}
