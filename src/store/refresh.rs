//! Token refresh: the publish-path precondition and the background daemon.
//!
//! The daemon wakes every `refresh_interval`, finds refreshable tokens that
//! expire within twice the safety margin, and refreshes them ahead of use.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::{ConnectionStore, SocialConnection};
use crate::error::AppError;
use crate::providers::ProviderRegistry;

/// Makes sure a connection's access token is usable before it is sent to a provider.
#[derive(Clone)]
pub struct TokenRefresher {
    store: Arc<dyn ConnectionStore>,
    registry: Arc<ProviderRegistry>,
    margin: Duration,
}

impl TokenRefresher {
    pub fn new(
        store: Arc<dyn ConnectionStore>,
        registry: Arc<ProviderRegistry>,
        margin: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            margin,
        }
    }

    pub fn margin(&self) -> Duration {
        self.margin
    }

    /// Return the connection unchanged when its token is comfortably valid;
    /// otherwise refresh it, persist the new tokens and return the updated record.
    ///
    /// A token inside the margin that cannot be refreshed is rejected with
    /// [`AppError::RefreshUnsupported`] so the user reconnects before it lapses
    /// mid-publish.
    pub async fn ensure_fresh(&self, conn: SocialConnection) -> Result<SocialConnection, AppError> {
        if !conn.expires_within(self.margin) {
            return Ok(conn);
        }

        let provider = self.registry.require(conn.platform)?;

        let refresh_token = match (&conn.refresh_token, provider.supports_refresh()) {
            (Some(rt), true) => rt.clone(),
            _ => {
                warn!(
                    connection_id = %conn.id,
                    platform = %conn.platform,
                    expires_at = %conn.expires_at,
                    "Token near expiry and cannot be refreshed"
                );
                return Err(AppError::RefreshUnsupported(conn.platform));
            }
        };

        self.refresh_with(conn, &refresh_token).await
    }

    async fn refresh_with(
        &self,
        conn: SocialConnection,
        refresh_token: &str,
    ) -> Result<SocialConnection, AppError> {
        let provider = self.registry.require(conn.platform)?;

        let tokens = provider.refresh_token(refresh_token).await.map_err(|e| {
            error!(connection_id = %conn.id, platform = %conn.platform, "Token refresh failed: {e}");
            match e {
                AppError::Network(_) | AppError::RefreshUnsupported(_) | AppError::RefreshFailed(_) => e,
                other => AppError::RefreshFailed(other.to_string()),
            }
        })?;

        let ttl = tokens
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or_else(|| provider.token_ttl());

        let mut update = conn.to_upsert();
        update.access_token = tokens.access_token;
        if let Some(rt) = tokens.refresh_token {
            update.refresh_token = Some(rt);
        }
        update.expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(1));

        let refreshed = self.store.upsert(&update).await?;
        info!(
            connection_id = %refreshed.id,
            platform = %refreshed.platform,
            expires_at = %refreshed.expires_at,
            "Refreshed access token"
        );
        Ok(refreshed)
    }
}

/// Start the refresh daemon loop.
pub async fn refresh_daemon(
    store: Arc<dyn ConnectionStore>,
    refresher: TokenRefresher,
    interval: Duration,
) {
    info!("Token refresh daemon started (interval: {}s)", interval.as_secs());

    loop {
        tokio::time::sleep(interval).await;
        if let Err(e) = refresh_cycle(store.as_ref(), &refresher).await {
            error!("Refresh cycle error: {e}");
        }
    }
}

async fn refresh_cycle(
    store: &dyn ConnectionStore,
    refresher: &TokenRefresher,
) -> Result<(), AppError> {
    let expiring = store.list_expiring(refresher.margin() * 2).await?;

    if expiring.is_empty() {
        return Ok(());
    }

    info!("Found {} connections to refresh", expiring.len());

    for conn in expiring {
        let Some(refresh_token) = conn.refresh_token.clone() else {
            continue;
        };
        let id = conn.id.clone();
        if let Err(e) = refresher.refresh_with(conn, &refresh_token).await {
            warn!(connection_id = %id, "Background refresh failed: {e}");
        }
    }

    Ok(())
}
