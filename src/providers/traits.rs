use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::Platform;
use crate::error::AppError;

/// A set of tokens returned from a provider after code exchange or refresh.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Provider-side identity of the connected account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformIdentity {
    pub platform_user_id: String,
    pub platform_username: String,
}

/// OAuth half of a platform integration.
///
/// Each implementation handles the provider-specific quirks of the
/// authorization-code flow (authorization URL format, token endpoint wire
/// shape, identity lookup, refresh behavior).
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn platform(&self) -> Platform;

    /// Scopes requested on every authorization.
    fn scopes(&self) -> Vec<String>;

    /// Build the authorization URL that the user should be redirected to.
    ///
    /// - `state`: the signed state string produced by the state codec.
    /// - `redirect_uri`: the callback URL registered with the provider.
    fn auth_url(&self, state: &str, redirect_uri: &str) -> String;

    /// Exchange an authorization code for an access token (and optionally refresh token).
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenSet, AppError>;

    /// Resolve the provider account behind an access token.
    async fn fetch_identity(&self, access_token: &str) -> Result<PlatformIdentity, AppError>;

    /// Refresh an expiring access token. Providers without a refresh grant
    /// keep the default, which asks the user to reconnect.
    async fn refresh_token(&self, _refresh_token: &str) -> Result<TokenSet, AppError> {
        Err(AppError::RefreshUnsupported(self.platform()))
    }

    fn supports_refresh(&self) -> bool {
        false
    }

    /// Assumed token lifetime when the provider omits `expires_in`.
    fn token_ttl(&self) -> Duration {
        Duration::from_secs(3600)
    }
}

/// Result of the first publish step.
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerStep {
    /// A media container was staged and the provider is ingesting the video.
    Staged { container_id: String },
    /// The provider accepted creation and publish intent in a single call.
    Submitted { publish_id: String },
}

/// Provider-reported state of a staged media container.
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerStatus {
    InProgress,
    Ready,
    /// The container was already published (e.g. by an earlier attempt).
    Published,
    Failed { reason: String },
}

/// Outcome of asking the provider to publish a staged container.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishAttempt {
    Published { post_id: String },
    /// The provider is still processing the video; try again later.
    NotReady,
}

/// Publish half of a platform integration.
///
/// The orchestrator drives every platform through the same sequence: stage a
/// container, wait for readiness, publish. Platforms whose protocol collapses
/// these steps answer [`ContainerStep::Submitted`] from `create_container`.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    async fn create_container(
        &self,
        access_token: &str,
        platform_user_id: &str,
        video_url: &str,
        caption: &str,
    ) -> Result<ContainerStep, AppError>;

    /// Whether `create_container` can answer [`ContainerStep::Staged`].
    fn stages_containers(&self) -> bool {
        false
    }

    async fn container_status(
        &self,
        _access_token: &str,
        _container_id: &str,
    ) -> Result<ContainerStatus, AppError> {
        Err(AppError::Validation(
            "platform does not stage media containers".into(),
        ))
    }

    async fn publish_container(
        &self,
        _access_token: &str,
        _platform_user_id: &str,
        _container_id: &str,
    ) -> Result<PublishAttempt, AppError> {
        Err(AppError::Validation(
            "platform does not stage media containers".into(),
        ))
    }
}

/// A complete platform integration: OAuth plus publishing.
pub trait SocialProvider: OAuthProvider + PlatformAdapter {}

impl<T: OAuthProvider + PlatformAdapter> SocialProvider for T {}
