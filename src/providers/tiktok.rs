use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, warn};

use super::traits::{ContainerStep, OAuthProvider, PlatformAdapter, PlatformIdentity, TokenSet};
use super::{urlencoding, Platform};
use crate::config::PlatformCredentials;
use crate::error::AppError;
use crate::http::{read_json, HttpClient};

/// TikTok Login Kit + Content Posting API.
///
/// Quirks:
/// - Uses `client_key` instead of `client_id`.
/// - Token endpoint is form-encoded and may answer HTTP 200 with an
///   `error` / `error_description` body.
/// - API responses wrap results in `data` and report failures through an
///   `error.code` that is the string `"ok"` on success.
/// - Video publishing pulls the file from a caller-supplied URL; there is no
///   container step exposed to us.
pub struct TikTokProvider {
    client_key: String,
    client_secret: String,
    auth_url: String,
    api_base: String,
    privacy_level: String,
    http: HttpClient,
}

impl TikTokProvider {
    pub fn new(
        credentials: &PlatformCredentials,
        auth_url: &str,
        api_base: &str,
        privacy_level: &str,
        http: HttpClient,
    ) -> Self {
        Self {
            client_key: credentials.client_id.clone(),
            client_secret: credentials.client_secret.clone(),
            auth_url: auth_url.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            privacy_level: privacy_level.to_string(),
            http,
        }
    }

    fn token_endpoint(&self) -> String {
        format!("{}/v2/oauth/token/", self.api_base)
    }

    fn parse_token_response(body: Value) -> Result<TokenSet, AppError> {
        let access_token = body
            .get("access_token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty());

        let Some(access_token) = access_token else {
            return Err(AppError::ProviderToken(body.to_string()));
        };

        Ok(TokenSet {
            access_token: access_token.to_string(),
            refresh_token: body
                .get("refresh_token")
                .and_then(Value::as_str)
                .map(str::to_string),
            token_type: body
                .get("token_type")
                .and_then(Value::as_str)
                .unwrap_or("Bearer")
                .to_string(),
            expires_in: body.get("expires_in").and_then(Value::as_u64),
            scope: body.get("scope").and_then(Value::as_str).map(str::to_string),
        })
    }
}

/// TikTok reports API-level success as `{"error": {"code": "ok"}}`.
fn api_error_code(body: &Value) -> Option<&str> {
    body.pointer("/error/code").and_then(Value::as_str)
}

fn api_succeeded(body: &Value) -> bool {
    api_error_code(body) == Some("ok")
}

#[async_trait]
impl OAuthProvider for TikTokProvider {
    fn platform(&self) -> Platform {
        Platform::TikTok
    }

    fn scopes(&self) -> Vec<String> {
        vec![
            "user.info.basic".into(),
            "video.upload".into(),
            "video.publish".into(),
        ]
    }

    fn auth_url(&self, state: &str, redirect_uri: &str) -> String {
        format!(
            "{base}?client_key={client_key}\
             &scope={scope}\
             &response_type=code\
             &redirect_uri={redirect_uri}\
             &state={state}",
            base = self.auth_url,
            client_key = urlencoding(&self.client_key),
            scope = urlencoding(&self.scopes().join(",")),
            redirect_uri = urlencoding(redirect_uri),
            state = urlencoding(state),
        )
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenSet, AppError> {
        let request = self.http.post(self.token_endpoint()).form(&[
            ("client_key", self.client_key.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ]);

        let (status, body) = read_json(self.http.send(request).await?).await?;
        if !status.is_success() {
            return Err(AppError::ProviderToken(body.to_string()));
        }

        Self::parse_token_response(body)
    }

    async fn fetch_identity(&self, access_token: &str) -> Result<PlatformIdentity, AppError> {
        let request = self
            .http
            .get(format!("{}/v2/user/info/", self.api_base))
            .query(&[("fields", "open_id,union_id,avatar_url,display_name")])
            .bearer_auth(access_token);

        let (status, body) = read_json(self.http.send(request).await?).await?;
        if !status.is_success() || !api_succeeded(&body) {
            return Err(AppError::ProviderIdentity(body.to_string()));
        }

        let user = body
            .pointer("/data/user")
            .ok_or_else(|| AppError::ProviderIdentity(format!("missing data.user: {body}")))?;

        let open_id = user
            .get("open_id")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::ProviderIdentity(format!("missing open_id: {body}")))?;

        Ok(PlatformIdentity {
            platform_user_id: open_id.to_string(),
            platform_username: user
                .get("display_name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, AppError> {
        let request = self.http.post(self.token_endpoint()).form(&[
            ("client_key", self.client_key.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ]);

        let (status, body) = read_json(self.http.send(request).await?).await?;
        if !status.is_success() {
            return Err(AppError::RefreshFailed(body.to_string()));
        }

        Self::parse_token_response(body).map_err(|e| match e {
            AppError::ProviderToken(message) => AppError::RefreshFailed(message),
            other => other,
        })
    }

    fn supports_refresh(&self) -> bool {
        true
    }

    fn token_ttl(&self) -> Duration {
        Duration::from_secs(24 * 3600) // TikTok access tokens live 24 hours
    }
}

#[async_trait]
impl PlatformAdapter for TikTokProvider {
    async fn create_container(
        &self,
        access_token: &str,
        _platform_user_id: &str,
        video_url: &str,
        caption: &str,
    ) -> Result<ContainerStep, AppError> {
        let payload = json!({
            "post_info": {
                "title": caption,
                "privacy_level": self.privacy_level,
            },
            "source_info": {
                "source": "PULL_FROM_URL",
                "video_url": video_url,
            },
        });

        let request = self
            .http
            .post(format!("{}/v2/post/publish/video/init/", self.api_base))
            .bearer_auth(access_token)
            .json(&payload);

        let (status, body) = read_json(self.http.send(request).await?).await?;

        if !status.is_success() || !api_succeeded(&body) {
            let message = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .filter(|m| !m.is_empty())
                .or_else(|| api_error_code(&body))
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP {status}"));
            warn!(code = ?api_error_code(&body), "TikTok rejected publish init");
            return Err(AppError::ProviderPublish {
                message,
                payload: Some(body),
            });
        }

        let publish_id = body
            .pointer("/data/publish_id")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::ProviderPublish {
                message: "publish init response is missing data.publish_id".into(),
                payload: Some(body.clone()),
            })?;

        info!(publish_id, "TikTok accepted video for publishing");
        Ok(ContainerStep::Submitted {
            publish_id: publish_id.to_string(),
        })
    }
}
