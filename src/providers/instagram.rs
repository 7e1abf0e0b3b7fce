use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use super::traits::{
    ContainerStatus, ContainerStep, OAuthProvider, PlatformAdapter, PlatformIdentity,
    PublishAttempt, TokenSet,
};
use super::{urlencoding, Platform};
use crate::config::PlatformCredentials;
use crate::error::AppError;
use crate::http::{read_json, HttpClient};

/// Graph API error code for "media ID is not available".
const MEDIA_NOT_READY_CODE: i64 = 9007;
/// Graph API subcode for "the media is not ready for publishing".
const MEDIA_NOT_READY_SUBCODE: i64 = 2207027;

/// Instagram publishing through the Facebook Graph API.
///
/// Quirks:
/// - Token exchange is a GET with the client credentials in the query string.
/// - No refresh token grant; users reconnect when the token lapses.
/// - Reels are published in two steps: a media container is created, the
///   provider ingests the video asynchronously, then `media_publish` is called
///   with the container id. Publishing too early fails with code 9007.
pub struct InstagramProvider {
    client_id: String,
    client_secret: String,
    auth_url: String,
    graph_base: String,
    http: HttpClient,
}

impl InstagramProvider {
    pub fn new(
        credentials: &PlatformCredentials,
        auth_url: &str,
        graph_base: &str,
        http: HttpClient,
    ) -> Self {
        Self {
            client_id: credentials.client_id.clone(),
            client_secret: credentials.client_secret.clone(),
            auth_url: auth_url.to_string(),
            graph_base: graph_base.trim_end_matches('/').to_string(),
            http,
        }
    }

    fn graph_error(body: &Value) -> Option<&Value> {
        body.get("error")
    }

    fn graph_error_message(body: &Value) -> String {
        body.pointer("/error/message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string())
    }

    fn is_not_ready(body: &Value) -> bool {
        let code = body.pointer("/error/code").and_then(Value::as_i64);
        let subcode = body.pointer("/error/error_subcode").and_then(Value::as_i64);
        code == Some(MEDIA_NOT_READY_CODE) || subcode == Some(MEDIA_NOT_READY_SUBCODE)
    }

    /// Server errors and Graph errors flagged `is_transient` clear up on retry.
    fn is_transient(status: StatusCode, body: &Value) -> bool {
        status.is_server_error()
            || body
                .pointer("/error/is_transient")
                .and_then(Value::as_bool)
                .unwrap_or(false)
    }

    fn publish_error(status: StatusCode, body: Value) -> AppError {
        let message = Self::graph_error_message(&body);
        if Self::is_transient(status, &body) {
            AppError::ProviderUnavailable {
                message,
                payload: Some(body),
            }
        } else {
            AppError::ProviderPublish {
                message,
                payload: Some(body),
            }
        }
    }
}

#[async_trait]
impl OAuthProvider for InstagramProvider {
    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    fn scopes(&self) -> Vec<String> {
        vec![
            "instagram_basic".into(),
            "instagram_content_publish".into(),
            "pages_show_list".into(),
        ]
    }

    fn auth_url(&self, state: &str, redirect_uri: &str) -> String {
        format!(
            "{base}?client_id={client_id}\
             &redirect_uri={redirect_uri}\
             &scope={scope}\
             &response_type=code\
             &state={state}",
            base = self.auth_url,
            client_id = urlencoding(&self.client_id),
            redirect_uri = urlencoding(redirect_uri),
            scope = urlencoding(&self.scopes().join(",")),
            state = urlencoding(state),
        )
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenSet, AppError> {
        let request = self
            .http
            .get(format!("{}/oauth/access_token", self.graph_base))
            .query(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ]);

        let (status, body) = read_json(self.http.send(request).await?).await?;
        if !status.is_success() || Self::graph_error(&body).is_some() {
            return Err(AppError::ProviderToken(Self::graph_error_message(&body)));
        }

        let access_token = body
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::ProviderToken(format!("missing access_token: {body}")))?;

        Ok(TokenSet {
            access_token: access_token.to_string(),
            refresh_token: None,
            token_type: body
                .get("token_type")
                .and_then(Value::as_str)
                .unwrap_or("bearer")
                .to_string(),
            expires_in: body.get("expires_in").and_then(Value::as_u64),
            scope: None,
        })
    }

    async fn fetch_identity(&self, access_token: &str) -> Result<PlatformIdentity, AppError> {
        let request = self
            .http
            .get(format!("{}/me", self.graph_base))
            .query(&[("fields", "id,name")])
            .bearer_auth(access_token);

        let (status, body) = read_json(self.http.send(request).await?).await?;
        if !status.is_success() || Self::graph_error(&body).is_some() {
            return Err(AppError::ProviderIdentity(Self::graph_error_message(&body)));
        }

        let id = body
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::ProviderIdentity(format!("missing id: {body}")))?;

        Ok(PlatformIdentity {
            platform_user_id: id.to_string(),
            platform_username: body
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }

    fn token_ttl(&self) -> Duration {
        Duration::from_secs(2 * 3600) // short-lived Graph tokens
    }
}

#[async_trait]
impl PlatformAdapter for InstagramProvider {
    async fn create_container(
        &self,
        access_token: &str,
        platform_user_id: &str,
        video_url: &str,
        caption: &str,
    ) -> Result<ContainerStep, AppError> {
        let request = self
            .http
            .post(format!("{}/{}/media", self.graph_base, platform_user_id))
            .bearer_auth(access_token)
            .form(&[
                ("media_type", "REELS"),
                ("video_url", video_url),
                ("caption", caption),
            ]);

        let (status, body) = read_json(self.http.send(request).await?).await?;
        if !status.is_success() || Self::graph_error(&body).is_some() {
            return Err(Self::publish_error(status, body));
        }

        let container_id = body
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::ProviderPublish {
                message: "container response is missing id".into(),
                payload: Some(body.clone()),
            })?;

        info!(container_id, "Instagram media container created");
        Ok(ContainerStep::Staged {
            container_id: container_id.to_string(),
        })
    }

    fn stages_containers(&self) -> bool {
        true
    }

    async fn container_status(
        &self,
        access_token: &str,
        container_id: &str,
    ) -> Result<ContainerStatus, AppError> {
        let request = self
            .http
            .get(format!("{}/{}", self.graph_base, container_id))
            .query(&[("fields", "status_code,status")])
            .bearer_auth(access_token);

        let (status, body) = read_json(self.http.send(request).await?).await?;
        if !status.is_success() || Self::graph_error(&body).is_some() {
            return Err(Self::publish_error(status, body));
        }

        let status_code = body
            .get("status_code")
            .and_then(Value::as_str)
            .unwrap_or("IN_PROGRESS");
        debug!(container_id, status_code, "Instagram container status");

        Ok(match status_code {
            "FINISHED" => ContainerStatus::Ready,
            "PUBLISHED" => ContainerStatus::Published,
            "ERROR" | "EXPIRED" => ContainerStatus::Failed {
                reason: body
                    .get("status")
                    .and_then(Value::as_str)
                    .unwrap_or(status_code)
                    .to_string(),
            },
            _ => ContainerStatus::InProgress,
        })
    }

    async fn publish_container(
        &self,
        access_token: &str,
        platform_user_id: &str,
        container_id: &str,
    ) -> Result<PublishAttempt, AppError> {
        let request = self
            .http
            .post(format!("{}/{}/media_publish", self.graph_base, platform_user_id))
            .bearer_auth(access_token)
            .form(&[("creation_id", container_id)]);

        let (status, body) = read_json(self.http.send(request).await?).await?;

        if Self::is_not_ready(&body) {
            debug!(container_id, "Instagram media not ready for publishing yet");
            return Ok(PublishAttempt::NotReady);
        }
        if !status.is_success() || Self::graph_error(&body).is_some() {
            return Err(Self::publish_error(status, body));
        }

        let post_id = body
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::ProviderPublish {
                message: "media_publish response is missing id".into(),
                payload: Some(body.clone()),
            })?;

        Ok(PublishAttempt::Published {
            post_id: post_id.to_string(),
        })
    }
}
