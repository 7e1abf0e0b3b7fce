//! API route handlers for the social publishing service.
//!
//! All handlers receive `SharedState` via Axum state extraction. Every
//! endpoint except the OAuth callback and the health check authenticates the
//! caller through `SessionVerifier`.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::auth::AuthContext;
use crate::error::AppError;
use crate::providers::Platform;
use crate::publish::{PublishRequest, PublishResult, PublishStatus};
use crate::SharedState;

// =============================================================================
// V1 Router
// =============================================================================

pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        // ── Health ───────────────────────────────────────────────────────
        .route("/status", get(status))
        // ── OAuth ────────────────────────────────────────────────────────
        .route("/social/connect", post(connect))
        .route("/social/callback", get(callback))
        // ── Connections ──────────────────────────────────────────────────
        .route("/social/connections", get(connections))
        .route("/social/connections/{id}", delete(connection_delete))
        // ── Publishing ───────────────────────────────────────────────────
        .route("/social/publish", post(publish))
        .route("/social/publish/{external_id}", get(publish_resume))
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

async fn status(State(state): State<SharedState>) -> impl IntoResponse {
    let pending = state.publisher.tracker().pending_count().await;
    Json(json!({
        "status": "ok",
        "service": "social-publisher",
        "version": env!("CARGO_PKG_VERSION"),
        "platforms": state.registry.list(),
        "pending_publish_jobs": pending,
    }))
}

fn require_auth(state: &SharedState, headers: &HeaderMap) -> Result<AuthContext, AppError> {
    state.verifier.authenticate(headers)
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::Validation(rejection.body_text()))
}

// =============================================================================
// OAuth Endpoints
// =============================================================================

#[derive(Deserialize)]
struct ConnectBody {
    platform: Option<String>,
    #[serde(rename = "userId", alias = "user_id")]
    user_id: Option<String>,
}

/// `POST /v1/social/connect`: build the provider authorization URL.
///
/// The OAuth state is bound to the authenticated caller; a `userId` in the
/// body must name that same caller.
async fn connect(
    State(state): State<SharedState>,
    headers: HeaderMap,
    payload: Result<Json<ConnectBody>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let auth = require_auth(&state, &headers)?;
    let body = json_body(payload)?;

    if let Some(user_id) = body.user_id.as_deref().filter(|u| !u.trim().is_empty()) {
        if user_id != auth.user_id {
            warn!(caller = %auth.user_id, requested = user_id, "Connect requested for another user");
            return Err(AppError::Ownership);
        }
    }

    let platform = body
        .platform
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| AppError::Validation("platform is required".into()))?;

    let url = state.authorize.build_for(&platform, &auth.user_id)?;
    info!(user_id = %auth.user_id, platform = %platform, "Starting social connect");

    Ok(Json(json!({ "url": url })))
}

#[derive(Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// `GET /v1/social/callback`: provider redirect target.
///
/// Unauthenticated: the signed `state` is the only source of the user id.
/// Always answers with a redirect to the app's settings view.
async fn callback(State(state): State<SharedState>, Query(q): Query<CallbackQuery>) -> Response {
    let platform = q
        .state
        .as_deref()
        .and_then(|s| state.states.decode(s).ok())
        .map(|decoded| decoded.platform);

    let target = match complete_callback(&state, &q).await {
        Ok(platform) => state.config.settings_url(&[("connected", platform.as_str())]),
        Err(e) => {
            warn!(platform = ?platform, code = e.code(), "OAuth callback failed: {e}");
            let mut query = vec![("error", e.code())];
            if let Some(p) = platform {
                query.push(("platform", p.as_str()));
            }
            state.config.settings_url(&query)
        }
    };

    Redirect::to(&target).into_response()
}

async fn complete_callback(state: &SharedState, q: &CallbackQuery) -> Result<Platform, AppError> {
    if let Some(error) = &q.error {
        return Err(AppError::Authentication(format!(
            "authorization was not granted: {error} {}",
            q.error_description.as_deref().unwrap_or_default()
        )));
    }

    let raw_state = q
        .state
        .as_deref()
        .ok_or_else(|| AppError::MalformedState("missing".into()))?;
    let code = q
        .code
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::Validation("code is required".into()))?;

    let oauth_state = state.states.consume(raw_state)?;
    state
        .exchange
        .connect(
            state.store.as_ref(),
            oauth_state.platform,
            &oauth_state.user_id,
            code,
            state.authorize.redirect_uri(),
        )
        .await?;

    Ok(oauth_state.platform)
}

// =============================================================================
// Connection Endpoints
// =============================================================================

/// `GET /v1/social/connections`: the caller's connections, without secrets.
async fn connections(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    let auth = require_auth(&state, &headers)?;

    let connections: Vec<_> = state
        .store
        .list_for_user(&auth.user_id)
        .await?
        .iter()
        .map(|c| c.info())
        .collect();

    Ok(Json(json!({ "data": connections })))
}

/// `DELETE /v1/social/connections/{id}`: disconnect a platform.
///
/// Background publish watches for this connection stop on their next poll.
async fn connection_delete(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let auth = require_auth(&state, &headers)?;

    state.store.delete(&id, &auth.user_id).await?;
    info!(connection_id = %id, user_id = %auth.user_id, "Social account disconnected");

    Ok(Json(json!({ "data": { "success": true } })))
}

// =============================================================================
// Publish Endpoints
// =============================================================================

/// `POST /v1/social/publish`: publish a video through a connection.
///
/// Answers `published`, `failed`, or `pending` with an `external_id`. Pending
/// jobs keep being driven by a background watch.
async fn publish(
    State(state): State<SharedState>,
    headers: HeaderMap,
    payload: Result<Json<PublishRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let auth = require_auth(&state, &headers)?;
    let request = json_body(payload)?;
    let connection_id = request
        .connection_id
        .as_deref()
        .map(str::trim)
        .unwrap_or_default()
        .to_string();

    let result = state.publisher.publish(&auth.user_id, request).await?;

    if result.status == PublishStatus::Pending {
        let publisher = state.publisher.clone();
        let user_id = auth.user_id.clone();
        let pending = result.clone();
        tokio::spawn(async move {
            publisher.watch(&user_id, &connection_id, pending).await;
        });
    }

    Ok(publish_response(result))
}

#[derive(Deserialize)]
struct ResumeQuery {
    connection_id: Option<String>,
}

/// `GET /v1/social/publish/{external_id}`: current outcome of a publish job.
async fn publish_resume(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(external_id): Path<String>,
    Query(q): Query<ResumeQuery>,
) -> Result<Response, AppError> {
    let auth = require_auth(&state, &headers)?;
    let connection_id = q
        .connection_id
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| AppError::Validation("connection_id is required".into()))?;

    let result = state
        .publisher
        .resume(&auth.user_id, &connection_id, &external_id)
        .await?;

    Ok(publish_response(result))
}

fn publish_response(result: PublishResult) -> Response {
    match result.status {
        PublishStatus::Published => {
            (StatusCode::OK, Json(json!({ "success": true, "data": result }))).into_response()
        }
        PublishStatus::Pending => {
            (StatusCode::ACCEPTED, Json(json!({ "success": true, "data": result }))).into_response()
        }
        PublishStatus::Failed => {
            let error = result.error.clone();
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "success": false, "data": result, "error": error })),
            )
                .into_response()
        }
    }
}
