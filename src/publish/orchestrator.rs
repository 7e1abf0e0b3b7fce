use std::sync::Arc;
use tracing::{info, warn};

use super::job::{JobRun, JobState, PublishRequest, PublishResult};
use super::poll::Backoff;
use super::tracker::JobTracker;
use crate::config::{PollSettings, PublishSettings};
use crate::error::AppError;
use crate::providers::{
    ContainerStatus, ContainerStep, Platform, ProviderRegistry, PublishAttempt, SocialProvider,
};
use crate::store::{ConnectionStore, SocialConnection, TokenRefresher};

/// What to report when the readiness budget runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnExhausted {
    /// Hand the job back to the caller as `pending`.
    Pending,
    /// The job is over: fail with `ReadinessTimeout`.
    Timeout,
}

/// Drives publish jobs through the state machine for any registered platform.
///
/// The publish request itself only waits for readiness briefly (`inline`
/// budget). Jobs still pending after that are driven by [`watch`] with the
/// full `background` budget, typically on a spawned task.
///
/// [`watch`]: PublishOrchestrator::watch
#[derive(Clone)]
pub struct PublishOrchestrator {
    store: Arc<dyn ConnectionStore>,
    registry: Arc<ProviderRegistry>,
    refresher: TokenRefresher,
    tracker: Arc<JobTracker>,
    settings: PublishSettings,
}

impl PublishOrchestrator {
    pub fn new(
        store: Arc<dyn ConnectionStore>,
        registry: Arc<ProviderRegistry>,
        refresher: TokenRefresher,
        tracker: Arc<JobTracker>,
        settings: PublishSettings,
    ) -> Self {
        Self {
            store,
            registry,
            refresher,
            tracker,
            settings,
        }
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    /// Publish a video on behalf of `user_id`.
    ///
    /// Request, ownership and token problems are returned as errors before a
    /// job exists. Once the provider has been contacted every outcome,
    /// including provider rejections, is a [`PublishResult`].
    pub async fn publish(
        &self,
        user_id: &str,
        request: PublishRequest,
    ) -> Result<PublishResult, AppError> {
        let job = request.validate()?;

        let conn = self.store.get_for_use(&job.connection_id, user_id).await?;
        if conn.platform != job.platform {
            return Err(AppError::Validation(format!(
                "connection {} is a {} connection, not {}",
                conn.id, conn.platform, job.platform
            )));
        }
        let provider = self.registry.require(job.platform)?;
        let conn = self.refresher.ensure_fresh(conn).await?;

        let mut run = JobRun::new(job.platform, &conn.id);
        let step = match provider
            .create_container(
                &conn.access_token,
                &conn.platform_user_id,
                &job.video_url,
                &job.caption,
            )
            .await
        {
            Ok(step) => step,
            Err(e) => return Ok(run.fail(e)),
        };

        let result = match step {
            ContainerStep::Submitted { publish_id } => {
                run.set_external_id(&publish_id);
                match run.advance(JobState::Publishing) {
                    Ok(()) => run.published(None),
                    Err(e) => run.fail(e),
                }
            }
            ContainerStep::Staged { container_id } => {
                run.set_external_id(&container_id);
                match run.advance(JobState::ContainerPending) {
                    Ok(()) => {
                        self.drive(
                            provider.as_ref(),
                            conn.clone(),
                            run,
                            self.settings.inline,
                            OnExhausted::Pending,
                        )
                        .await
                    }
                    Err(e) => run.fail(e),
                }
            }
        };

        info!(
            connection_id = %conn.id,
            platform = %job.platform,
            status = ?result.status,
            external_id = ?result.external_id,
            "Publish request finished"
        );
        self.tracker.record(user_id, &conn.id, &result).await;
        Ok(result)
    }

    /// Drive a `pending` result from [`publish`] to a terminal one with the
    /// background budget and record the outcome. Abandons the job if the
    /// connection disappears.
    ///
    /// [`publish`]: PublishOrchestrator::publish
    pub async fn watch(&self, user_id: &str, connection_id: &str, pending: PublishResult) -> PublishResult {
        let Some(external_id) = pending.external_id.clone() else {
            return pending;
        };
        if pending.is_terminal() {
            return pending;
        }

        self.tracker.start_watch(user_id, connection_id, &pending).await;
        let result = self
            .watch_inner(user_id, connection_id, pending.platform, &external_id)
            .await;
        self.tracker.record(user_id, connection_id, &result).await;
        result
    }

    async fn watch_inner(
        &self,
        user_id: &str,
        connection_id: &str,
        platform: Platform,
        external_id: &str,
    ) -> PublishResult {
        let run = JobRun::resumed(platform, connection_id, external_id);

        let conn = match self.store.get_for_use(connection_id, user_id).await {
            Ok(conn) => conn,
            Err(e) => return run.fail(e),
        };
        let provider = match self.registry.require(platform) {
            Ok(provider) => provider,
            Err(e) => return run.fail(e),
        };
        let conn = match self.refresher.ensure_fresh(conn).await {
            Ok(conn) => conn,
            Err(e) => return run.fail(e),
        };

        info!(connection_id, external_id, "Watching publish job in the background");
        self.drive(
            provider.as_ref(),
            conn,
            run,
            self.settings.background,
            OnExhausted::Timeout,
        )
        .await
    }

    /// Resume a job from its provider id alone.
    ///
    /// A job known to this process reports its tracked outcome while a watch
    /// owns it; otherwise the provider is asked once, without waiting.
    pub async fn resume(
        &self,
        user_id: &str,
        connection_id: &str,
        external_id: &str,
    ) -> Result<PublishResult, AppError> {
        let conn = self.store.get_for_use(connection_id, user_id).await?;

        if let Some(tracked) = self.tracker.get(external_id).await {
            if tracked.connection_id != conn.id {
                return Err(AppError::NotFound("publish job".into()));
            }
            if tracked.result.is_terminal() || tracked.watching {
                return Ok(tracked.result);
            }
        }

        let provider = self.registry.require(conn.platform)?;
        if !provider.stages_containers() {
            return Err(AppError::Validation(format!(
                "{} publish jobs cannot be resumed",
                conn.platform.display_name()
            )));
        }
        let conn = self.refresher.ensure_fresh(conn).await?;

        let run = JobRun::resumed(conn.platform, &conn.id, external_id);
        let probe = PollSettings {
            max_attempts: 0,
            ..self.settings.inline
        };
        let result = self
            .drive(provider.as_ref(), conn, run, probe, OnExhausted::Pending)
            .await;

        self.tracker.record(user_id, connection_id, &result).await;
        Ok(result)
    }

    /// The readiness loop shared by publish, watch and resume.
    ///
    /// Each round tries `media_publish`; on "not ready" it backs off, checks the
    /// connection still exists, and polls the container status.
    async fn drive(
        &self,
        provider: &dyn SocialProvider,
        mut conn: SocialConnection,
        mut run: JobRun,
        settings: PollSettings,
        on_exhausted: OnExhausted,
    ) -> PublishResult {
        let Some(container_id) = run.external_id().map(str::to_string) else {
            return run.fail(AppError::Internal("staged job without container id".into()));
        };
        let mut backoff = Backoff::new(settings);

        loop {
            match provider
                .publish_container(&conn.access_token, &conn.platform_user_id, &container_id)
                .await
            {
                Ok(PublishAttempt::Published { post_id }) => {
                    return match confirm_ready(&mut run).and_then(|_| run.advance(JobState::Publishing)) {
                        Ok(()) => run.published(Some(post_id)),
                        Err(e) => run.fail(e),
                    };
                }
                Ok(PublishAttempt::NotReady) => {}
                Err(e) if e.is_retryable() => {
                    // The container status tells whether the attempt went through.
                    warn!(container_id = %container_id, attempt = backoff.attempts(), "Publish attempt failed: {e}");
                }
                Err(e) => return run.fail(e),
            }

            // Wait until the container reports ready, then try publishing again.
            loop {
                if !backoff.wait().await {
                    return match on_exhausted {
                        OnExhausted::Pending => run.pending(),
                        OnExhausted::Timeout => run.fail(AppError::ReadinessTimeout {
                            container_id: container_id.clone(),
                        }),
                    };
                }

                match self.store.find(&conn.id).await {
                    Ok(Some(latest)) => conn = latest,
                    Ok(None) => {
                        info!(
                            connection_id = %conn.id,
                            container_id = %container_id,
                            "Connection removed, abandoning publish job"
                        );
                        return run.fail(AppError::NotFound("connection".into()));
                    }
                    Err(e) => warn!(connection_id = %conn.id, "Could not re-read connection: {e}"),
                }

                match provider.container_status(&conn.access_token, &container_id).await {
                    Ok(ContainerStatus::Ready) => {
                        if let Err(e) = confirm_ready(&mut run) {
                            return run.fail(e);
                        }
                        break;
                    }
                    Ok(ContainerStatus::Published) => {
                        // Published by an earlier attempt; the media id is not reported here.
                        return match confirm_ready(&mut run).and_then(|_| run.advance(JobState::Publishing)) {
                            Ok(()) => run.published(None),
                            Err(e) => run.fail(e),
                        };
                    }
                    Ok(ContainerStatus::Failed { reason }) => {
                        return run.fail(AppError::ProviderPublish {
                            message: format!("container {container_id} failed: {reason}"),
                            payload: None,
                        });
                    }
                    Ok(ContainerStatus::InProgress) => {}
                    Err(e) if e.is_retryable() => {
                        warn!(container_id = %container_id, attempt = backoff.attempts(), "Status poll failed: {e}");
                    }
                    Err(e) => return run.fail(e),
                }
            }
        }
    }
}

fn confirm_ready(run: &mut JobRun) -> Result<(), AppError> {
    if run.state() == JobState::ContainerPending {
        run.advance(JobState::ContainerReady)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlatformCredentials;
    use crate::http::HttpClient;
    use crate::providers::{InstagramProvider, TikTokProvider};
    use crate::publish::PublishStatus;
    use crate::store::{ConnectionUpsert, MemoryConnectionStore};
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn poll(max_attempts: u32, backoff_ms: u64) -> PollSettings {
        PollSettings {
            max_attempts,
            initial_backoff: Duration::from_millis(backoff_ms),
            max_backoff: Duration::from_millis(backoff_ms * 4),
            timeout: Duration::from_secs(5),
        }
    }

    struct Harness {
        store: Arc<MemoryConnectionStore>,
        orchestrator: PublishOrchestrator,
    }

    fn harness(server: &MockServer, inline: PollSettings, background: PollSettings) -> Harness {
        let http = HttpClient::builder().max_attempts(1).build().unwrap();
        let credentials = PlatformCredentials {
            client_id: "client".into(),
            client_secret: "secret".into(),
        };
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(TikTokProvider::new(
            &credentials,
            "https://www.tiktok.com/v2/auth/authorize/",
            &server.uri(),
            "SELF_ONLY",
            http.clone(),
        )));
        registry.register(Arc::new(InstagramProvider::new(
            &credentials,
            "https://www.facebook.com/v18.0/dialog/oauth",
            &server.uri(),
            http,
        )));
        let registry = Arc::new(registry);

        let store = Arc::new(MemoryConnectionStore::new());
        let refresher = TokenRefresher::new(store.clone(), registry.clone(), Duration::from_secs(300));
        let orchestrator = PublishOrchestrator::new(
            store.clone(),
            registry,
            refresher,
            Arc::new(JobTracker::new(background.timeout)),
            PublishSettings { inline, background },
        );
        Harness { store, orchestrator }
    }

    async fn connect(
        store: &MemoryConnectionStore,
        platform: Platform,
        expires_in: chrono::Duration,
        refresh_token: Option<&str>,
    ) -> SocialConnection {
        store
            .upsert(&ConnectionUpsert {
                user_id: "u1".into(),
                platform,
                platform_user_id: "ig-1".into(),
                platform_username: "Jane".into(),
                access_token: "old-access".into(),
                refresh_token: refresh_token.map(str::to_string),
                expires_at: Utc::now() + expires_in,
            })
            .await
            .unwrap()
    }

    fn request(conn: &SocialConnection) -> PublishRequest {
        PublishRequest {
            connection_id: Some(conn.id.clone()),
            platform: Some(conn.platform.to_string()),
            video_url: Some("https://cdn.example.com/tour.mp4".into()),
            caption: Some("Open house Saturday".into()),
        }
    }

    fn not_ready() -> ResponseTemplate {
        ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "message": "Media ID is not available",
                "type": "OAuthException",
                "code": 9007,
                "error_subcode": 2207027
            }
        }))
    }

    async fn mount_container(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/ig-1/media"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "c-1" })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn missing_fields_fail_before_any_network_call() {
        let server = MockServer::start().await;
        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let h = harness(&server, poll(0, 1), poll(0, 1));
        let conn = connect(&h.store, Platform::Instagram, chrono::Duration::days(30), None).await;

        for strip in 0..3 {
            let mut req = request(&conn);
            match strip {
                0 => req.connection_id = None,
                1 => req.video_url = None,
                _ => req.platform = None,
            }
            let err = h.orchestrator.publish("u1", req).await.unwrap_err();
            assert!(matches!(err, AppError::Validation(_)), "{err:?}");
        }
    }

    #[tokio::test]
    async fn another_users_connection_is_rejected() {
        let server = MockServer::start().await;
        let h = harness(&server, poll(0, 1), poll(0, 1));
        let conn = connect(&h.store, Platform::Instagram, chrono::Duration::days(30), None).await;

        let err = h.orchestrator.publish("u2", request(&conn)).await.unwrap_err();
        assert!(matches!(err, AppError::Ownership));
    }

    #[tokio::test]
    async fn platform_must_match_the_connection() {
        let server = MockServer::start().await;
        let h = harness(&server, poll(0, 1), poll(0, 1));
        let conn = connect(&h.store, Platform::Instagram, chrono::Duration::days(30), None).await;

        let mut req = request(&conn);
        req.platform = Some("tiktok".into());
        let err = h.orchestrator.publish("u1", req).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn instagram_not_ready_is_pending_then_resume_publishes() {
        let server = MockServer::start().await;
        mount_container(&server).await;
        Mock::given(method("POST"))
            .and(path("/ig-1/media_publish"))
            .respond_with(not_ready())
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/ig-1/media_publish"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "post-1" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/c-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status_code": "IN_PROGRESS",
                "id": "c-1"
            })))
            .mount(&server)
            .await;

        let h = harness(&server, poll(2, 1), poll(2, 1));
        let conn = connect(&h.store, Platform::Instagram, chrono::Duration::days(30), None).await;

        let pending = h.orchestrator.publish("u1", request(&conn)).await.unwrap();
        assert_eq!(pending.status, PublishStatus::Pending);
        assert_eq!(pending.state, JobState::ContainerPending);
        assert_eq!(pending.external_id.as_deref(), Some("c-1"));
        assert!(pending.error.is_none());

        let resumed = h.orchestrator.resume("u1", &conn.id, "c-1").await.unwrap();
        assert_eq!(resumed.status, PublishStatus::Published);
        assert_eq!(resumed.post_id.as_deref(), Some("post-1"));
        assert_eq!(resumed.external_id.as_deref(), Some("c-1"));

        let tracked = h.orchestrator.tracker().get("c-1").await.unwrap();
        assert_eq!(tracked.result.status, PublishStatus::Published);
    }

    #[tokio::test]
    async fn readiness_confirmation_leads_to_publish_within_the_request() {
        let server = MockServer::start().await;
        mount_container(&server).await;
        Mock::given(method("POST"))
            .and(path("/ig-1/media_publish"))
            .respond_with(not_ready())
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/ig-1/media_publish"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "post-9" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/c-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status_code": "FINISHED"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let h = harness(&server, poll(3, 1), poll(3, 1));
        let conn = connect(&h.store, Platform::Instagram, chrono::Duration::days(30), None).await;

        let result = h.orchestrator.publish("u1", request(&conn)).await.unwrap();
        assert_eq!(result.status, PublishStatus::Published);
        assert_eq!(result.state, JobState::Published);
        assert_eq!(result.post_id.as_deref(), Some("post-9"));
    }

    #[tokio::test]
    async fn transient_status_errors_spend_a_poll_instead_of_failing() {
        let server = MockServer::start().await;
        mount_container(&server).await;
        Mock::given(method("POST"))
            .and(path("/ig-1/media_publish"))
            .respond_with(not_ready())
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/ig-1/media_publish"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "post-3" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/c-1"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "error": { "message": "An unexpected error has occurred", "code": 2, "is_transient": true }
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/c-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status_code": "FINISHED"
            })))
            .mount(&server)
            .await;

        let h = harness(&server, poll(5, 1), poll(5, 1));
        let conn = connect(&h.store, Platform::Instagram, chrono::Duration::days(30), None).await;

        let result = h.orchestrator.publish("u1", request(&conn)).await.unwrap();
        assert_eq!(result.status, PublishStatus::Published);
        assert_eq!(result.post_id.as_deref(), Some("post-3"));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn transient_publish_error_is_settled_by_the_container_status() {
        let server = MockServer::start().await;
        mount_container(&server).await;
        Mock::given(method("POST"))
            .and(path("/ig-1/media_publish"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/c-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status_code": "PUBLISHED"
            })))
            .mount(&server)
            .await;

        let h = harness(&server, poll(3, 1), poll(3, 1));
        let conn = connect(&h.store, Platform::Instagram, chrono::Duration::days(30), None).await;

        let result = h.orchestrator.publish("u1", request(&conn)).await.unwrap();
        assert_eq!(result.status, PublishStatus::Published);
        assert_eq!(result.state, JobState::Published);
    }

    #[tokio::test]
    async fn container_error_status_fails_the_job() {
        let server = MockServer::start().await;
        mount_container(&server).await;
        Mock::given(method("POST"))
            .and(path("/ig-1/media_publish"))
            .respond_with(not_ready())
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/c-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status_code": "ERROR",
                "status": "Error: unsupported video codec"
            })))
            .mount(&server)
            .await;

        let h = harness(&server, poll(3, 1), poll(3, 1));
        let conn = connect(&h.store, Platform::Instagram, chrono::Duration::days(30), None).await;

        let result = h.orchestrator.publish("u1", request(&conn)).await.unwrap();
        assert_eq!(result.status, PublishStatus::Failed);
        let error = result.error.unwrap();
        assert_eq!(error.code, "provider_publish_error");
        assert!(error.message.contains("unsupported video codec"));
    }

    #[tokio::test]
    async fn exhausted_background_budget_is_a_readiness_timeout() {
        let server = MockServer::start().await;
        mount_container(&server).await;
        Mock::given(method("POST"))
            .and(path("/ig-1/media_publish"))
            .respond_with(not_ready())
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/c-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status_code": "IN_PROGRESS"
            })))
            .mount(&server)
            .await;

        let h = harness(&server, poll(1, 1), poll(3, 1));
        let conn = connect(&h.store, Platform::Instagram, chrono::Duration::days(30), None).await;

        let pending = h.orchestrator.publish("u1", request(&conn)).await.unwrap();
        assert_eq!(pending.status, PublishStatus::Pending);

        let result = h.orchestrator.watch("u1", &conn.id, pending).await;
        assert_eq!(result.status, PublishStatus::Failed);
        assert_eq!(result.external_id.as_deref(), Some("c-1"));
        assert_eq!(result.error.unwrap().code, "readiness_timeout");

        let tracked = h.orchestrator.tracker().get("c-1").await.unwrap();
        assert_eq!(tracked.result.status, PublishStatus::Failed);
        assert!(!tracked.watching);
    }

    #[tokio::test]
    async fn deleting_the_connection_abandons_the_watch() {
        let server = MockServer::start().await;
        mount_container(&server).await;
        Mock::given(method("POST"))
            .and(path("/ig-1/media_publish"))
            .respond_with(not_ready())
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/c-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status_code": "IN_PROGRESS"
            })))
            .expect(0)
            .mount(&server)
            .await;

        let h = harness(&server, poll(0, 1), poll(5, 200));
        let conn = connect(&h.store, Platform::Instagram, chrono::Duration::days(30), None).await;

        let pending = h.orchestrator.publish("u1", request(&conn)).await.unwrap();
        assert_eq!(pending.status, PublishStatus::Pending);

        let orchestrator = h.orchestrator.clone();
        let conn_id = conn.id.clone();
        let watch = tokio::spawn(async move { orchestrator.watch("u1", &conn_id, pending).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        h.store.delete(&conn.id, "u1").await.unwrap();

        let result = watch.await.unwrap();
        assert_eq!(result.status, PublishStatus::Failed);
        assert_eq!(result.error.unwrap().code, "not_found");
    }

    #[tokio::test]
    async fn tiktok_error_code_fails_with_provider_payload() {
        let server = MockServer::start().await;
        let body = json!({
            "data": {},
            "error": {
                "code": "spam_risk_too_many_posts",
                "message": "The user has reached the daily post limit",
                "log_id": "20240101abcdef"
            }
        });
        Mock::given(method("POST"))
            .and(path("/v2/post/publish/video/init/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let h = harness(&server, poll(0, 1), poll(0, 1));
        let conn = connect(&h.store, Platform::TikTok, chrono::Duration::days(1), Some("rft")).await;

        let result = h.orchestrator.publish("u1", request(&conn)).await.unwrap();
        assert_eq!(result.status, PublishStatus::Failed);
        assert_eq!(result.state, JobState::Failed);
        let error = result.error.unwrap();
        assert_eq!(error.code, "provider_publish_error");
        assert_eq!(error.details, Some(body));
    }

    #[tokio::test]
    async fn tiktok_init_success_is_published() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/post/publish/video/init/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "publish_id": "v_pub_url~v2.123" },
                "error": { "code": "ok", "message": "" }
            })))
            .mount(&server)
            .await;

        let h = harness(&server, poll(0, 1), poll(0, 1));
        let conn = connect(&h.store, Platform::TikTok, chrono::Duration::days(1), Some("rft")).await;

        let result = h.orchestrator.publish("u1", request(&conn)).await.unwrap();
        assert_eq!(result.status, PublishStatus::Published);
        assert_eq!(result.external_id.as_deref(), Some("v_pub_url~v2.123"));

        let err = h
            .orchestrator
            .resume("u1", &conn.id, "unknown-id")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn expiring_token_is_refreshed_before_publishing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/oauth/token/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "new-access",
                "refresh_token": "new-rft",
                "expires_in": 86400
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/post/publish/video/init/"))
            .and(header("authorization", "Bearer new-access"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "publish_id": "v_pub_1" },
                "error": { "code": "ok" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let h = harness(&server, poll(0, 1), poll(0, 1));
        let conn = connect(&h.store, Platform::TikTok, chrono::Duration::minutes(1), Some("rft")).await;

        let result = h.orchestrator.publish("u1", request(&conn)).await.unwrap();
        assert_eq!(result.status, PublishStatus::Published);

        let requests = server.received_requests().await.unwrap();
        let paths: Vec<_> = requests.iter().map(|r| r.url.path().to_string()).collect();
        assert_eq!(paths, vec!["/v2/oauth/token/", "/v2/post/publish/video/init/"]);

        let stored = h.store.find(&conn.id).await.unwrap().unwrap();
        assert_eq!(stored.access_token, "new-access");
    }

    #[tokio::test]
    async fn instagram_token_near_expiry_is_rejected_before_publishing() {
        let server = MockServer::start().await;
        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let h = harness(&server, poll(3, 1), poll(3, 1));
        let conn = connect(&h.store, Platform::Instagram, chrono::Duration::minutes(1), None).await;

        let err = h.orchestrator.publish("u1", request(&conn)).await.unwrap_err();
        assert!(matches!(err, AppError::RefreshUnsupported(Platform::Instagram)));
        assert_eq!(err.code(), "refresh_unsupported");
    }
}
