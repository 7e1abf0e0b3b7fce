//! Publish job model and its provider-agnostic state machine.
//!
//! ```text
//! CREATED ─┬─> CONTAINER_PENDING ──> CONTAINER_READY ──> PUBLISHING ──> PUBLISHED
//!          └────────────────────────────────────────────> PUBLISHING
//! any non-terminal state ──> FAILED
//! ```

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppError, ErrorBody};
use crate::providers::Platform;

/// Instagram and TikTok both cap captions at 2,200 characters.
pub const MAX_CAPTION_CHARS: usize = 2200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Created,
    ContainerPending,
    ContainerReady,
    Publishing,
    Published,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Published | JobState::Failed)
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;

        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Created, ContainerPending)
                | (Created, Publishing)
                | (ContainerPending, ContainerReady)
                | (ContainerReady, Publishing)
                | (Publishing, Published)
        )
    }
}

/// Publish request as received from a caller; every field is optional so
/// missing values surface as validation errors instead of decode failures.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PublishRequest {
    pub connection_id: Option<String>,
    pub platform: Option<String>,
    pub video_url: Option<String>,
    pub caption: Option<String>,
}

/// A validated publish job.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishJob {
    pub connection_id: String,
    pub platform: Platform,
    pub video_url: String,
    pub caption: String,
}

impl PublishRequest {
    pub fn validate(self) -> Result<PublishJob, AppError> {
        fn required(value: Option<String>, field: &str) -> Result<String, AppError> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| AppError::Validation(format!("{field} is required")))
        }

        let connection_id = required(self.connection_id, "connection_id")?;
        let video_url = required(self.video_url, "video_url")?;
        let platform: Platform = required(self.platform, "platform")?.parse()?;

        let parsed = url::Url::parse(&video_url)
            .map_err(|_| AppError::Validation("video_url must be an absolute URL".into()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::Validation("video_url must use http or https".into()));
        }

        let caption = self.caption.unwrap_or_default();
        if caption.chars().count() > MAX_CAPTION_CHARS {
            return Err(AppError::Validation(format!(
                "caption exceeds {MAX_CAPTION_CHARS} characters"
            )));
        }

        Ok(PublishJob {
            connection_id,
            platform,
            video_url,
            caption,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishStatus {
    Published,
    Pending,
    Failed,
}

/// What the caller sees at the end of a publish (or resume) call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishResult {
    pub status: PublishStatus,
    pub platform: Platform,
    pub state: JobState,
    /// Provider container / publish id, enough to resume a pending job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// Final media id, when the provider reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl PublishResult {
    pub fn is_terminal(&self) -> bool {
        self.status != PublishStatus::Pending
    }
}

/// One execution of the state machine for a single job.
#[derive(Debug)]
pub(crate) struct JobRun {
    platform: Platform,
    connection_id: String,
    state: JobState,
    external_id: Option<String>,
}

impl JobRun {
    pub(crate) fn new(platform: Platform, connection_id: &str) -> Self {
        Self {
            platform,
            connection_id: connection_id.to_string(),
            state: JobState::Created,
            external_id: None,
        }
    }

    /// Re-enter the machine for a job whose container already exists.
    pub(crate) fn resumed(platform: Platform, connection_id: &str, container_id: &str) -> Self {
        Self {
            platform,
            connection_id: connection_id.to_string(),
            state: JobState::ContainerPending,
            external_id: Some(container_id.to_string()),
        }
    }

    pub(crate) fn state(&self) -> JobState {
        self.state
    }

    pub(crate) fn external_id(&self) -> Option<&str> {
        self.external_id.as_deref()
    }

    pub(crate) fn set_external_id(&mut self, id: &str) {
        self.external_id = Some(id.to_string());
    }

    pub(crate) fn advance(&mut self, next: JobState) -> Result<(), AppError> {
        if !self.state.can_transition_to(next) {
            return Err(AppError::Internal(format!(
                "illegal publish transition {:?} -> {next:?}",
                self.state
            )));
        }
        debug!(
            connection_id = %self.connection_id,
            platform = %self.platform,
            from = ?self.state,
            to = ?next,
            "publish job transition"
        );
        self.state = next;
        Ok(())
    }

    pub(crate) fn published(mut self, post_id: Option<String>) -> PublishResult {
        if let Err(e) = self.advance(JobState::Published) {
            return self.fail(e);
        }
        PublishResult {
            status: PublishStatus::Published,
            platform: self.platform,
            state: self.state,
            external_id: self.external_id,
            post_id,
            error: None,
        }
    }

    pub(crate) fn pending(self) -> PublishResult {
        PublishResult {
            status: PublishStatus::Pending,
            platform: self.platform,
            state: self.state,
            external_id: self.external_id,
            post_id: None,
            error: None,
        }
    }

    pub(crate) fn fail(mut self, err: AppError) -> PublishResult {
        tracing::warn!(
            connection_id = %self.connection_id,
            platform = %self.platform,
            state = ?self.state,
            code = err.code(),
            "publish job failed: {err}"
        );
        if !self.state.is_terminal() {
            self.state = JobState::Failed;
        }
        PublishResult {
            status: PublishStatus::Failed,
            platform: self.platform,
            state: JobState::Failed,
            external_id: self.external_id,
            post_id: None,
            error: Some(err.to_body()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PublishRequest {
        PublishRequest {
            connection_id: Some("conn-1".into()),
            platform: Some("instagram".into()),
            video_url: Some("https://cdn.example.com/v.mp4".into()),
            caption: Some("Just listed".into()),
        }
    }

    #[test]
    fn valid_request_becomes_a_job() {
        let job = request().validate().unwrap();
        assert_eq!(job.platform, Platform::Instagram);
        assert_eq!(job.connection_id, "conn-1");
    }

    #[test]
    fn missing_required_fields_are_validation_errors() {
        for strip in ["connection_id", "platform", "video_url"] {
            let mut req = request();
            match strip {
                "connection_id" => req.connection_id = None,
                "platform" => req.platform = Some("   ".into()),
                _ => req.video_url = None,
            }
            let err = req.validate().unwrap_err();
            assert!(
                matches!(err, AppError::Validation(ref m) if m.contains(strip)),
                "{strip}: {err:?}"
            );
        }
    }

    #[test]
    fn caption_is_optional_but_bounded() {
        let mut req = request();
        req.caption = None;
        assert_eq!(req.validate().unwrap().caption, "");

        let mut req = request();
        req.caption = Some("x".repeat(MAX_CAPTION_CHARS + 1));
        assert!(matches!(req.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn video_url_must_be_http() {
        let mut req = request();
        req.video_url = Some("file:///etc/passwd".into());
        assert!(matches!(req.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn unknown_platform_is_unsupported() {
        let mut req = request();
        req.platform = Some("vine".into());
        assert!(matches!(req.validate(), Err(AppError::UnsupportedPlatform(_))));
    }

    #[test]
    fn transitions_follow_the_machine() {
        use JobState::*;
        assert!(Created.can_transition_to(ContainerPending));
        assert!(Created.can_transition_to(Publishing));
        assert!(ContainerPending.can_transition_to(ContainerReady));
        assert!(!ContainerPending.can_transition_to(Published));
        assert!(!Created.can_transition_to(ContainerReady));
        assert!(Publishing.can_transition_to(Failed));
        assert!(!Published.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Publishing));
    }

    #[test]
    fn run_records_external_id_through_failure() {
        let mut run = JobRun::new(Platform::Instagram, "conn-1");
        run.set_external_id("c-1");
        run.advance(JobState::ContainerPending).unwrap();

        let result = run.fail(AppError::ReadinessTimeout {
            container_id: "c-1".into(),
        });
        assert_eq!(result.status, PublishStatus::Failed);
        assert_eq!(result.state, JobState::Failed);
        assert_eq!(result.external_id.as_deref(), Some("c-1"));
        assert_eq!(result.error.unwrap().code, "readiness_timeout");
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let mut run = JobRun::new(Platform::TikTok, "conn-1");
        assert!(run.advance(JobState::Published).is_err());
        assert_eq!(run.state(), JobState::Created);
    }
}
