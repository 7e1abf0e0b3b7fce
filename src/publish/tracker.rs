use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

use super::job::PublishResult;

/// Finished jobs are kept this long so late resume calls still see the outcome.
const FINISHED_RETENTION_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub struct TrackedJob {
    pub user_id: String,
    pub connection_id: String,
    pub result: PublishResult,
    /// A background watch currently owns this job.
    pub watching: bool,
    pub updated_at: DateTime<Utc>,
}

/// In-process record of publish jobs keyed by provider external id.
///
/// Background watches write here; resume calls read from here before falling
/// back to asking the provider. Pending jobs nobody is watching are dropped
/// after `pending_retention`; a later resume asks the provider again.
pub struct JobTracker {
    jobs: RwLock<HashMap<String, TrackedJob>>,
    pending_retention: chrono::Duration,
}

impl JobTracker {
    pub fn new(pending_retention: Duration) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            pending_retention: chrono::Duration::from_std(pending_retention)
                .unwrap_or_else(|_| chrono::Duration::days(365)),
        }
    }

    fn is_live(&self, job: &TrackedJob, now: DateTime<Utc>) -> bool {
        let age = now - job.updated_at;
        if job.result.is_terminal() {
            age < chrono::Duration::hours(FINISHED_RETENTION_HOURS)
        } else {
            job.watching || age < self.pending_retention
        }
    }

    pub async fn record(&self, user_id: &str, connection_id: &str, result: &PublishResult) {
        self.put(user_id, connection_id, result, false).await;
    }

    /// Record a pending job that a background watch is about to drive.
    pub async fn start_watch(&self, user_id: &str, connection_id: &str, result: &PublishResult) {
        self.put(user_id, connection_id, result, true).await;
    }

    async fn put(&self, user_id: &str, connection_id: &str, result: &PublishResult, watching: bool) {
        let Some(external_id) = result.external_id.clone() else {
            return;
        };

        let now = Utc::now();
        let mut jobs = self.jobs.write().await;
        jobs.retain(|_, job| self.is_live(job, now));
        jobs.insert(
            external_id,
            TrackedJob {
                user_id: user_id.to_string(),
                connection_id: connection_id.to_string(),
                result: result.clone(),
                watching,
                updated_at: now,
            },
        );
    }

    pub async fn get(&self, external_id: &str) -> Option<TrackedJob> {
        let now = Utc::now();
        self.jobs
            .read()
            .await
            .get(external_id)
            .filter(|job| self.is_live(job, now))
            .cloned()
    }

    pub async fn pending_count(&self) -> usize {
        let now = Utc::now();
        self.jobs
            .read()
            .await
            .values()
            .filter(|job| !job.result.is_terminal() && self.is_live(job, now))
            .count()
    }
}
