//! In-memory connection store for local development and tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

use super::{ConnectionStore, ConnectionUpsert, SocialConnection};
use crate::error::AppError;
use crate::providers::Platform;

/// Connections keyed by `(user_id, platform)`; every write takes the single
/// write lock, so a record is always replaced as a whole.
#[derive(Default)]
pub struct MemoryConnectionStore {
    records: RwLock<HashMap<(String, Platform), SocialConnection>>,
}

impl MemoryConnectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl ConnectionStore for MemoryConnectionStore {
    async fn upsert(&self, conn: &ConnectionUpsert) -> Result<SocialConnection, AppError> {
        let now = Utc::now();
        let key = (conn.user_id.clone(), conn.platform);
        let mut records = self.records.write().await;

        let (id, created_at) = match records.get(&key) {
            Some(existing) => (existing.id.clone(), existing.created_at),
            None => (uuid::Uuid::new_v4().to_string(), now),
        };

        let record = SocialConnection {
            id,
            user_id: conn.user_id.clone(),
            platform: conn.platform,
            platform_user_id: conn.platform_user_id.clone(),
            platform_username: conn.platform_username.clone(),
            access_token: conn.access_token.clone(),
            refresh_token: conn.refresh_token.clone(),
            expires_at: conn.expires_at,
            created_at,
            updated_at: now,
        };

        records.insert(key, record.clone());
        Ok(record)
    }

    async fn find(&self, connection_id: &str) -> Result<Option<SocialConnection>, AppError> {
        let records = self.records.read().await;
        Ok(records.values().find(|c| c.id == connection_id).cloned())
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<SocialConnection>, AppError> {
        let records = self.records.read().await;
        let mut conns: Vec<SocialConnection> = records
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        conns.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conns)
    }

    async fn delete(&self, connection_id: &str, user_id: &str) -> Result<(), AppError> {
        let mut records = self.records.write().await;
        let key = records
            .iter()
            .find(|(_, c)| c.id == connection_id)
            .map(|(k, c)| (k.clone(), c.user_id.clone()));

        match key {
            None => Err(AppError::NotFound("connection".into())),
            Some((_, owner)) if owner != user_id => Err(AppError::Ownership),
            Some((key, _)) => {
                records.remove(&key);
                Ok(())
            }
        }
    }

    async fn list_expiring(&self, within: Duration) -> Result<Vec<SocialConnection>, AppError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|c| c.refresh_token.is_some() && c.expires_within(within))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upsert(user: &str, platform: Platform, token: &str) -> ConnectionUpsert {
        ConnectionUpsert {
            user_id: user.into(),
            platform,
            platform_user_id: format!("{user}-remote"),
            platform_username: format!("{user} on {platform}"),
            access_token: token.into(),
            refresh_token: Some(format!("{token}-refresh")),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        }
    }

    #[tokio::test]
    async fn upsert_replaces_record_for_same_user_and_platform() {
        let store = MemoryConnectionStore::new();
        let first = store.upsert(&upsert("u1", Platform::TikTok, "t1")).await.unwrap();
        let second = store.upsert(&upsert("u1", Platform::TikTok, "t2")).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(first.id, second.id);
        assert_eq!(second.access_token, "t2");
        assert_eq!(second.created_at, first.created_at);
    }

    #[tokio::test]
    async fn platforms_are_stored_separately() {
        let store = MemoryConnectionStore::new();
        store.upsert(&upsert("u1", Platform::TikTok, "t1")).await.unwrap();
        store.upsert(&upsert("u1", Platform::Instagram, "i1")).await.unwrap();

        assert_eq!(store.list_for_user("u1").await.unwrap().len(), 2);
        assert!(store.list_for_user("u2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_for_use_enforces_ownership() {
        let store = MemoryConnectionStore::new();
        let conn = store.upsert(&upsert("userB", Platform::Instagram, "i1")).await.unwrap();

        let err = store.get_for_use(&conn.id, "userA").await.unwrap_err();
        assert!(matches!(err, AppError::Ownership));

        let owned = store.get_for_use(&conn.id, "userB").await.unwrap();
        assert_eq!(owned.access_token, "i1");
    }

    #[tokio::test]
    async fn get_for_use_reports_missing_records() {
        let store = MemoryConnectionStore::new();
        let err = store.get_for_use("missing", "u1").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_checks_owner() {
        let store = MemoryConnectionStore::new();
        let conn = store.upsert(&upsert("u1", Platform::TikTok, "t1")).await.unwrap();

        assert!(matches!(
            store.delete(&conn.id, "u2").await.unwrap_err(),
            AppError::Ownership
        ));
        store.delete(&conn.id, "u1").await.unwrap();
        assert!(store.find(&conn.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_expiring_only_returns_refreshable_records() {
        let store = MemoryConnectionStore::new();
        let mut soon = upsert("u1", Platform::TikTok, "t1");
        soon.expires_at = Utc::now() + chrono::Duration::minutes(2);
        store.upsert(&soon).await.unwrap();

        let mut no_refresh = upsert("u2", Platform::Instagram, "i1");
        no_refresh.expires_at = Utc::now() + chrono::Duration::minutes(2);
        no_refresh.refresh_token = None;
        store.upsert(&no_refresh).await.unwrap();

        store.upsert(&upsert("u3", Platform::TikTok, "t3")).await.unwrap();

        let expiring = store
            .list_expiring(Duration::from_secs(10 * 60))
            .await
            .unwrap();
        assert_eq!(expiring.len(), 1);
        assert_eq!(expiring[0].user_id, "u1");
    }
}
