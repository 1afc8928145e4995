use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::AppError;
use crate::models::session::{NewSession, Session, SessionUpdate};
use crate::models::session_query::SessionFilter;
use crate::repositories::session::SessionRepository;
use crate::services::cache::CacheStore;
use crate::types::{SessionId, UserId};
use crate::utils::time::seconds_until;

/// Durable session persistence with a cache-aside read path.
///
/// The repository is authoritative. The cache only ever holds full records of
/// active sessions; a miss always falls through to the repository, and cache
/// failures are logged rather than returned.
#[derive(Clone)]
pub struct SessionStore {
    repo: Arc<dyn SessionRepository>,
    cache: Arc<dyn CacheStore>,
    cache_ttl_seconds: u64,
}

impl SessionStore {
    pub fn new(
        repo: Arc<dyn SessionRepository>,
        cache: Arc<dyn CacheStore>,
        cache_ttl_seconds: u64,
    ) -> Self {
        Self {
            repo,
            cache,
            cache_ttl_seconds,
        }
    }

    fn cache_key(id: &SessionId) -> String {
        format!("session:{}", id)
    }

    async fn cache_put(&self, session: &Session, now: DateTime<Utc>) {
        if !session.is_active_at(now) {
            self.invalidate(&session.id).await;
            return;
        }
        let ttl = self
            .cache_ttl_seconds
            .min(seconds_until(now, session.expires_at));
        if ttl == 0 {
            return;
        }
        let payload = match serde_json::to_string(session) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(error = %err, session_id = %session.id, "Failed to serialize session for cache");
                return;
            }
        };
        if let Err(err) = self
            .cache
            .set(&Self::cache_key(&session.id), &payload, ttl)
            .await
        {
            tracing::warn!(error = ?err, session_id = %session.id, "Session cache write failed");
        }
    }

    async fn cache_get(&self, id: &SessionId) -> Option<Session> {
        let raw = match self.cache.get(&Self::cache_key(id)).await {
            Ok(raw) => raw?,
            Err(err) => {
                tracing::warn!(error = ?err, session_id = %id, "Session cache read failed, using store");
                return None;
            }
        };
        match serde_json::from_str::<Session>(&raw) {
            Ok(session) => Some(session),
            Err(err) => {
                tracing::warn!(error = %err, session_id = %id, "Discarding undecodable cached session");
                self.invalidate(id).await;
                None
            }
        }
    }

    async fn invalidate(&self, id: &SessionId) {
        if let Err(err) = self.cache.delete(&Self::cache_key(id)).await {
            tracing::warn!(error = ?err, session_id = %id, "Session cache invalidation failed");
        }
    }

    pub async fn create(&self, session: NewSession) -> Result<Session, AppError> {
        let now = session.now;
        let created = self.repo.create(session).await?;
        self.cache_put(&created, now).await;
        Ok(created)
    }

    pub async fn find_by_id(
        &self,
        id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, AppError> {
        if let Some(session) = self.cache_get(&id).await {
            return Ok(Some(session));
        }
        let session = self.repo.find_by_id(id).await?;
        if let Some(session) = &session {
            self.cache_put(session, now).await;
        }
        Ok(session)
    }

    /// Looks a session up by its current access token.
    pub async fn find_by_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, AppError> {
        let session = self.repo.find_by_access_token(token).await?;
        if let Some(session) = &session {
            self.cache_put(session, now).await;
        }
        Ok(session)
    }

    /// Always read from the store: rotation decisions must not see a stale copy.
    pub async fn find_by_refresh_token(&self, token: &str) -> Result<Option<Session>, AppError> {
        self.repo.find_by_refresh_token(token).await
    }

    pub async fn find_by_user_id(
        &self,
        user_id: UserId,
        filter: &SessionFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, AppError> {
        self.repo.find_by_user_id(user_id, filter, now).await
    }

    pub async fn count_by_user_id(
        &self,
        user_id: UserId,
        filter: &SessionFilter,
        now: DateTime<Utc>,
    ) -> Result<i64, AppError> {
        self.repo.count_by_user_id(user_id, filter, now).await
    }

    pub async fn count_active(&self, user_id: UserId, now: DateTime<Utc>) -> Result<i64, AppError> {
        self.repo.count_active(user_id, now).await
    }

    pub async fn update(
        &self,
        id: SessionId,
        update: &SessionUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, AppError> {
        let updated = self.repo.update(id, update, now).await?;
        match &updated {
            Some(session) => self.cache_put(session, now).await,
            None => self.invalidate(&id).await,
        }
        Ok(updated)
    }

    pub async fn rotate_tokens(
        &self,
        id: SessionId,
        expected_refresh_token: &str,
        update: &SessionUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, AppError> {
        let rotated = self
            .repo
            .rotate_tokens(id, expected_refresh_token, update, now)
            .await?;
        match &rotated {
            Some(session) => self.cache_put(session, now).await,
            None => self.invalidate(&id).await,
        }
        Ok(rotated)
    }

    /// Revokes and drops the cached copy. The cache entry is deleted, never rewritten.
    pub async fn revoke(
        &self,
        id: SessionId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let revoked = self.repo.revoke(id, reason, now).await?;
        self.invalidate(&id).await;
        Ok(revoked)
    }

    pub async fn revoke_all_by_user(
        &self,
        user_id: UserId,
        except: Option<SessionId>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, AppError> {
        let revoked = self
            .repo
            .revoke_all_by_user(user_id, except, reason, now)
            .await?;
        for session in &revoked {
            self.invalidate(&session.id).await;
        }
        Ok(revoked)
    }

    pub async fn delete_expired(&self, now: DateTime<Utc>, batch_size: i64) -> Result<u64, AppError> {
        self.repo.delete_expired(now, batch_size).await
    }

    pub async fn delete_old_revoked(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<u64, AppError> {
        self.repo.delete_old_revoked(cutoff, batch_size).await
    }
}
