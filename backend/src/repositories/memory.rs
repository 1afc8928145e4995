//! In-process [`SessionRepository`] for single-node setups and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::AppError;
use crate::models::session::{NewSession, Session, SessionUpdate};
use crate::models::session_query::SessionFilter;
use crate::repositories::session::SessionRepository;
use crate::types::{SessionId, UserId};

#[derive(Debug, Default)]
pub struct MemorySessionRepository {
    sessions: Mutex<HashMap<SessionId, Session>>,
}

impl MemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Session>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn filtered(
        sessions: &HashMap<SessionId, Session>,
        user_id: UserId,
        filter: &SessionFilter,
        now: DateTime<Utc>,
    ) -> Vec<Session> {
        sessions
            .values()
            .filter(|s| s.user_id == user_id && filter.matches(s, now))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SessionRepository for MemorySessionRepository {
    async fn create(&self, session: NewSession) -> Result<Session, AppError> {
        let mut sessions = self.lock();
        let duplicate = sessions.values().any(|s| {
            s.id == session.id
                || s.access_token == session.access_token
                || s.refresh_token == session.refresh_token
        });
        if duplicate {
            return Err(AppError::InternalServerError(anyhow::anyhow!(
                "duplicate session id or token"
            )));
        }
        let created = session.into_session();
        sessions.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: SessionId) -> Result<Option<Session>, AppError> {
        Ok(self.lock().get(&id).cloned())
    }

    async fn find_by_access_token(&self, token: &str) -> Result<Option<Session>, AppError> {
        Ok(self
            .lock()
            .values()
            .find(|s| s.access_token == token)
            .cloned())
    }

    async fn find_by_refresh_token(&self, token: &str) -> Result<Option<Session>, AppError> {
        Ok(self
            .lock()
            .values()
            .find(|s| s.refresh_token == token)
            .cloned())
    }

    async fn find_by_user_id(
        &self,
        user_id: UserId,
        filter: &SessionFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, AppError> {
        let mut sessions = Self::filtered(&self.lock(), user_id, filter, now);
        filter.sort(&mut sessions);
        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let limit = filter.limit.map(|l| l.max(0) as usize).unwrap_or(usize::MAX);
        Ok(sessions.into_iter().skip(offset).take(limit).collect())
    }

    async fn count_by_user_id(
        &self,
        user_id: UserId,
        filter: &SessionFilter,
        now: DateTime<Utc>,
    ) -> Result<i64, AppError> {
        Ok(Self::filtered(&self.lock(), user_id, filter, now).len() as i64)
    }

    async fn count_active(&self, user_id: UserId, now: DateTime<Utc>) -> Result<i64, AppError> {
        Ok(self
            .lock()
            .values()
            .filter(|s| s.user_id == user_id && s.is_active_at(now))
            .count() as i64)
    }

    async fn update(
        &self,
        id: SessionId,
        update: &SessionUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, AppError> {
        let mut sessions = self.lock();
        Ok(sessions.get_mut(&id).map(|session| {
            update.apply(session, now);
            session.clone()
        }))
    }

    async fn rotate_tokens(
        &self,
        id: SessionId,
        expected_refresh_token: &str,
        update: &SessionUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, AppError> {
        let mut sessions = self.lock();
        let Some(session) = sessions.get_mut(&id) else {
            return Ok(None);
        };
        if !session.is_valid || session.refresh_token != expected_refresh_token {
            return Ok(None);
        }
        let rotation = SessionUpdate {
            access_token: update.access_token.clone(),
            refresh_token: update.refresh_token.clone(),
            expires_at: update.expires_at,
            last_activity_at: update.last_activity_at,
            ..Default::default()
        };
        rotation.apply(session, now);
        Ok(Some(session.clone()))
    }

    async fn revoke(
        &self,
        id: SessionId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut sessions = self.lock();
        match sessions.get_mut(&id) {
            Some(session) if session.is_valid => {
                session.is_valid = false;
                session.revoked_reason = Some(reason.to_string());
                session.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_by_user(
        &self,
        user_id: UserId,
        except: Option<SessionId>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, AppError> {
        let mut sessions = self.lock();
        let mut revoked = Vec::new();
        for session in sessions.values_mut() {
            if session.user_id != user_id || !session.is_valid || Some(session.id) == except {
                continue;
            }
            session.is_valid = false;
            session.revoked_reason = Some(reason.to_string());
            session.updated_at = now;
            revoked.push(session.clone());
        }
        Ok(revoked)
    }

    async fn delete_expired(&self, now: DateTime<Utc>, batch_size: i64) -> Result<u64, AppError> {
        let mut sessions = self.lock();
        let mut expired: Vec<(DateTime<Utc>, SessionId)> = sessions
            .values()
            .filter(|s| s.expires_at <= now)
            .map(|s| (s.expires_at, s.id))
            .collect();
        expired.sort();
        expired.truncate(batch_size.max(0) as usize);
        for (_, id) in &expired {
            sessions.remove(id);
        }
        Ok(expired.len() as u64)
    }

    async fn delete_old_revoked(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<u64, AppError> {
        let mut sessions = self.lock();
        let mut stale: Vec<(DateTime<Utc>, SessionId)> = sessions
            .values()
            .filter(|s| !s.is_valid && s.updated_at < cutoff)
            .map(|s| (s.updated_at, s.id))
            .collect();
        stale.sort();
        stale.truncate(batch_size.max(0) as usize);
        for (_, id) in &stale {
            sessions.remove(id);
        }
        Ok(stale.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::session::DeviceMeta;
    use chrono::Duration;

    fn new_session(user_id: UserId, now: DateTime<Utc>, ttl: Duration) -> NewSession {
        let id = SessionId::new();
        NewSession {
            id,
            user_id,
            access_token: format!("access-{}", id),
            refresh_token: format!("refresh-{}", id),
            device: DeviceMeta {
                device: Some("Firefox on Linux".into()),
                ip_address: Some("10.1.2.3".into()),
                ..Default::default()
            },
            expires_at: now + ttl,
            now,
        }
    }

    #[tokio::test]
    async fn rejects_duplicate_tokens() {
        let repo = MemorySessionRepository::new();
        let now = Utc::now();
        let user = UserId::new();
        let first = new_session(user, now, Duration::hours(1));
        let mut second = new_session(user, now, Duration::hours(1));
        second.refresh_token = first.refresh_token.clone();

        repo.create(first).await.unwrap();
        assert!(repo.create(second).await.is_err());
    }

    #[tokio::test]
    async fn rotate_requires_matching_refresh_token() {
        let repo = MemorySessionRepository::new();
        let now = Utc::now();
        let created = repo
            .create(new_session(UserId::new(), now, Duration::hours(1)))
            .await
            .unwrap();
        let update = SessionUpdate {
            refresh_token: Some("next".into()),
            ..Default::default()
        };

        let stale = repo
            .rotate_tokens(created.id, "not-current", &update, now)
            .await
            .unwrap();
        assert!(stale.is_none());

        let rotated = repo
            .rotate_tokens(created.id, &created.refresh_token, &update, now)
            .await
            .unwrap()
            .expect("rotated");
        assert_eq!(rotated.refresh_token, "next");
    }

    #[tokio::test]
    async fn delete_expired_honours_batch_size() {
        let repo = MemorySessionRepository::new();
        let now = Utc::now();
        let user = UserId::new();
        for _ in 0..3 {
            repo.create(new_session(user, now, Duration::seconds(-10)))
                .await
                .unwrap();
        }
        repo.create(new_session(user, now, Duration::hours(1)))
            .await
            .unwrap();

        assert_eq!(repo.delete_expired(now, 2).await.unwrap(), 2);
        assert_eq!(repo.delete_expired(now, 2).await.unwrap(), 1);
        assert_eq!(repo.delete_expired(now, 2).await.unwrap(), 0);
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn filter_matches_substrings_case_insensitively() {
        let repo = MemorySessionRepository::new();
        let now = Utc::now();
        let user = UserId::new();
        repo.create(new_session(user, now, Duration::hours(1)))
            .await
            .unwrap();

        let filter = SessionFilter {
            device: Some("firefox".into()),
            ..SessionFilter::active()
        };
        assert_eq!(repo.count_by_user_id(user, &filter, now).await.unwrap(), 1);

        let filter = SessionFilter {
            ip_address: Some("192.168".into()),
            ..SessionFilter::active()
        };
        assert_eq!(repo.count_by_user_id(user, &filter, now).await.unwrap(), 0);
    }
}
