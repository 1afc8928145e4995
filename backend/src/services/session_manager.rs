//! Session lifecycle orchestration.
//!
//! States: `Active -> Expired` happens by time alone, `Active -> Revoked` and
//! `Active -> Evicted` by an explicit write, and `Active -> Active` on
//! refresh rotation. Every read that decides validity checks both the
//! revocation flag and `expires_at`.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Mutex as AsyncMutex;

use crate::config::{Config, SessionLifetimePolicy};
use crate::error::{AppError, AuthFailure};
use crate::models::session::{
    DeviceCount, DeviceMeta, NewSession, RevocationReason, Session, SessionStatistics,
    SessionStatus, SessionUpdate, SessionView, TokenPair,
};
use crate::models::session_query::{Page, Pagination, SessionFilter, SessionSortField, SortOrder};
use crate::services::events::{EventPublisher, SessionEvent};
use crate::services::identity::IdentityProvider;
use crate::services::session_store::SessionStore;
use crate::services::token_blacklist::TokenBlacklist;
use crate::types::{SessionId, UserId};
use crate::utils::jwt::{Claims, TokenCodec, TokenPayload, TokenPurpose, TokenVerification};
use crate::utils::time::{seconds_until, Clock, SystemClock};

const UNKNOWN_DEVICE: &str = "Unknown device";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub max_concurrent_sessions: u32,
    pub session_extension_seconds: i64,
    pub lifetime_policy: SessionLifetimePolicy,
    pub cleanup_batch_size: i64,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            access_token_ttl_seconds: config.access_token_ttl_seconds,
            refresh_token_ttl_seconds: config.refresh_token_ttl_seconds,
            max_concurrent_sessions: config.max_concurrent_sessions.max(1),
            session_extension_seconds: config.session_extension_seconds,
            lifetime_policy: config.session_lifetime_policy,
            cleanup_batch_size: config.cleanup_batch_size.max(1),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// The authenticated caller of an owner-scoped operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub current_session_id: Option<SessionId>,
}

/// A session together with the credentials just minted for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedSession {
    pub session: Session,
    pub tokens: TokenPair,
}

/// An extended session with the pair reissued to reach its new expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedSession {
    pub session: SessionView,
    pub tokens: TokenPair,
}

/// Serializes session creation per user within this process.
#[derive(Debug, Default)]
struct UserLocks {
    inner: Mutex<HashMap<UserId, Arc<AsyncMutex<()>>>>,
}

impl UserLocks {
    fn map(&self) -> MutexGuard<'_, HashMap<UserId, Arc<AsyncMutex<()>>>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn handle(&self, user_id: UserId) -> Arc<AsyncMutex<()>> {
        self.map().entry(user_id).or_default().clone()
    }

    fn release(&self, user_id: UserId, handle: Arc<AsyncMutex<()>>) {
        let mut map = self.map();
        // One reference is the map's, one is `handle`; anything more is a waiter.
        if Arc::strong_count(&handle) <= 2 {
            map.remove(&user_id);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.map().len()
    }
}

pub struct SessionManager {
    store: SessionStore,
    codec: TokenCodec,
    blacklist: TokenBlacklist,
    identity: Arc<dyn IdentityProvider>,
    events: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    settings: SessionSettings,
    user_locks: UserLocks,
}

impl SessionManager {
    pub fn new(
        store: SessionStore,
        codec: TokenCodec,
        blacklist: TokenBlacklist,
        identity: Arc<dyn IdentityProvider>,
        events: Arc<dyn EventPublisher>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            store,
            codec,
            blacklist,
            identity,
            events,
            clock: Arc::new(SystemClock),
            settings,
            user_locks: UserLocks::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn blacklist(&self) -> &TokenBlacklist {
        &self.blacklist
    }

    async fn emit(&self, event: SessionEvent) {
        let event_type = event.event_type();
        if let Err(err) = self.events.publish(event_type, event.payload()).await {
            tracing::warn!(
                error = ?err,
                event_type,
                user_id = ?event.user_id(),
                "Failed to publish session event"
            );
        }
    }

    async fn lookup_roles(&self, user_id: UserId) -> Result<Vec<String>, AppError> {
        self.identity
            .roles(user_id)
            .await?
            .ok_or(AppError::Unauthorized(AuthFailure::UserNotFound))
    }

    fn mint_pair(
        &self,
        user_id: UserId,
        roles: Vec<String>,
        session_id: SessionId,
        refresh_ttl_seconds: i64,
        now: DateTime<Utc>,
    ) -> Result<TokenPair, AppError> {
        let access_ttl = self.settings.access_token_ttl_seconds.min(refresh_ttl_seconds);
        let access_payload = TokenPayload::new(user_id, roles.clone(), Some(session_id));
        let refresh_payload = TokenPayload::new(user_id, roles, Some(session_id));

        let access_token =
            self.codec
                .sign_at(&access_payload, TokenPurpose::Access, access_ttl, now)?;
        let refresh_token =
            self.codec
                .sign_at(&refresh_payload, TokenPurpose::Refresh, refresh_ttl_seconds, now)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            access_token_expires_at: now + Duration::seconds(access_ttl),
            refresh_token_expires_at: now + Duration::seconds(refresh_ttl_seconds),
        })
    }

    /// Best effort: the session row is already revoked when this runs.
    async fn blacklist_session_tokens(&self, session: &Session, now: DateTime<Utc>) {
        let access_ttl = self.settings.access_token_ttl_seconds.max(1) as u64;
        if let Err(err) = self
            .blacklist
            .revoke(&session.access_token, Some(access_ttl))
            .await
        {
            tracing::warn!(error = ?err, session_id = %session.id, "Failed to blacklist access token");
        }

        let refresh_ttl = seconds_until(now, session.expires_at);
        if refresh_ttl == 0 {
            return;
        }
        if let Err(err) = self
            .blacklist
            .revoke(&session.refresh_token, Some(refresh_ttl))
            .await
        {
            tracing::warn!(error = ?err, session_id = %session.id, "Failed to blacklist refresh token");
        }
    }

    /// Mints a new pair for `session` and swaps it in, conditional on the
    /// row still holding `session.refresh_token`. The old refresh token is
    /// blacklisted for `old_ttl` seconds before the swap.
    async fn rotate_pair(
        &self,
        session: &Session,
        roles: Vec<String>,
        refresh_ttl: i64,
        expires_at: Option<DateTime<Utc>>,
        old_ttl: u64,
        now: DateTime<Utc>,
    ) -> Result<(Session, TokenPair), AppError> {
        let tokens = self.mint_pair(session.user_id, roles, session.id, refresh_ttl, now)?;

        self.blacklist
            .revoke(&session.refresh_token, Some(old_ttl))
            .await
            .map_err(|err| {
                AppError::InternalServerError(
                    err.context("failed to blacklist rotated refresh token"),
                )
            })?;

        let update = SessionUpdate {
            access_token: Some(tokens.access_token.clone()),
            refresh_token: Some(tokens.refresh_token.clone()),
            expires_at,
            last_activity_at: Some(now),
            ..Default::default()
        };
        let rotated = self
            .store
            .rotate_tokens(session.id, &session.refresh_token, &update, now)
            .await?
            // A concurrent refresh or revoke got there first.
            .ok_or(AppError::Unauthorized(AuthFailure::SessionInactive))?;
        Ok((rotated, tokens))
    }

    /// Opens a session for `user_id`, evicting the oldest active sessions
    /// first when the user is at the concurrency cap.
    ///
    /// `ttl_override` replaces the refresh lifetime for this session only.
    pub async fn create_session(
        &self,
        user_id: UserId,
        device: DeviceMeta,
        ttl_override: Option<i64>,
    ) -> Result<IssuedSession, AppError> {
        let refresh_ttl = match ttl_override {
            Some(ttl) if ttl <= 0 => {
                return Err(AppError::BadRequest(
                    "Session lifetime must be positive".into(),
                ))
            }
            Some(ttl) => ttl,
            None => self.settings.refresh_token_ttl_seconds,
        };
        let roles = self.lookup_roles(user_id).await?;

        let lock = self.user_locks.handle(user_id);
        let result = {
            let _guard = lock.lock().await;
            self.create_locked(user_id, roles, device, refresh_ttl).await
        };
        self.user_locks.release(user_id, lock);
        result
    }

    async fn create_locked(
        &self,
        user_id: UserId,
        roles: Vec<String>,
        device: DeviceMeta,
        refresh_ttl: i64,
    ) -> Result<IssuedSession, AppError> {
        let now = self.clock.now();
        // Tokens minted in the same second as a global revocation would be
        // rejected on first use; refuse before the row takes a cap slot.
        if self
            .blacklist
            .covers_user_token(&user_id, now.timestamp())
            .await?
        {
            tracing::info!(%user_id, "Session creation refused during global revocation");
            return Err(AppError::Unauthorized(AuthFailure::RevokedToken));
        }
        self.evict_over_cap(user_id, now).await?;

        let session_id = SessionId::new();
        let tokens = self.mint_pair(user_id, roles, session_id, refresh_ttl, now)?;
        let session = self
            .store
            .create(NewSession {
                id: session_id,
                user_id,
                access_token: tokens.access_token.clone(),
                refresh_token: tokens.refresh_token.clone(),
                device,
                expires_at: tokens.refresh_token_expires_at,
                now,
            })
            .await?;

        tracing::info!(%user_id, session_id = %session.id, "Session created");
        self.emit(SessionEvent::Created {
            user_id,
            session_id: session.id,
        })
        .await;

        Ok(IssuedSession { session, tokens })
    }

    /// Revokes oldest-first until one slot is free. Also drains any overflow
    /// left by creations that raced on another instance.
    async fn evict_over_cap(&self, user_id: UserId, now: DateTime<Utc>) -> Result<(), AppError> {
        let max = i64::from(self.settings.max_concurrent_sessions);
        let active = self.store.count_active(user_id, now).await?;
        if active < max {
            return Ok(());
        }

        let filter = SessionFilter {
            sort_by: SessionSortField::CreatedAt,
            sort_order: SortOrder::Asc,
            limit: Some(active - max + 1),
            ..SessionFilter::active()
        };
        let oldest = self.store.find_by_user_id(user_id, &filter, now).await?;
        for session in oldest {
            let reason = RevocationReason::ConcurrencyEviction;
            if !self.store.revoke(session.id, reason.as_str(), now).await? {
                continue;
            }
            self.blacklist_session_tokens(&session, now).await;
            tracing::info!(
                %user_id,
                session_id = %session.id,
                active,
                max,
                "Session evicted by concurrency cap"
            );
            self.emit(SessionEvent::Evicted {
                user_id,
                session_id: session.id,
            })
            .await;
        }
        Ok(())
    }

    /// Record-level check: exists, not revoked, not past `expires_at`.
    /// Touches `last_activity_at` on success.
    pub async fn verify_session(&self, session_id: SessionId) -> Result<bool, AppError> {
        let now = self.clock.now();
        let Some(session) = self.store.find_by_id(session_id, now).await? else {
            return Ok(false);
        };
        if !session.is_active_at(now) {
            return Ok(false);
        }

        let touch = SessionUpdate {
            last_activity_at: Some(now),
            ..Default::default()
        };
        if let Err(err) = self.store.update(session_id, &touch, now).await {
            tracing::warn!(error = ?err, %session_id, "Failed to record session activity");
        }
        Ok(true)
    }

    /// End-to-end bearer check: signature and expiry, blacklist, then the
    /// session record named by the token.
    pub async fn verify_access_token(&self, token: &str) -> Result<Claims, AppError> {
        let now = self.clock.now();
        let claims = match self.codec.verify_at(token, TokenPurpose::Access, now) {
            TokenVerification::Valid(claims) => claims,
            TokenVerification::Invalid => {
                return Err(AppError::Unauthorized(AuthFailure::InvalidToken))
            }
            TokenVerification::Expired => {
                return Err(AppError::Unauthorized(AuthFailure::ExpiredToken))
            }
        };

        if self.blacklist.is_revoked(token).await?
            || self
                .blacklist
                .covers_user_token(&claims.payload.sub, claims.iat)
                .await?
        {
            return Err(AppError::Unauthorized(AuthFailure::RevokedToken));
        }

        let session_id = claims
            .payload
            .sid
            .ok_or(AppError::Unauthorized(AuthFailure::InvalidToken))?;
        let session = self
            .store
            .find_by_id(session_id, now)
            .await?
            .ok_or(AppError::Unauthorized(AuthFailure::SessionInactive))?;

        if session.user_id != claims.payload.sub {
            return Err(AppError::Unauthorized(AuthFailure::InvalidToken));
        }
        if !session.is_valid {
            return Err(AppError::Unauthorized(AuthFailure::SessionInactive));
        }
        if session.expires_at <= now {
            return Err(AppError::SessionExpired);
        }
        // Rotated out by a refresh.
        if session.access_token != token {
            return Err(AppError::Unauthorized(AuthFailure::RevokedToken));
        }
        Ok(claims)
    }

    /// Exchanges a refresh token for a new pair. The presented token is
    /// blacklisted before the rotated row becomes visible, so at no point
    /// are both the old and the new refresh token usable.
    pub async fn refresh_session(&self, refresh_token: &str) -> Result<IssuedSession, AppError> {
        let now = self.clock.now();

        if self.blacklist.is_revoked(refresh_token).await? {
            return Err(AppError::Unauthorized(AuthFailure::SessionInactive));
        }
        let claims = match self.codec.verify_at(refresh_token, TokenPurpose::Refresh, now) {
            TokenVerification::Valid(claims) => claims,
            TokenVerification::Invalid => {
                return Err(AppError::Unauthorized(AuthFailure::InvalidRefreshToken))
            }
            TokenVerification::Expired => return Err(AppError::SessionExpired),
        };
        if self
            .blacklist
            .covers_user_token(&claims.payload.sub, claims.iat)
            .await?
        {
            return Err(AppError::Unauthorized(AuthFailure::SessionInactive));
        }

        let session = self
            .store
            .find_by_refresh_token(refresh_token)
            .await?
            .ok_or(AppError::Unauthorized(AuthFailure::InvalidRefreshToken))?;
        if session.user_id != claims.payload.sub {
            return Err(AppError::Unauthorized(AuthFailure::InvalidRefreshToken));
        }
        if !session.is_valid {
            return Err(AppError::Unauthorized(AuthFailure::SessionInactive));
        }
        if session.expires_at <= now {
            return Err(AppError::SessionExpired);
        }

        let roles = self.lookup_roles(session.user_id).await?;
        let remaining = (session.expires_at - now).num_seconds().max(1);
        let (refresh_ttl, new_expires_at) = match self.settings.lifetime_policy {
            SessionLifetimePolicy::Absolute => {
                (self.settings.refresh_token_ttl_seconds.min(remaining), None)
            }
            SessionLifetimePolicy::Sliding => {
                let ttl = self.settings.refresh_token_ttl_seconds;
                let slid = now + Duration::seconds(ttl);
                (ttl, Some(slid.max(session.expires_at)))
            }
        };
        let old_ttl = (claims.exp - now.timestamp()).max(1) as u64;
        let (rotated, tokens) = self
            .rotate_pair(&session, roles, refresh_ttl, new_expires_at, old_ttl, now)
            .await?;

        tracing::info!(user_id = %rotated.user_id, session_id = %rotated.id, "Session refreshed");
        self.emit(SessionEvent::Refreshed {
            user_id: rotated.user_id,
            session_id: rotated.id,
        })
        .await;

        Ok(IssuedSession {
            session: rotated,
            tokens,
        })
    }

    /// "Keep me signed in": moves `expires_at` to now plus the extension
    /// window and reissues the pair so the refresh token reaches it.
    pub async fn extend_session(&self, session_id: SessionId) -> Result<ExtendedSession, AppError> {
        let now = self.clock.now();
        let session = self
            .store
            .find_by_id(session_id, now)
            .await?
            .ok_or_else(|| AppError::NotFound("Session not found".into()))?;
        if !session.is_valid {
            return Err(AppError::Unauthorized(AuthFailure::SessionInactive));
        }
        if session.expires_at <= now {
            return Err(AppError::SessionExpired);
        }

        let roles = self.lookup_roles(session.user_id).await?;
        let extension = self.settings.session_extension_seconds;
        let expires_at = now + Duration::seconds(extension);
        let old_ttl = seconds_until(now, session.expires_at).max(1);
        let (extended, tokens) = self
            .rotate_pair(&session, roles, extension, Some(expires_at), old_ttl, now)
            .await?;

        tracing::info!(user_id = %extended.user_id, %session_id, %expires_at, "Session extended");
        self.emit(SessionEvent::Extended {
            user_id: extended.user_id,
            session_id,
            expires_at,
        })
        .await;

        Ok(ExtendedSession {
            session: SessionView::from_session(&extended, Some(&session_id), now),
            tokens,
        })
    }

    /// Revokes one session. Revoking an already revoked session is a no-op.
    pub async fn revoke_session(
        &self,
        session_id: SessionId,
        reason: RevocationReason,
    ) -> Result<(), AppError> {
        let now = self.clock.now();
        let session = self
            .store
            .find_by_id(session_id, now)
            .await?
            .ok_or_else(|| AppError::NotFound("Session not found".into()))?;
        self.revoke_loaded(session, reason, now).await
    }

    async fn revoke_loaded(
        &self,
        session: Session,
        reason: RevocationReason,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        if !session.is_valid {
            return Ok(());
        }
        if !self.store.revoke(session.id, reason.as_str(), now).await? {
            return Ok(());
        }
        self.blacklist_session_tokens(&session, now).await;

        tracing::info!(
            user_id = %session.user_id,
            session_id = %session.id,
            %reason,
            "Session revoked"
        );
        let event = match reason {
            RevocationReason::ConcurrencyEviction => SessionEvent::Evicted {
                user_id: session.user_id,
                session_id: session.id,
            },
            _ => SessionEvent::Revoked {
                user_id: session.user_id,
                session_id: session.id,
                reason: reason.as_str().to_string(),
            },
        };
        self.emit(event).await;
        Ok(())
    }

    /// Owner-scoped revocation of another of the actor's sessions.
    pub async fn revoke_session_for(
        &self,
        actor: &Actor,
        session_id: SessionId,
        reason: RevocationReason,
    ) -> Result<(), AppError> {
        let now = self.clock.now();
        let session = self
            .store
            .find_by_id(session_id, now)
            .await?
            .ok_or_else(|| AppError::NotFound("Session not found".into()))?;
        if session.user_id != actor.user_id {
            return Err(AppError::Forbidden(
                "Session belongs to another user".into(),
            ));
        }
        if actor.current_session_id == Some(session_id) {
            return Err(AppError::BadRequest(
                "Use logout to end the current session".into(),
            ));
        }
        self.revoke_loaded(session, reason, now).await
    }

    /// Revokes every active session of `user_id` except `except`.
    pub async fn revoke_all_user_sessions(
        &self,
        user_id: UserId,
        except: Option<SessionId>,
        reason: RevocationReason,
    ) -> Result<usize, AppError> {
        let now = self.clock.now();
        let revoked = self
            .store
            .revoke_all_by_user(user_id, except, reason.as_str(), now)
            .await?;
        for session in &revoked {
            self.blacklist_session_tokens(session, now).await;
        }

        let count = revoked.len();
        tracing::info!(%user_id, count, %reason, "User sessions revoked");
        self.emit(SessionEvent::RevokedAll {
            user_id,
            count,
            reason: reason.as_str().to_string(),
        })
        .await;
        Ok(count)
    }

    /// Forced global logout: every credential issued to `user_id` up to now
    /// is rejected, whether or not its session row is reachable. Tokens carry
    /// whole-second `iat`, so creation is refused for the rest of the
    /// revocation second.
    pub async fn revoke_user_globally(
        &self,
        user_id: UserId,
        reason: RevocationReason,
    ) -> Result<usize, AppError> {
        let now = self.clock.now();
        let ttl = self.settings.refresh_token_ttl_seconds.max(1) as u64;
        self.blacklist.revoke_user(&user_id, now, Some(ttl)).await?;
        self.revoke_all_user_sessions(user_id, None, reason).await
    }

    /// Hard-deletes sessions past `expires_at`, one bounded batch at a time.
    pub async fn cleanup_expired_sessions(&self) -> Result<u64, AppError> {
        let now = self.clock.now();
        let batch_size = self.settings.cleanup_batch_size;
        let mut total = 0u64;
        loop {
            let deleted = self.store.delete_expired(now, batch_size).await?;
            total += deleted;
            if deleted < batch_size as u64 {
                break;
            }
        }

        if total > 0 {
            tracing::info!(deleted = total, "Expired sessions removed");
            self.emit(SessionEvent::CleanedUp {
                kind: "expired",
                deleted: total,
            })
            .await;
        }
        Ok(total)
    }

    /// Hard-deletes revoked sessions last touched more than `older_than_days` ago.
    pub async fn cleanup_old_revoked_sessions(&self, older_than_days: i64) -> Result<u64, AppError> {
        if older_than_days < 0 {
            return Err(AppError::BadRequest(
                "Retention must not be negative".into(),
            ));
        }
        let now = self.clock.now();
        let cutoff = now - Duration::days(older_than_days);
        let batch_size = self.settings.cleanup_batch_size;
        let mut total = 0u64;
        loop {
            let deleted = self.store.delete_old_revoked(cutoff, batch_size).await?;
            total += deleted;
            if deleted < batch_size as u64 {
                break;
            }
        }

        if total > 0 {
            tracing::info!(deleted = total, %cutoff, "Revoked sessions removed");
            self.emit(SessionEvent::CleanedUp {
                kind: "revoked",
                deleted: total,
            })
            .await;
        }
        Ok(total)
    }

    pub async fn get_session_statistics(
        &self,
        user_id: UserId,
    ) -> Result<SessionStatistics, AppError> {
        let now = self.clock.now();
        let sessions = self
            .store
            .find_by_user_id(user_id, &SessionFilter::all(), now)
            .await?;

        let mut active = 0;
        let mut expired = 0;
        let mut revoked = 0;
        let mut evicted = 0;
        let mut devices: BTreeMap<String, usize> = BTreeMap::new();
        let mut oldest_active_created_at: Option<DateTime<Utc>> = None;

        for session in &sessions {
            match session.status_at(now) {
                SessionStatus::Active => {
                    active += 1;
                    let label = session
                        .device
                        .clone()
                        .unwrap_or_else(|| UNKNOWN_DEVICE.to_string());
                    *devices.entry(label).or_default() += 1;
                    oldest_active_created_at = Some(match oldest_active_created_at {
                        Some(oldest) => oldest.min(session.created_at),
                        None => session.created_at,
                    });
                }
                SessionStatus::Expired => expired += 1,
                SessionStatus::Revoked => revoked += 1,
                SessionStatus::Evicted => evicted += 1,
            }
        }

        let mut active_devices: Vec<DeviceCount> = devices
            .into_iter()
            .map(|(device, count)| DeviceCount { device, count })
            .collect();
        active_devices.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.device.cmp(&b.device)));

        Ok(SessionStatistics {
            total_sessions: sessions.len(),
            active_sessions: active,
            expired_sessions: expired,
            revoked_sessions: revoked,
            evicted_sessions: evicted,
            active_devices,
            last_activity_at: sessions.iter().map(|s| s.last_activity_at).max(),
            oldest_active_created_at,
        })
    }

    /// Active sessions, most recently used first, with the caller's own marked.
    pub async fn get_active_devices(
        &self,
        user_id: UserId,
        current_session_id: Option<SessionId>,
    ) -> Result<Vec<SessionView>, AppError> {
        let now = self.clock.now();
        let filter = SessionFilter {
            sort_by: SessionSortField::LastActivityAt,
            sort_order: SortOrder::Desc,
            ..SessionFilter::active()
        };
        let sessions = self.store.find_by_user_id(user_id, &filter, now).await?;
        Ok(sessions
            .iter()
            .map(|s| SessionView::from_session(s, current_session_id.as_ref(), now))
            .collect())
    }

    pub async fn list_sessions(
        &self,
        user_id: UserId,
        current_session_id: Option<SessionId>,
        filter: SessionFilter,
        pagination: Pagination,
    ) -> Result<Page<SessionView>, AppError> {
        let now = self.clock.now();
        let total = self.store.count_by_user_id(user_id, &filter, now).await?;
        let sessions = self
            .store
            .find_by_user_id(user_id, &filter.with_page(&pagination), now)
            .await?;
        let items = sessions
            .iter()
            .map(|s| SessionView::from_session(s, current_session_id.as_ref(), now))
            .collect();
        Ok(Page::new(items, total, &pagination))
    }
}
