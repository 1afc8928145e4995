//! Durable session persistence.
//!
//! [`SessionRepository`] is the narrow interface the session store is built
//! on; [`PgSessionRepository`] is the PostgreSQL implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::error::AppError;
use crate::models::session::{NewSession, Session, SessionUpdate};
use crate::models::session_query::SessionFilter;
use crate::repositories::common::{escape_like, push_clause};
use crate::types::{SessionId, UserId};

const SESSION_COLUMNS: &str = "id, user_id, access_token, refresh_token, user_agent, ip_address, \
     device, location, expires_at, last_activity_at, is_valid, revoked_reason, created_at, updated_at";

/// Repository trait for session rows.
///
/// `now` is always supplied by the caller so every expiry comparison uses the
/// same clock as the lifecycle manager.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create(&self, session: NewSession) -> Result<Session, AppError>;

    async fn find_by_id(&self, id: SessionId) -> Result<Option<Session>, AppError>;

    async fn find_by_access_token(&self, token: &str) -> Result<Option<Session>, AppError>;

    async fn find_by_refresh_token(&self, token: &str) -> Result<Option<Session>, AppError>;

    async fn find_by_user_id(
        &self,
        user_id: UserId,
        filter: &SessionFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, AppError>;

    /// Same predicate as `find_by_user_id`, ignoring limit and offset.
    async fn count_by_user_id(
        &self,
        user_id: UserId,
        filter: &SessionFilter,
        now: DateTime<Utc>,
    ) -> Result<i64, AppError>;

    async fn count_active(&self, user_id: UserId, now: DateTime<Utc>) -> Result<i64, AppError>;

    async fn update(
        &self,
        id: SessionId,
        update: &SessionUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, AppError>;

    /// Applies `update` only while the row still holds `expected_refresh_token`.
    async fn rotate_tokens(
        &self,
        id: SessionId,
        expected_refresh_token: &str,
        update: &SessionUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, AppError>;

    /// Marks a valid session revoked. Returns false if it was missing or already revoked.
    async fn revoke(
        &self,
        id: SessionId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Revokes every valid session of the user except `except`; returns the revoked rows.
    async fn revoke_all_by_user(
        &self,
        user_id: UserId,
        except: Option<SessionId>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, AppError>;

    /// Hard-deletes at most `batch_size` sessions past `expires_at`.
    async fn delete_expired(&self, now: DateTime<Utc>, batch_size: i64) -> Result<u64, AppError>;

    /// Hard-deletes at most `batch_size` revoked sessions last touched before `cutoff`.
    async fn delete_old_revoked(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<u64, AppError>;
}

#[derive(Clone)]
pub struct PgSessionRepository {
    pool: PgPool,
}

impl PgSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_one_by(&self, column: &str, value: &str) -> Result<Option<Session>, AppError> {
        let sql = format!("SELECT {} FROM sessions WHERE {} = $1", SESSION_COLUMNS, column);
        let session = sqlx::query_as::<_, Session>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }
}

fn apply_session_filters(
    builder: &mut QueryBuilder<'_, Postgres>,
    has_clause: &mut bool,
    user_id: UserId,
    filter: &SessionFilter,
    now: DateTime<Utc>,
) {
    push_clause(builder, has_clause);
    builder.push("user_id = ").push_bind(user_id);

    if let Some(is_valid) = filter.is_valid {
        push_clause(builder, has_clause);
        builder.push("is_valid = ").push_bind(is_valid);
    }
    if !filter.include_expired {
        push_clause(builder, has_clause);
        builder.push("expires_at > ").push_bind(now);
    }
    if let Some(ip) = filter.ip_address.as_deref().filter(|s| !s.is_empty()) {
        push_clause(builder, has_clause);
        builder
            .push("ip_address ILIKE ")
            .push_bind(format!("%{}%", escape_like(ip)));
    }
    if let Some(device) = filter.device.as_deref().filter(|s| !s.is_empty()) {
        push_clause(builder, has_clause);
        builder
            .push("device ILIKE ")
            .push_bind(format!("%{}%", escape_like(device)));
    }
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn create(&self, session: NewSession) -> Result<Session, AppError> {
        let sql = format!(
            "INSERT INTO sessions \
             (id, user_id, access_token, refresh_token, user_agent, ip_address, device, location, \
             expires_at, last_activity_at, is_valid, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, TRUE, $10, $10) \
             RETURNING {}",
            SESSION_COLUMNS
        );
        let created = sqlx::query_as::<_, Session>(&sql)
            .bind(session.id)
            .bind(session.user_id)
            .bind(&session.access_token)
            .bind(&session.refresh_token)
            .bind(&session.device.user_agent)
            .bind(&session.device.ip_address)
            .bind(&session.device.device)
            .bind(&session.device.location)
            .bind(session.expires_at)
            .bind(session.now)
            .fetch_one(&self.pool)
            .await?;
        Ok(created)
    }

    async fn find_by_id(&self, id: SessionId) -> Result<Option<Session>, AppError> {
        let sql = format!("SELECT {} FROM sessions WHERE id = $1", SESSION_COLUMNS);
        let session = sqlx::query_as::<_, Session>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    async fn find_by_access_token(&self, token: &str) -> Result<Option<Session>, AppError> {
        self.find_one_by("access_token", token).await
    }

    async fn find_by_refresh_token(&self, token: &str) -> Result<Option<Session>, AppError> {
        self.find_one_by("refresh_token", token).await
    }

    async fn find_by_user_id(
        &self,
        user_id: UserId,
        filter: &SessionFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, AppError> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM sessions", SESSION_COLUMNS));
        let mut has_clause = false;
        apply_session_filters(&mut builder, &mut has_clause, user_id, filter, now);

        let order = filter.sort_order.keyword();
        builder.push(format!(
            " ORDER BY {} {}, id {}",
            filter.sort_by.column(),
            order,
            order
        ));
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ").push_bind(limit);
        }
        if let Some(offset) = filter.offset {
            builder.push(" OFFSET ").push_bind(offset);
        }

        let sessions = builder
            .build_query_as::<Session>()
            .fetch_all(&self.pool)
            .await?;
        Ok(sessions)
    }

    async fn count_by_user_id(
        &self,
        user_id: UserId,
        filter: &SessionFilter,
        now: DateTime<Utc>,
    ) -> Result<i64, AppError> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM sessions");
        let mut has_clause = false;
        apply_session_filters(&mut builder, &mut has_clause, user_id, filter, now);
        let total = builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;
        Ok(total)
    }

    async fn count_active(&self, user_id: UserId, now: DateTime<Utc>) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM sessions WHERE user_id = $1 AND is_valid AND expires_at > $2",
        )
        .bind(user_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn update(
        &self,
        id: SessionId,
        update: &SessionUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, AppError> {
        let sql = format!(
            "UPDATE sessions SET \
             access_token = COALESCE($2, access_token), \
             refresh_token = COALESCE($3, refresh_token), \
             expires_at = COALESCE($4, expires_at), \
             last_activity_at = COALESCE($5, last_activity_at), \
             is_valid = COALESCE($6, is_valid), \
             revoked_reason = COALESCE($7, revoked_reason), \
             updated_at = $8 \
             WHERE id = $1 \
             RETURNING {}",
            SESSION_COLUMNS
        );
        let session = sqlx::query_as::<_, Session>(&sql)
            .bind(id)
            .bind(&update.access_token)
            .bind(&update.refresh_token)
            .bind(update.expires_at)
            .bind(update.last_activity_at)
            .bind(update.is_valid)
            .bind(&update.revoked_reason)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    async fn rotate_tokens(
        &self,
        id: SessionId,
        expected_refresh_token: &str,
        update: &SessionUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, AppError> {
        let sql = format!(
            "UPDATE sessions SET \
             access_token = COALESCE($3, access_token), \
             refresh_token = COALESCE($4, refresh_token), \
             expires_at = COALESCE($5, expires_at), \
             last_activity_at = COALESCE($6, last_activity_at), \
             updated_at = $7 \
             WHERE id = $1 AND refresh_token = $2 AND is_valid \
             RETURNING {}",
            SESSION_COLUMNS
        );
        let session = sqlx::query_as::<_, Session>(&sql)
            .bind(id)
            .bind(expected_refresh_token)
            .bind(&update.access_token)
            .bind(&update.refresh_token)
            .bind(update.expires_at)
            .bind(update.last_activity_at)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    async fn revoke(
        &self,
        id: SessionId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE sessions SET is_valid = FALSE, revoked_reason = $2, updated_at = $3 \
             WHERE id = $1 AND is_valid",
        )
        .bind(id)
        .bind(reason)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all_by_user(
        &self,
        user_id: UserId,
        except: Option<SessionId>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, AppError> {
        let sql = format!(
            "UPDATE sessions SET is_valid = FALSE, revoked_reason = $3, updated_at = $4 \
             WHERE user_id = $1 AND is_valid AND ($2::uuid IS NULL OR id <> $2) \
             RETURNING {}",
            SESSION_COLUMNS
        );
        let sessions = sqlx::query_as::<_, Session>(&sql)
            .bind(user_id)
            .bind(except)
            .bind(reason)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
        Ok(sessions)
    }

    async fn delete_expired(&self, now: DateTime<Utc>, batch_size: i64) -> Result<u64, AppError> {
        let result = sqlx::query(
            "DELETE FROM sessions WHERE id IN ( \
                SELECT id FROM sessions WHERE expires_at <= $1 \
                ORDER BY expires_at LIMIT $2 FOR UPDATE SKIP LOCKED)",
        )
        .bind(now)
        .bind(batch_size)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_old_revoked(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            "DELETE FROM sessions WHERE id IN ( \
                SELECT id FROM sessions WHERE NOT is_valid AND updated_at < $1 \
                ORDER BY updated_at LIMIT $2 FOR UPDATE SKIP LOCKED)",
        )
        .bind(cutoff)
        .bind(batch_size)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
