//! Lifecycle event sink.
//!
//! Publishing is best effort: the session manager logs a failed publish and
//! carries on, so no sink can fail a login or a revocation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sqlx::{types::Json, PgPool};
use uuid::Uuid;

use crate::types::{SessionId, UserId};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event_type: &str, payload: Value) -> anyhow::Result<()>;
}

/// Lifecycle transitions announced by the session manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Created {
        user_id: UserId,
        session_id: SessionId,
    },
    Refreshed {
        user_id: UserId,
        session_id: SessionId,
    },
    Extended {
        user_id: UserId,
        session_id: SessionId,
        expires_at: DateTime<Utc>,
    },
    Revoked {
        user_id: UserId,
        session_id: SessionId,
        reason: String,
    },
    Evicted {
        user_id: UserId,
        session_id: SessionId,
    },
    RevokedAll {
        user_id: UserId,
        count: usize,
        reason: String,
    },
    CleanedUp {
        kind: &'static str,
        deleted: u64,
    },
}

impl SessionEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::Created { .. } => "session.created",
            SessionEvent::Refreshed { .. } => "session.refreshed",
            SessionEvent::Extended { .. } => "session.extended",
            SessionEvent::Revoked { .. } => "session.revoked",
            SessionEvent::Evicted { .. } => "session.evicted",
            SessionEvent::RevokedAll { .. } => "session.revoked_all",
            SessionEvent::CleanedUp { .. } => "session.cleaned_up",
        }
    }

    pub fn user_id(&self) -> Option<UserId> {
        match self {
            SessionEvent::Created { user_id, .. }
            | SessionEvent::Refreshed { user_id, .. }
            | SessionEvent::Extended { user_id, .. }
            | SessionEvent::Revoked { user_id, .. }
            | SessionEvent::Evicted { user_id, .. }
            | SessionEvent::RevokedAll { user_id, .. } => Some(*user_id),
            SessionEvent::CleanedUp { .. } => None,
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            SessionEvent::Created {
                user_id,
                session_id,
            }
            | SessionEvent::Refreshed {
                user_id,
                session_id,
            }
            | SessionEvent::Evicted {
                user_id,
                session_id,
            } => json!({ "user_id": user_id, "session_id": session_id }),
            SessionEvent::Extended {
                user_id,
                session_id,
                expires_at,
            } => json!({
                "user_id": user_id,
                "session_id": session_id,
                "expires_at": expires_at,
            }),
            SessionEvent::Revoked {
                user_id,
                session_id,
                reason,
            } => json!({
                "user_id": user_id,
                "session_id": session_id,
                "reason": reason,
            }),
            SessionEvent::RevokedAll {
                user_id,
                count,
                reason,
            } => json!({ "user_id": user_id, "count": count, "reason": reason }),
            SessionEvent::CleanedUp { kind, deleted } => {
                json!({ "kind": kind, "deleted": deleted })
            }
        }
    }
}

/// Writes every event to the log at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventPublisher;

#[async_trait]
impl EventPublisher for TracingEventPublisher {
    async fn publish(&self, event_type: &str, payload: Value) -> anyhow::Result<()> {
        tracing::info!(event_type, %payload, "Session event");
        Ok(())
    }
}

/// Persists events to `session_audit_logs`.
#[derive(Debug, Clone)]
pub struct AuditLogEventPublisher {
    pool: PgPool,
}

impl AuditLogEventPublisher {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn id_field(payload: &Value, field: &str) -> Option<Uuid> {
        payload
            .get(field)
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }
}

#[async_trait]
impl EventPublisher for AuditLogEventPublisher {
    async fn publish(&self, event_type: &str, payload: Value) -> anyhow::Result<()> {
        let user_id = Self::id_field(&payload, "user_id");
        let session_id = Self::id_field(&payload, "session_id");
        sqlx::query(
            "INSERT INTO session_audit_logs (id, occurred_at, event_type, user_id, session_id, payload) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::new_v4())
        .bind(Utc::now())
        .bind(event_type)
        .bind(user_id)
        .bind(session_id)
        .bind(Json(payload))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
