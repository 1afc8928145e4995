//! Models for authenticated device/browser sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use utoipa::ToSchema;

use crate::types::{SessionId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
/// Database representation of a session.
pub struct Session {
    /// Unique identifier for the session record.
    pub id: SessionId,
    /// Identity owning the session.
    pub user_id: UserId,
    /// Currently issued access token.
    pub access_token: String,
    /// Currently issued refresh token.
    pub refresh_token: String,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub device: Option<String>,
    pub location: Option<String>,
    /// End of the refresh window; the session's outer lifetime.
    pub expires_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// `false` once revoked, regardless of `expires_at`.
    pub is_valid: bool,
    /// Why the session was revoked, when it was.
    pub revoked_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Active means not revoked and not past `expires_at`. Both checks always apply.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.is_valid && now < self.expires_at
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> SessionStatus {
        if !self.is_valid {
            match self.revocation_reason() {
                Some(RevocationReason::ConcurrencyEviction) => SessionStatus::Evicted,
                _ => SessionStatus::Revoked,
            }
        } else if now >= self.expires_at {
            SessionStatus::Expired
        } else {
            SessionStatus::Active
        }
    }

    pub fn revocation_reason(&self) -> Option<RevocationReason> {
        self.revoked_reason
            .as_deref()
            .and_then(|raw| raw.parse().ok())
    }

    pub fn device_meta(&self) -> DeviceMeta {
        DeviceMeta {
            user_agent: self.user_agent.clone(),
            ip_address: self.ip_address.clone(),
            device: self.device.clone(),
            location: self.location.clone(),
        }
    }
}

/// Display-only metadata describing where a session was opened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DeviceMeta {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub device: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Expired,
    Revoked,
    Evicted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    UserLogout,
    AdminAction,
    PasswordChange,
    ConcurrencyEviction,
    SecurityIncident,
}

impl RevocationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevocationReason::UserLogout => "user_logout",
            RevocationReason::AdminAction => "admin_action",
            RevocationReason::PasswordChange => "password_change",
            RevocationReason::ConcurrencyEviction => "concurrency_eviction",
            RevocationReason::SecurityIncident => "security_incident",
        }
    }
}

impl std::fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RevocationReason {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user_logout" => Ok(RevocationReason::UserLogout),
            "admin_action" => Ok(RevocationReason::AdminAction),
            "password_change" => Ok(RevocationReason::PasswordChange),
            "concurrency_eviction" => Ok(RevocationReason::ConcurrencyEviction),
            "security_incident" => Ok(RevocationReason::SecurityIncident),
            other => Err(format!("unknown revocation reason: {}", other)),
        }
    }
}

/// Fields required to persist a brand new session.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub id: SessionId,
    pub user_id: UserId,
    pub access_token: String,
    pub refresh_token: String,
    pub device: DeviceMeta,
    pub expires_at: DateTime<Utc>,
    pub now: DateTime<Utc>,
}

impl NewSession {
    pub fn into_session(self) -> Session {
        Session {
            id: self.id,
            user_id: self.user_id,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            user_agent: self.device.user_agent,
            ip_address: self.device.ip_address,
            device: self.device.device,
            location: self.device.location,
            expires_at: self.expires_at,
            last_activity_at: self.now,
            is_valid: true,
            revoked_reason: None,
            created_at: self.now,
            updated_at: self.now,
        }
    }
}

/// Partial update; `None` leaves a column untouched. `updated_at` always moves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionUpdate {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub is_valid: Option<bool>,
    pub revoked_reason: Option<String>,
}

impl SessionUpdate {
    pub fn apply(&self, session: &mut Session, now: DateTime<Utc>) {
        if let Some(token) = &self.access_token {
            session.access_token = token.clone();
        }
        if let Some(token) = &self.refresh_token {
            session.refresh_token = token.clone();
        }
        if let Some(expires_at) = self.expires_at {
            session.expires_at = expires_at;
        }
        if let Some(last_activity_at) = self.last_activity_at {
            session.last_activity_at = last_activity_at;
        }
        if let Some(is_valid) = self.is_valid {
            session.is_valid = is_valid;
        }
        if let Some(reason) = &self.revoked_reason {
            session.revoked_reason = Some(reason.clone());
        }
        session.updated_at = now;
    }
}

/// Freshly minted credentials handed back to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token_expires_at: DateTime<Utc>,
}

/// Session as shown to its owner. Carries no token material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct SessionView {
    #[schema(value_type = String)]
    pub id: SessionId,
    pub device: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub is_current: bool,
}

impl SessionView {
    pub fn from_session(
        session: &Session,
        current: Option<&SessionId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: session.id,
            device: session.device.clone(),
            user_agent: session.user_agent.clone(),
            ip_address: session.ip_address.clone(),
            location: session.location.clone(),
            created_at: session.created_at,
            last_activity_at: session.last_activity_at,
            expires_at: session.expires_at,
            status: session.status_at(now),
            is_current: current.map(|id| *id == session.id).unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct DeviceCount {
    pub device: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct SessionStatistics {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub expired_sessions: usize,
    pub revoked_sessions: usize,
    pub evicted_sessions: usize,
    /// Active sessions grouped by device label.
    pub active_devices: Vec<DeviceCount>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub oldest_active_created_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(now: DateTime<Utc>) -> Session {
        NewSession {
            id: SessionId::new(),
            user_id: UserId::new(),
            access_token: "a".into(),
            refresh_token: "r".into(),
            device: DeviceMeta::default(),
            expires_at: now + Duration::hours(1),
            now,
        }
        .into_session()
    }

    #[test]
    fn active_requires_both_validity_and_future_expiry() {
        let now = Utc::now();
        let mut s = session(now);
        assert!(s.is_active_at(now));
        assert!(!s.is_active_at(s.expires_at));

        s.is_valid = false;
        assert!(!s.is_active_at(now));
    }

    #[test]
    fn status_distinguishes_eviction_from_revocation() {
        let now = Utc::now();
        let mut s = session(now);
        assert_eq!(s.status_at(now), SessionStatus::Active);
        assert_eq!(s.status_at(now + Duration::hours(2)), SessionStatus::Expired);

        s.is_valid = false;
        s.revoked_reason = Some(RevocationReason::UserLogout.to_string());
        assert_eq!(s.status_at(now), SessionStatus::Revoked);

        s.revoked_reason = Some(RevocationReason::ConcurrencyEviction.to_string());
        assert_eq!(s.status_at(now), SessionStatus::Evicted);
    }

    #[test]
    fn update_touches_only_given_fields() {
        let now = Utc::now();
        let mut s = session(now);
        let later = now + Duration::minutes(5);
        SessionUpdate {
            last_activity_at: Some(later),
            ..Default::default()
        }
        .apply(&mut s, later);

        assert_eq!(s.last_activity_at, later);
        assert_eq!(s.updated_at, later);
        assert_eq!(s.access_token, "a");
        assert!(s.is_valid);
    }

    #[test]
    fn view_marks_current_session() {
        let now = Utc::now();
        let s = session(now);
        let view = SessionView::from_session(&s, Some(&s.id), now);
        assert!(view.is_current);
        let other = SessionView::from_session(&s, Some(&SessionId::new()), now);
        assert!(!other.is_current);
    }

    #[test]
    fn revocation_reason_roundtrips() {
        for reason in [
            RevocationReason::UserLogout,
            RevocationReason::AdminAction,
            RevocationReason::PasswordChange,
            RevocationReason::ConcurrencyEviction,
            RevocationReason::SecurityIncident,
        ] {
            assert_eq!(reason.as_str().parse::<RevocationReason>(), Ok(reason));
        }
    }
}
