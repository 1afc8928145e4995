use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;

use crate::error::AppError;
use crate::types::UserId;

/// Resolves a user's role claims at token issuance time.
///
/// `Ok(None)` means the user no longer exists.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn roles(&self, user_id: UserId) -> Result<Option<Vec<String>>, AppError>;
}

/// Reads roles from the host application's `users` table.
#[derive(Debug, Clone)]
pub struct PgIdentityProvider {
    pool: PgPool,
}

impl PgIdentityProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityProvider for PgIdentityProvider {
    async fn roles(&self, user_id: UserId) -> Result<Option<Vec<String>>, AppError> {
        let row = sqlx::query_as::<_, (String, bool)>(
            "SELECT LOWER(role), COALESCE(is_system_admin, FALSE) FROM users WHERE id::text = $1",
        )
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(role, is_system_admin)| {
            let mut roles = vec![role];
            if is_system_admin {
                roles.push("system_admin".to_string());
            }
            roles
        }))
    }
}

/// Fixed user → roles table for single-binary deployments and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityProvider {
    users: HashMap<UserId, Vec<String>>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user_id: UserId, roles: &[&str]) -> Self {
        self.users
            .insert(user_id, roles.iter().map(|r| r.to_string()).collect());
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn roles(&self, user_id: UserId) -> Result<Option<Vec<String>>, AppError> {
        Ok(self.users.get(&user_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_provider_knows_only_registered_users() {
        let known = UserId::new();
        let provider = StaticIdentityProvider::new().with_user(known, &["employee", "admin"]);

        assert_eq!(
            provider.roles(known).await.unwrap(),
            Some(vec!["employee".to_string(), "admin".to_string()])
        );
        assert_eq!(provider.roles(UserId::new()).await.unwrap(), None);
    }
}
