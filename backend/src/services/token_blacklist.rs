use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::services::cache::CacheStore;
use crate::types::UserId;

/// Revocation ledger for tokens that still verify cryptographically.
///
/// Entries live in the shared cache and disappear with their TTL, so the
/// ledger survives restarts (with Redis) and is visible to every instance.
#[derive(Clone)]
pub struct TokenBlacklist {
    cache: Arc<dyn CacheStore>,
    default_ttl_seconds: u64,
}

impl TokenBlacklist {
    /// `default_ttl_seconds` is used when the caller does not know how long
    /// the revoked credential would have stayed valid.
    pub fn new(cache: Arc<dyn CacheStore>, default_ttl_seconds: u64) -> Self {
        Self {
            cache,
            default_ttl_seconds,
        }
    }

    fn token_key(token: &str) -> String {
        let digest = Sha256::digest(token.as_bytes());
        format!("blacklist:token:{}", hex::encode(digest))
    }

    fn user_key(user_id: &UserId) -> String {
        format!("blacklist:user:{}", user_id)
    }

    fn ttl(&self, ttl_seconds: Option<u64>) -> u64 {
        ttl_seconds.unwrap_or(self.default_ttl_seconds).max(1)
    }

    /// Idempotent; a second call only refreshes the TTL.
    pub async fn revoke(&self, token: &str, ttl_seconds: Option<u64>) -> anyhow::Result<()> {
        let ttl = self.ttl(ttl_seconds);
        self.cache.set(&Self::token_key(token), "1", ttl).await?;
        tracing::debug!(ttl_seconds = ttl, "Token blacklisted");
        Ok(())
    }

    pub async fn is_revoked(&self, token: &str) -> anyhow::Result<bool> {
        self.cache.exists(&Self::token_key(token)).await
    }

    /// Revokes every credential of `user_id` issued at or before `revoked_at`.
    pub async fn revoke_user(
        &self,
        user_id: &UserId,
        revoked_at: DateTime<Utc>,
        ttl_seconds: Option<u64>,
    ) -> anyhow::Result<()> {
        let ttl = self.ttl(ttl_seconds);
        self.cache
            .set(
                &Self::user_key(user_id),
                &revoked_at.timestamp().to_string(),
                ttl,
            )
            .await?;
        tracing::info!(%user_id, ttl_seconds = ttl, "User credentials blacklisted");
        Ok(())
    }

    pub async fn is_user_revoked(&self, user_id: &UserId) -> anyhow::Result<bool> {
        self.cache.exists(&Self::user_key(user_id)).await
    }

    /// Unix timestamp of the user-wide revocation, if one is in force.
    pub async fn user_revoked_at(&self, user_id: &UserId) -> anyhow::Result<Option<i64>> {
        let raw = self.cache.get(&Self::user_key(user_id)).await?;
        Ok(raw.and_then(|value| value.parse().ok()))
    }

    /// True when a user-wide revocation covers a token issued at `issued_at`.
    pub async fn covers_user_token(&self, user_id: &UserId, issued_at: i64) -> anyhow::Result<bool> {
        Ok(self
            .user_revoked_at(user_id)
            .await?
            .map(|revoked_at| issued_at <= revoked_at)
            .unwrap_or(false))
    }

    pub async fn unblock(&self, token: &str) -> anyhow::Result<()> {
        self.cache.delete(&Self::token_key(token)).await
    }

    pub async fn unblock_user(&self, user_id: &UserId) -> anyhow::Result<()> {
        self.cache.delete(&Self::user_key(user_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::cache::{MemoryCache, MockCacheStore};

    fn blacklist() -> TokenBlacklist {
        TokenBlacklist::new(Arc::new(MemoryCache::new()), 3600)
    }

    #[tokio::test]
    async fn revoke_is_idempotent_and_unblock_clears() {
        let blacklist = blacklist();
        assert!(!blacklist.is_revoked("tok").await.unwrap());

        blacklist.revoke("tok", Some(60)).await.unwrap();
        blacklist.revoke("tok", Some(120)).await.unwrap();
        assert!(blacklist.is_revoked("tok").await.unwrap());
        assert!(!blacklist.is_revoked("other").await.unwrap());

        blacklist.unblock("tok").await.unwrap();
        assert!(!blacklist.is_revoked("tok").await.unwrap());
    }

    #[tokio::test]
    async fn user_revocation_covers_tokens_issued_until_then() {
        let blacklist = blacklist();
        let user = UserId::new();
        let at = Utc::now();
        assert!(!blacklist.is_user_revoked(&user).await.unwrap());

        blacklist.revoke_user(&user, at, None).await.unwrap();
        assert!(blacklist.is_user_revoked(&user).await.unwrap());
        assert!(blacklist.covers_user_token(&user, at.timestamp()).await.unwrap());
        assert!(blacklist.covers_user_token(&user, at.timestamp() - 10).await.unwrap());
        assert!(!blacklist.covers_user_token(&user, at.timestamp() + 1).await.unwrap());

        blacklist.unblock_user(&user).await.unwrap();
        assert!(!blacklist.is_user_revoked(&user).await.unwrap());
    }

    #[tokio::test]
    async fn default_ttl_applies_and_zero_is_floored() {
        let mut cache = MockCacheStore::new();
        cache
            .expect_set()
            .withf(|key, value, ttl| key.starts_with("blacklist:token:") && value == "1" && *ttl == 900)
            .times(1)
            .returning(|_, _, _| Ok(()));
        cache
            .expect_set()
            .withf(|_, value, ttl| value == "1" && *ttl == 1)
            .times(1)
            .returning(|_, _, _| Ok(()));
        let blacklist = TokenBlacklist::new(Arc::new(cache), 900);

        blacklist.revoke("a", None).await.unwrap();
        blacklist.revoke("b", Some(0)).await.unwrap();
    }

    #[tokio::test]
    async fn token_key_does_not_store_raw_token() {
        let key = TokenBlacklist::token_key("secret.token.value");
        assert!(!key.contains("secret"));
        assert_eq!(key.len(), "blacklist:token:".len() + 64);
    }
}
