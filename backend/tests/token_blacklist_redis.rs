use chrono::Utc;
use sessionkeeper_backend::{
    db::redis::create_redis_pool,
    services::{
        cache::{CacheStore, RedisCache},
        token_blacklist::TokenBlacklist,
    },
    types::UserId,
};
use std::{sync::Arc, time::Duration};

mod support;

#[tokio::test]
async fn create_redis_pool_returns_none_when_disabled() {
    let config = support::test_config();
    let pool = create_redis_pool(&config).await.expect("create redis pool");
    assert!(pool.is_none());
}

#[tokio::test]
async fn unreachable_redis_surfaces_as_error() {
    let mut config = support::test_config();
    config.redis_url = Some("redis://127.0.0.1:1".to_string());
    config.redis_pool_size = 1;
    config.redis_connect_timeout = 1;

    let pool = create_redis_pool(&config)
        .await
        .expect("pool builder should succeed")
        .expect("pool should be returned");
    let cache = RedisCache::new(pool, Duration::from_millis(200));
    assert!(cache.get("anything").await.is_err());

    let blacklist = TokenBlacklist::new(Arc::new(cache), 60);
    assert!(blacklist.is_revoked("token").await.is_err());
}

#[tokio::test]
async fn blacklist_entries_are_shared_through_redis() {
    let Some(redis) = support::redis() else {
        return;
    };
    let mut config = support::test_config();
    config.redis_url = Some(redis.url.clone());
    let pool = create_redis_pool(&config)
        .await
        .expect("create redis pool")
        .expect("redis enabled");

    // Two caches over one server behave like two instances of the service.
    let first = TokenBlacklist::new(
        Arc::new(RedisCache::new(pool.clone(), Duration::from_secs(2))),
        60,
    );
    let second = TokenBlacklist::new(
        Arc::new(RedisCache::new(pool, Duration::from_secs(2))),
        60,
    );

    let token = format!("token-{}", uuid::Uuid::new_v4());
    first.revoke(&token, Some(30)).await.unwrap();
    assert!(second.is_revoked(&token).await.unwrap());

    let user = UserId::new();
    let revoked_at = Utc::now();
    first.revoke_user(&user, revoked_at, None).await.unwrap();
    assert!(second.is_user_revoked(&user).await.unwrap());
    assert!(second
        .covers_user_token(&user, revoked_at.timestamp())
        .await
        .unwrap());

    second.unblock(&token).await.unwrap();
    second.unblock_user(&user).await.unwrap();
    assert!(!first.is_revoked(&token).await.unwrap());
    assert!(!first.is_user_revoked(&user).await.unwrap());
}

#[tokio::test]
async fn redis_entries_expire_with_their_ttl() {
    let Some(redis) = support::redis() else {
        return;
    };
    let mut config = support::test_config();
    config.redis_url = Some(redis.url.clone());
    let pool = create_redis_pool(&config)
        .await
        .expect("create redis pool")
        .expect("redis enabled");
    let cache = RedisCache::new(pool, Duration::from_secs(2));
    let key = format!("ttl-test-{}", uuid::Uuid::new_v4());

    cache.set(&key, "1", 1).await.unwrap();
    assert!(cache.exists(&key).await.unwrap());
    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert!(!cache.exists(&key).await.unwrap());
}
