use std::sync::Arc;
use std::time::Duration;

use crate::{
    config::{mask_secret, Config},
    db::{
        connection::{create_pool, run_migrations, DbPool},
        redis::create_redis_pool,
    },
    repositories::{MemorySessionRepository, PgSessionRepository, SessionRepository},
    services::{
        cache::{CacheStore, MemoryCache, RedisCache},
        events::{AuditLogEventPublisher, EventPublisher, TracingEventPublisher},
        identity::{IdentityProvider, PgIdentityProvider},
        token_blacklist::TokenBlacklist,
        SessionManager, SessionSettings, SessionStore,
    },
    utils::jwt::TokenCodec,
};

/// Composition root handed to the HTTP layer.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub db_pool: Option<DbPool>,
    pub sessions: Arc<SessionManager>,
}

impl AppState {
    /// Connects to Postgres (and Redis when configured) and applies migrations.
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        config.validate()?;
        tracing::info!(
            access_token_secret = %mask_secret(&config.access_token_secret),
            refresh_token_secret = %mask_secret(&config.refresh_token_secret),
            access_token_ttl_seconds = config.access_token_ttl_seconds,
            refresh_token_ttl_seconds = config.refresh_token_ttl_seconds,
            max_concurrent_sessions = config.max_concurrent_sessions,
            lifetime_policy = ?config.session_lifetime_policy,
            "Building session services"
        );

        let pool = create_pool(&config).await?;
        run_migrations(&pool).await?;

        let cache: Arc<dyn CacheStore> = match create_redis_pool(&config).await? {
            Some(redis) => Arc::new(RedisCache::new(
                redis,
                Duration::from_millis(config.redis_command_timeout_ms),
            )),
            None => Arc::new(MemoryCache::new()),
        };

        let sessions = Self::assemble(
            &config,
            Arc::new(PgSessionRepository::new(pool.clone())),
            cache,
            Arc::new(PgIdentityProvider::new(pool.clone())),
            Arc::new(AuditLogEventPublisher::new(pool.clone())),
        );

        Ok(Self {
            config,
            db_pool: Some(pool),
            sessions: Arc::new(sessions),
        })
    }

    /// Fully in-process wiring: no database, no Redis, events go to the log.
    pub fn in_memory(config: Config, identity: Arc<dyn IdentityProvider>) -> Self {
        let sessions = Self::assemble(
            &config,
            Arc::new(MemorySessionRepository::new()),
            Arc::new(MemoryCache::new()),
            identity,
            Arc::new(TracingEventPublisher),
        );
        Self {
            config,
            db_pool: None,
            sessions: Arc::new(sessions),
        }
    }

    pub fn assemble(
        config: &Config,
        repo: Arc<dyn SessionRepository>,
        cache: Arc<dyn CacheStore>,
        identity: Arc<dyn IdentityProvider>,
        events: Arc<dyn EventPublisher>,
    ) -> SessionManager {
        let store = SessionStore::new(
            repo,
            cache.clone(),
            config.session_cache_ttl_seconds.max(0) as u64,
        );
        let blacklist = TokenBlacklist::new(cache, config.refresh_token_ttl_seconds.max(1) as u64);
        let codec = TokenCodec::new(&config.access_token_secret, &config.refresh_token_secret);

        SessionManager::new(
            store,
            codec,
            blacklist,
            identity,
            events,
            SessionSettings::from_config(config),
        )
    }
}
