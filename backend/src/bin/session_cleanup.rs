use sessionkeeper_backend::{config::Config, state::AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sessionkeeper_backend=info,session_cleanup=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    let retention_days = config.revoked_retention_days;
    let state = AppState::build(config).await?;

    let expired = state.sessions.cleanup_expired_sessions().await?;
    let revoked = state
        .sessions
        .cleanup_old_revoked_sessions(retention_days)
        .await?;
    tracing::info!(expired, revoked, retention_days, "Session cleanup finished");

    if let Some(pool) = &state.db_pool {
        sqlx::query("VACUUM (ANALYZE) sessions").execute(pool).await?;
    }

    Ok(())
}
