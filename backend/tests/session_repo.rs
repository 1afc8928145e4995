use chrono::{Duration, DurationRound, Utc};
use sessionkeeper_backend::{
    models::{
        session::SessionUpdate,
        session_query::{SessionFilter, SessionSortField, SortOrder},
    },
    repositories::{PgSessionRepository, SessionRepository},
    services::events::{AuditLogEventPublisher, EventPublisher},
    types::UserId,
};
use std::sync::Arc;

mod support;

fn now() -> chrono::DateTime<Utc> {
    // Postgres keeps microseconds.
    Utc::now()
        .duration_trunc(Duration::microseconds(1))
        .expect("truncate timestamp")
}

#[tokio::test]
async fn create_and_find_by_each_key() {
    let Some(pg) = support::postgres().await else {
        return;
    };
    let repo = PgSessionRepository::new(pg.pool.clone());
    let now = now();
    let user = UserId::new();

    let created = repo
        .create(support::new_session(user, now, Duration::hours(1)))
        .await
        .expect("create session");
    assert!(created.is_valid);
    assert_eq!(created.created_at, now);

    let by_id = repo.find_by_id(created.id).await.unwrap();
    assert_eq!(by_id.as_ref(), Some(&created));
    let by_access = repo
        .find_by_access_token(&created.access_token)
        .await
        .unwrap();
    assert_eq!(by_access.map(|s| s.id), Some(created.id));
    let by_refresh = repo
        .find_by_refresh_token(&created.refresh_token)
        .await
        .unwrap();
    assert_eq!(by_refresh.map(|s| s.id), Some(created.id));
    assert!(repo.find_by_refresh_token("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn duplicate_refresh_token_is_rejected() {
    let Some(pg) = support::postgres().await else {
        return;
    };
    let repo = PgSessionRepository::new(pg.pool.clone());
    let now = now();
    let user = UserId::new();
    let first = support::new_session(user, now, Duration::hours(1));
    let mut second = support::new_session(user, now, Duration::hours(1));
    second.refresh_token = first.refresh_token.clone();

    repo.create(first).await.unwrap();
    assert!(repo.create(second).await.is_err());
}

#[tokio::test]
async fn rotate_is_conditional_on_current_refresh_token() {
    let Some(pg) = support::postgres().await else {
        return;
    };
    let repo = PgSessionRepository::new(pg.pool.clone());
    let now = now();
    let created = repo
        .create(support::new_session(UserId::new(), now, Duration::hours(1)))
        .await
        .unwrap();
    let update = SessionUpdate {
        access_token: Some(format!("access-next-{}", created.id)),
        refresh_token: Some(format!("refresh-next-{}", created.id)),
        last_activity_at: Some(now + Duration::seconds(5)),
        ..Default::default()
    };

    let rotated = repo
        .rotate_tokens(created.id, &created.refresh_token, &update, now)
        .await
        .unwrap()
        .expect("first rotation wins");
    assert_eq!(rotated.refresh_token, format!("refresh-next-{}", created.id));
    assert_eq!(rotated.expires_at, created.expires_at);

    let replay = repo
        .rotate_tokens(created.id, &created.refresh_token, &update, now)
        .await
        .unwrap();
    assert!(replay.is_none());
}

#[tokio::test]
async fn revoke_all_respects_exception_and_filters() {
    let Some(pg) = support::postgres().await else {
        return;
    };
    let repo = PgSessionRepository::new(pg.pool.clone());
    let now = now();
    let user = UserId::new();

    let mut ids = Vec::new();
    for offset in 0..3 {
        let created = repo
            .create(support::new_session(
                user,
                now + Duration::seconds(offset),
                Duration::hours(1),
            ))
            .await
            .unwrap();
        ids.push(created.id);
    }
    assert_eq!(repo.count_active(user, now).await.unwrap(), 3);

    let revoked = repo
        .revoke_all_by_user(user, Some(ids[1]), "password_change", now)
        .await
        .unwrap();
    assert_eq!(revoked.len(), 2);
    assert!(revoked.iter().all(|s| s.id != ids[1] && !s.is_valid));
    assert_eq!(repo.count_active(user, now).await.unwrap(), 1);

    let oldest_first = SessionFilter {
        sort_by: SessionSortField::CreatedAt,
        sort_order: SortOrder::Asc,
        ..SessionFilter::all()
    };
    let listed = repo.find_by_user_id(user, &oldest_first, now).await.unwrap();
    assert_eq!(listed.iter().map(|s| s.id).collect::<Vec<_>>(), ids);

    let device_filter = SessionFilter {
        device: Some("FIREFOX".into()),
        ..SessionFilter::active()
    };
    assert_eq!(
        repo.count_by_user_id(user, &device_filter, now)
            .await
            .unwrap(),
        1
    );

    // Already revoked rows are left alone.
    assert!(!repo.revoke(ids[0], "admin_action", now).await.unwrap());
    assert!(repo.revoke(ids[1], "user_logout", now).await.unwrap());
}

#[tokio::test]
async fn sweeps_delete_only_rows_outside_the_active_set() {
    let Some(pg) = support::postgres().await else {
        return;
    };
    let repo = PgSessionRepository::new(pg.pool.clone());
    let now = now();
    let user = UserId::new();

    let expired = repo
        .create(support::new_session(user, now, Duration::seconds(-30)))
        .await
        .unwrap();
    let active = repo
        .create(support::new_session(user, now, Duration::hours(1)))
        .await
        .unwrap();
    let old_revoked = repo
        .create(support::new_session(user, now - Duration::days(40), Duration::days(60)))
        .await
        .unwrap();
    repo.revoke(old_revoked.id, "user_logout", now - Duration::days(35))
        .await
        .unwrap();

    while repo.delete_expired(now, 100).await.unwrap() == 100 {}
    while repo
        .delete_old_revoked(now - Duration::days(30), 100)
        .await
        .unwrap()
        == 100
    {}

    assert!(repo.find_by_id(expired.id).await.unwrap().is_none());
    assert!(repo.find_by_id(old_revoked.id).await.unwrap().is_none());
    assert!(repo.find_by_id(active.id).await.unwrap().is_some());
}

#[tokio::test]
async fn audit_publisher_writes_rows() {
    let Some(pg) = support::postgres().await else {
        return;
    };
    let publisher: Arc<dyn EventPublisher> = Arc::new(AuditLogEventPublisher::new(pg.pool.clone()));
    let user = UserId::new();

    publisher
        .publish(
            "session.revoked_all",
            serde_json::json!({ "user_id": user, "count": 2, "reason": "admin_action" }),
        )
        .await
        .expect("publish");

    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM session_audit_logs WHERE user_id = $1 AND event_type = $2",
    )
    .bind(*user.as_uuid())
    .bind("session.revoked_all")
    .fetch_one(&pg.pool)
    .await
    .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn manager_runs_against_postgres() {
    let Some(pg) = support::postgres().await else {
        return;
    };
    let user = UserId::new();
    let h = support::memory_harness_with(
        &support::test_config(),
        &[user],
        Arc::new(PgSessionRepository::new(pg.pool.clone())),
        Arc::new(AuditLogEventPublisher::new(pg.pool.clone())),
    );

    let issued = h
        .manager
        .create_session(user, support::device("pg"), None)
        .await
        .unwrap();
    h.clock.advance(Duration::seconds(5));
    let rotated = h
        .manager
        .refresh_session(&issued.tokens.refresh_token)
        .await
        .unwrap();
    assert!(h
        .manager
        .refresh_session(&issued.tokens.refresh_token)
        .await
        .is_err());
    h.manager
        .verify_access_token(&rotated.tokens.access_token)
        .await
        .unwrap();
}
