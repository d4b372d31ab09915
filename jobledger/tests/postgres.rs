//! Runs against the database in `DATABASE_URL` and is skipped when it is
//! unset. These tests truncate the job tables, so point them at a scratch
//! database:
//!
//! DATABASE_URL=postgres://localhost/jobledger_test cargo test --test postgres

mod common;

use jobledger::{PgQueryAdapter, Postgres, Repository};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// The tests share one database, so they take turns.
static DATABASE: Mutex<()> = Mutex::new(());

type Locked = (MutexGuard<'static, ()>, Repository<Postgres, PgQueryAdapter>);

async fn repository() -> Option<Locked> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL is not set, skipping");
        return None;
    };
    let guard = DATABASE.lock().unwrap_or_else(PoisonError::into_inner);

    let storage = Postgres::connect(&url, 2).await.unwrap();
    storage.migrate().await.unwrap();

    sqlx::query("TRUNCATE jobs, job_history RESTART IDENTITY")
        .execute(&*storage.pool)
        .await
        .unwrap();

    Some((guard, storage.into_repository()))
}

#[tokio::test]
async fn insert_then_exists() {
    let Some((_db, repo)) = repository().await else {
        return;
    };
    common::insert_then_exists(&repo).await;
}

#[tokio::test]
async fn active_jobs_round_trip() {
    let Some((_db, repo)) = repository().await else {
        return;
    };
    common::active_jobs_round_trip(&repo).await;
}

#[tokio::test]
async fn active_set_excludes_completed() {
    let Some((_db, repo)) = repository().await else {
        return;
    };
    common::active_set_excludes_completed(&repo).await;
}

#[tokio::test]
async fn identity_survives_status_changes() {
    let Some((_db, repo)) = repository().await else {
        return;
    };
    common::updates_identity_survives_status_changes(&repo).await;
}

#[tokio::test]
async fn history_is_append_only() {
    let Some((_db, repo)) = repository().await else {
        return;
    };
    common::history_is_append_only(&repo).await;
}

#[tokio::test]
async fn update_of_unknown_job_is_ignored() {
    let Some((_db, repo)) = repository().await else {
        return;
    };
    common::update_of_unknown_job_is_ignored(&repo).await;
}

#[tokio::test]
async fn job_lifecycle() {
    let Some((_db, repo)) = repository().await else {
        return;
    };
    common::job_lifecycle(&repo).await;
}

#[tokio::test]
async fn retention_removes_only_old_completed_jobs() {
    let Some((_db, repo)) = repository().await else {
        return;
    };
    common::retention_removes_only_old_completed_jobs(&repo).await;
}

#[tokio::test]
async fn retention_never_touches_active_jobs() {
    let Some((_db, repo)) = repository().await else {
        return;
    };
    common::retention_never_touches_active_jobs(&repo).await;
}

#[tokio::test]
async fn cleanup_cascades_to_history() {
    let Some((_db, repo)) = repository().await else {
        return;
    };
    common::job_lifecycle(&repo).await;

    let history: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM job_history")
        .fetch_one(&*repo.storage().pool)
        .await
        .unwrap();
    assert_eq!(history, 0);
}

#[tokio::test]
async fn concurrent_updates_are_all_audited() {
    let Some((_db, repo)) = repository().await else {
        return;
    };
    common::concurrent_updates_are_all_audited(Arc::new(repo)).await;
}

#[tokio::test]
async fn retention_alongside_writes_keeps_active_jobs() {
    let Some((_db, repo)) = repository().await else {
        return;
    };
    common::retention_alongside_writes_keeps_active_jobs(Arc::new(repo)).await;
}
