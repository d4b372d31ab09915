#![allow(dead_code)]

use jobledger::prelude::*;
use serde_json::json;
use std::sync::Arc;

pub const DAY: i64 = 24 * 60 * 60 * 1000;

pub fn job(id: &str, status: JobStatus) -> NormalizedJob {
    let mut job = NormalizedJob::builder()
        .id(id.to_string())
        .job_type(JobType::ToolExecution)
        .name(format!("run {id}"))
        .priority(JobPriority::High)
        .status(status)
        .created_at(DAY)
        .payload(JobPayload {
            data: json!({ "query": id }),
            timeout: Some(30_000),
            max_retries: Some(3),
            dependencies: vec![],
            tags: vec!["test".to_string()],
        })
        .tool("search".to_string())
        .endpoint("/v1/search".to_string())
        .build();
    if status == JobStatus::Completed {
        job.completed_at = Some(DAY);
    }
    job
}

pub fn active_ids(jobs: &[NormalizedJob]) -> Vec<String> {
    let mut ids: Vec<_> = jobs.iter().map(|job| job.id.clone()).collect();
    ids.sort();
    ids
}

pub async fn insert_then_exists(repo: &dyn JobRepository) {
    assert!(!repo.exists("job-1").await.unwrap());

    repo.insert(&job("job-1", JobStatus::Pending)).await.unwrap();

    assert!(repo.exists("job-1").await.unwrap());
    assert!(!repo.exists("job-2").await.unwrap());
}

pub async fn active_jobs_round_trip(repo: &dyn JobRepository) {
    let original = job("job-1", JobStatus::Running);
    repo.insert(&original).await.unwrap();

    let jobs = repo.load_active_jobs().await.unwrap();

    assert_eq!(jobs.len(), 1);
    let loaded = &jobs[0];
    assert_eq!(loaded.id, "job-1");
    assert_eq!(loaded.job_type, JobType::ToolExecution);
    assert_eq!(loaded.name, "run job-1");
    assert_eq!(loaded.priority, JobPriority::High);
    assert_eq!(loaded.status, JobStatus::Running);
    assert_eq!(loaded.payload, original.payload);
    assert_eq!(loaded.tool.as_deref(), Some("search"));
    assert_eq!(loaded.endpoint.as_deref(), Some("/v1/search"));
    assert_eq!(loaded.created_at, DAY);
    assert!(loaded.result.is_none());
    assert!(loaded.execution_history.is_empty());
}

pub async fn active_set_excludes_completed(repo: &dyn JobRepository) {
    for (id, status) in [
        ("pending", JobStatus::Pending),
        ("running", JobStatus::Running),
        ("failed", JobStatus::Failed),
        ("completed", JobStatus::Completed),
    ] {
        repo.insert(&job(id, status)).await.unwrap();
    }

    let jobs = repo.load_active_jobs().await.unwrap();

    assert_eq!(active_ids(&jobs), ["failed", "pending", "running"]);
}

pub async fn updates_identity_survives_status_changes(repo: &dyn JobRepository) {
    repo.insert(&job("job-1", JobStatus::Pending)).await.unwrap();
    repo.update_status(
        "job-1",
        StatusUpdate::new(JobStatus::Failed)
            .updated_at(2 * DAY)
            .result(JobResult::failure("TimeoutError", "gave up after 30s")),
    )
    .await
    .unwrap();

    let jobs = repo.load_active_jobs().await.unwrap();

    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id, "job-1");
    assert_eq!(jobs[0].name, "run job-1");
    assert_eq!(jobs[0].status, JobStatus::Failed);
    assert_eq!(jobs[0].updated_at, 2 * DAY);
    assert_eq!(
        jobs[0].result,
        Some(JobResult::failure("Error", "gave up after 30s"))
    );
}

pub async fn history_is_append_only(repo: &dyn JobRepository) {
    repo.insert(&job("job-1", JobStatus::Pending)).await.unwrap();
    let before = repo.history("job-1").await.unwrap();
    assert_eq!(before.len(), 1);

    repo.update_status(
        "job-1",
        StatusUpdate::new(JobStatus::Running)
            .updated_at(DAY + 1)
            .started_at(DAY + 1),
    )
    .await
    .unwrap();
    let after_running = repo.history("job-1").await.unwrap();

    repo.update_status(
        "job-1",
        StatusUpdate::new(JobStatus::Completed)
            .updated_at(DAY + 2)
            .completed_at(DAY + 2)
            .result(JobResult::success()),
    )
    .await
    .unwrap();
    let after_completed = repo.history("job-1").await.unwrap();

    assert_eq!(after_running.len(), 2);
    assert_eq!(after_completed.len(), 3);
    assert_eq!(after_completed[..2], after_running[..]);
    assert_eq!(after_running[..1], before[..]);

    let statuses: Vec<_> = after_completed.iter().map(|entry| entry.status).collect();
    assert_eq!(
        statuses,
        [JobStatus::Pending, JobStatus::Running, JobStatus::Completed]
    );
    assert_eq!(before[0].details.name.as_deref(), Some("run job-1"));
    assert_eq!(after_completed[2].details.result, Some(JobResult::success()));
    assert!(after_completed
        .iter()
        .all(|entry| entry.details.external_id.as_deref() == Some("job-1")));
}

pub async fn update_of_unknown_job_is_ignored(repo: &dyn JobRepository) {
    repo.insert(&job("job-1", JobStatus::Pending)).await.unwrap();

    repo.update_status("ghost", StatusUpdate::new(JobStatus::Completed))
        .await
        .unwrap();

    assert!(!repo.exists("ghost").await.unwrap());
    assert!(repo.history("ghost").await.unwrap().is_empty());
    assert_eq!(repo.history("job-1").await.unwrap().len(), 1);
}

/// insert → exists → active → complete → no longer active → swept.
pub async fn job_lifecycle(repo: &dyn JobRepository) {
    let completed_at = 5 * DAY;

    repo.insert(&job("job-1", JobStatus::Pending)).await.unwrap();
    assert!(repo.exists("job-1").await.unwrap());
    assert_eq!(active_ids(&repo.load_active_jobs().await.unwrap()), ["job-1"]);

    repo.update_status(
        "job-1",
        StatusUpdate::new(JobStatus::Completed)
            .updated_at(completed_at)
            .completed_at(completed_at),
    )
    .await
    .unwrap();
    assert!(repo.load_active_jobs().await.unwrap().is_empty());

    assert_eq!(repo.cleanup_completed_before(completed_at + 1).await.unwrap(), 1);
    assert!(!repo.exists("job-1").await.unwrap());
    assert!(repo.history("job-1").await.unwrap().is_empty());
}

pub async fn retention_removes_only_old_completed_jobs(repo: &dyn JobRepository) {
    for (id, day) in [("day-1", 1), ("day-2", 2)] {
        let mut done = job(id, JobStatus::Completed);
        done.completed_at = Some(day * DAY);
        repo.insert(&done).await.unwrap();
    }
    repo.insert(&job("pending", JobStatus::Pending)).await.unwrap();

    assert_eq!(repo.cleanup_completed_before(2 * DAY).await.unwrap(), 1);

    assert!(!repo.exists("day-1").await.unwrap());
    assert!(repo.exists("day-2").await.unwrap());
    assert!(repo.exists("pending").await.unwrap());
    assert_eq!(repo.cleanup_completed_before(2 * DAY).await.unwrap(), 0);
}

pub async fn retention_never_touches_active_jobs(repo: &dyn JobRepository) {
    for (id, status) in [
        ("pending", JobStatus::Pending),
        ("running", JobStatus::Running),
        ("failed", JobStatus::Failed),
    ] {
        let mut active = job(id, status);
        // A stale completion time must not make an active job eligible.
        active.completed_at = Some(DAY);
        repo.insert(&active).await.unwrap();
    }

    assert_eq!(repo.cleanup_completed_before(i64::MAX).await.unwrap(), 0);
    assert_eq!(repo.load_active_jobs().await.unwrap().len(), 3);
}

/// Two updates to the same job race; the row ends up with whichever landed
/// last and the trail records both.
pub async fn concurrent_updates_are_all_audited(repo: Arc<dyn JobRepository>) {
    repo.insert(&job("job-1", JobStatus::Pending)).await.unwrap();

    let running = {
        let repo = repo.clone();
        tokio::spawn(async move {
            repo.update_status(
                "job-1",
                StatusUpdate::new(JobStatus::Running)
                    .updated_at(DAY + 1)
                    .started_at(DAY + 1),
            )
            .await
        })
    };
    let failed = {
        let repo = repo.clone();
        tokio::spawn(async move {
            repo.update_status(
                "job-1",
                StatusUpdate::new(JobStatus::Failed)
                    .updated_at(DAY + 2)
                    .result(JobResult::failure("Error", "crashed")),
            )
            .await
        })
    };
    let (running, failed) = tokio::join!(running, failed);
    running.unwrap().unwrap();
    failed.unwrap().unwrap();

    let history = repo.history("job-1").await.unwrap();
    let statuses: Vec<_> = history.iter().map(|entry| entry.status).collect();
    assert_eq!(statuses.len(), 3);
    assert_eq!(statuses[0], JobStatus::Pending);
    assert!(statuses[1..].contains(&JobStatus::Running));
    assert!(statuses[1..].contains(&JobStatus::Failed));

    let jobs = repo.load_active_jobs().await.unwrap();
    let last = &history[2];
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, last.status);
    assert_eq!(jobs[0].updated_at, last.created_at);
}

/// Sweeps interleaved with inserts and updates only ever remove the old
/// completed jobs.
pub async fn retention_alongside_writes_keeps_active_jobs(repo: Arc<dyn JobRepository>) {
    for i in 0..5 {
        repo.insert(&job(&format!("done-{i}"), JobStatus::Completed))
            .await
            .unwrap();
        repo.insert(&job(&format!("active-{i}"), JobStatus::Pending))
            .await
            .unwrap();
    }

    let sweeper = {
        let repo = repo.clone();
        tokio::spawn(async move {
            let mut removed = 0;
            for _ in 0..5 {
                removed += repo.cleanup_completed_before(2 * DAY).await.unwrap();
                tokio::task::yield_now().await;
            }
            removed
        })
    };
    let writer = {
        let repo = repo.clone();
        tokio::spawn(async move {
            for i in 0..5 {
                repo.insert(&job(&format!("new-{i}"), JobStatus::Pending))
                    .await
                    .unwrap();
                repo.update_status(
                    &format!("active-{i}"),
                    StatusUpdate::new(JobStatus::Running)
                        .updated_at(2 * DAY)
                        .started_at(2 * DAY),
                )
                .await
                .unwrap();
                tokio::task::yield_now().await;
            }
        })
    };
    let (removed, written) = tokio::join!(sweeper, writer);
    written.unwrap();
    assert_eq!(removed.unwrap(), 5);

    let jobs = repo.load_active_jobs().await.unwrap();
    assert_eq!(jobs.len(), 10);
    assert!(jobs
        .iter()
        .filter(|job| job.id.starts_with("active-"))
        .all(|job| job.status == JobStatus::Running));
    for i in 0..5 {
        assert!(!repo.exists(&format!("done-{i}")).await.unwrap());
        assert_eq!(repo.history(&format!("active-{i}")).await.unwrap().len(), 2);
    }
}
