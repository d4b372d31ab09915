//! Resume in-flight work after a restart and keep the job tables trimmed.
//!
//! JOBLEDGER_ENGINE=sqlite JOBLEDGER_SQLITE_URL=sqlite://demo.db cargo run --example recovery

use jobledger::prelude::*;
use jobledger::{Settings, Sweeper};
use serde_json::json;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let settings = Settings::load()?;
    let repository = jobledger::open(&settings).await?;

    let mut jobs = repository.load_active_jobs().await?;
    jobs.sort_by_key(|job| job.created_at);
    for job in &jobs {
        info!("Resuming job id={} status={} name={}", job.id, job.status, job.name);
    }

    let id = format!("demo-{}", jobledger::now_millis());
    if !repository.exists(&id).await? {
        let job = NormalizedJob::builder()
            .id(id.clone())
            .job_type(JobType::ToolExecution)
            .name("summarise".to_string())
            .priority(JobPriority::High)
            .payload(JobPayload {
                data: json!({ "url": "https://example.com" }),
                timeout: Some(30_000),
                ..Default::default()
            })
            .tool("fetch".to_string())
            .build();
        repository.insert(&job).await?;
    }

    let started = jobledger::now_millis();
    repository
        .update_status(&id, StatusUpdate::new(JobStatus::Running).started_at(started))
        .await?;
    repository
        .update_status(
            &id,
            StatusUpdate::new(JobStatus::Completed)
                .completed_at(jobledger::now_millis())
                .result(JobResult::success()),
        )
        .await?;

    for entry in repository.history(&id).await? {
        info!("History id={} status={} at={}", id, entry.status, entry.created_at);
    }

    let _sweeper = Sweeper::from_settings(repository.clone(), &settings).start();

    tokio::signal::ctrl_c().await?;

    Ok(())
}
