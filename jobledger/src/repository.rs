//! The job repository contract.
//!
//! `JobRepository` is what schedulers, executors and housekeeping tasks talk
//! to. `Repository` implements it once, generically, on top of any `Storage`
//! engine paired with that engine's `QueryAdapter`.

use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::engine::storage::{
    HistoryOrder, HistoryRow, JobPatch, JobRow, NewHistory, NewJob, Storage,
};
use crate::query::QueryAdapter;
use crate::{
    Error, HistoryDetails, HistoryEntry, JobPayload, JobPriority, JobResult, NormalizedJob,
    Result, StatusUpdate,
};

#[async_trait::async_trait]
pub trait JobRepository: Send + Sync {
    /// Record a new job and the history row that makes it addressable by its
    /// external id.
    ///
    /// If the engine yields no key for the new row nothing is recorded and
    /// `Ok(())` is returned.
    async fn insert(&self, job: &NormalizedJob) -> Result<()>;

    /// Whether any job was ever recorded under `external_id`.
    async fn exists(&self, external_id: &str) -> Result<bool>;

    /// Jobs in `pending`, `running` or `failed`, in no particular order.
    async fn load_active_jobs(&self) -> Result<Vec<NormalizedJob>>;

    /// Record a status transition. An unknown `external_id` is a no-op.
    async fn update_status(&self, external_id: &str, update: StatusUpdate) -> Result<()>;

    /// Delete `completed` jobs that finished before `cutoff` (epoch ms), along
    /// with their history. Returns the number of jobs removed.
    async fn cleanup_completed_before(&self, cutoff: i64) -> Result<u64>;

    /// The audit trail of the job addressed by `external_id`, oldest first.
    async fn history(&self, external_id: &str) -> Result<Vec<HistoryEntry>>;
}

pub struct Repository<S, A>
where
    S: Storage,
    A: QueryAdapter<Condition = S::Condition>,
{
    storage: Arc<S>,
    adapter: A,
}

impl<S, A> Repository<S, A>
where
    S: Storage,
    A: QueryAdapter<Condition = S::Condition>,
    Error: From<S::Error>,
{
    pub fn new(storage: impl Into<Arc<S>>, adapter: A) -> Self {
        Self {
            storage: storage.into(),
            adapter,
        }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Resolve an external id to the internal key of its most recently
    /// recorded job.
    async fn resolve(&self, external_id: &str) -> Result<Option<i64>> {
        let rows = self
            .storage
            .find_history(
                &self.adapter.external_id_eq(external_id),
                HistoryOrder::NewestFirst,
                Some(1),
            )
            .await?;

        Ok(rows.first().map(|row| row.job_id))
    }
}

fn new_job_row(job: &NormalizedJob) -> Result<NewJob> {
    Ok(NewJob {
        job_type: job.job_type.to_string(),
        payload: serde_json::to_value(&job.payload)?,
        status: job.status,
        scheduled_at: job.created_at,
        started_at: job.started_at,
        completed_at: job.completed_at,
        attempts: job.retry_count,
        last_error: job
            .result
            .as_ref()
            .and_then(JobResult::error_message)
            .map(String::from),
        created_at: job.created_at,
        updated_at: job.updated_at,
    })
}

/// Rebuild a job from its row and the details of its identifying history row.
fn reconstruct(row: JobRow, details: Option<JsonValue>) -> Result<NormalizedJob> {
    let details = details
        .as_ref()
        .map(HistoryDetails::from_value)
        .unwrap_or_default();

    let payload = match serde_json::from_value::<JobPayload>(row.payload.0.clone()) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(job_pk = row.id, error = %e, "stored payload is malformed, decoding leniently");
            JobPayload::from_value(&row.payload.0)
        }
    };

    Ok(NormalizedJob {
        id: details.external_id.unwrap_or_else(|| row.id.to_string()),
        name: details.name.unwrap_or_else(|| row.job_type.clone()),
        job_type: row.job_type.into(),
        priority: details.priority.unwrap_or(JobPriority::Medium),
        status: row.status.parse()?,
        created_at: row.created_at,
        updated_at: row.updated_at,
        started_at: row.started_at,
        completed_at: row.completed_at,
        payload,
        retry_count: row.attempts,
        result: row
            .last_error
            .map(|message| JobResult::failure("Error", message)),
        tool: details.tool,
        endpoint: details.endpoint,
        execution_history: Vec::new(),
    })
}

fn history_entry(row: HistoryRow) -> Result<HistoryEntry> {
    Ok(HistoryEntry {
        status: row.status.parse()?,
        details: HistoryDetails::from_value(&row.details.0),
        created_at: row.created_at,
    })
}

#[async_trait::async_trait]
impl<S, A> JobRepository for Repository<S, A>
where
    S: Storage,
    A: QueryAdapter<Condition = S::Condition>,
    Error: From<S::Error>,
{
    #[instrument(skip(self, job), fields(external_id = %job.id))]
    async fn insert(&self, job: &NormalizedJob) -> Result<()> {
        let row = new_job_row(job)?;
        let history = NewHistory {
            status: job.status,
            details: HistoryDetails::for_insert(job).to_value()?,
            created_at: job.created_at,
        };

        match self.storage.insert_job(row, history).await? {
            Some(job_pk) => debug!(job_pk, "job recorded"),
            None => warn!("storage returned no key for the new job, nothing recorded"),
        }

        Ok(())
    }

    #[instrument(skip(self))]
    async fn exists(&self, external_id: &str) -> Result<bool> {
        let rows = self
            .storage
            .find_history(
                &self.adapter.external_id_eq(external_id),
                HistoryOrder::OldestFirst,
                Some(1),
            )
            .await?;

        Ok(!rows.is_empty())
    }

    #[instrument(skip(self))]
    async fn load_active_jobs(&self) -> Result<Vec<NormalizedJob>> {
        let rows = self
            .storage
            .find_jobs_with_history(&self.adapter.status_active(), &self.adapter.has_external_id())
            .await?;

        let jobs = rows
            .into_iter()
            .map(|(row, details)| reconstruct(row, details))
            .collect::<Result<Vec<_>>>()?;

        info!("loaded {} active jobs", jobs.len());

        Ok(jobs)
    }

    #[instrument(skip(self, update), fields(status = %update.status))]
    async fn update_status(&self, external_id: &str, update: StatusUpdate) -> Result<()> {
        let Some(job_pk) = self.resolve(external_id).await? else {
            debug!("no job recorded under this external id");
            return Ok(());
        };

        let last_error = if update.status.is_settled() {
            update
                .result
                .as_ref()
                .and_then(JobResult::error_message)
                .map(String::from)
        } else {
            None
        };

        let patch = JobPatch {
            status: update.status,
            updated_at: update.updated_at,
            started_at: update.started_at,
            completed_at: update.completed_at,
            last_error,
        };

        let history = NewHistory {
            status: update.status,
            details: HistoryDetails::for_update(external_id, update.result).to_value()?,
            created_at: update.updated_at,
        };

        let recorded = self
            .storage
            .record_status(job_pk, &self.adapter.job_id_eq(job_pk), &patch, history)
            .await?;

        if recorded {
            debug!(job_pk, "status recorded");
        } else {
            debug!(job_pk, "job was removed before the update landed");
        }

        Ok(())
    }

    #[instrument(skip(self))]
    async fn cleanup_completed_before(&self, cutoff: i64) -> Result<u64> {
        let removed = self
            .storage
            .delete_jobs(&self.adapter.completed_before(cutoff))
            .await?;

        if removed > 0 {
            info!("removed {} completed jobs", removed);
        }

        Ok(removed)
    }

    #[instrument(skip(self))]
    async fn history(&self, external_id: &str) -> Result<Vec<HistoryEntry>> {
        // Every history row carries the external id, so one lookup returns the
        // whole trail. Keep only the job that `update_status` would address.
        let rows = self
            .storage
            .find_history(
                &self.adapter.external_id_eq(external_id),
                HistoryOrder::OldestFirst,
                None,
            )
            .await?;

        let Some(job_pk) = rows.last().map(|row| row.job_id) else {
            return Ok(Vec::new());
        };

        rows.into_iter()
            .filter(|row| row.job_id == job_pk)
            .map(history_entry)
            .collect()
    }
}
