use serde_json::Value as JsonValue;
use sqlx::types::Json;

use crate::JobStatus;

/// A job row as it is written, before the engine assigns its key.
#[derive(Clone, Debug, PartialEq)]
pub struct NewJob {
    pub job_type: String,
    pub payload: JsonValue,
    pub status: JobStatus,
    pub scheduled_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A stored job row. `id` is the engine's internal key.
#[derive(Clone, Debug, PartialEq, sqlx::FromRow)]
pub struct JobRow {
    pub id: i64,
    #[sqlx(rename = "type")]
    pub job_type: String,
    pub payload: Json<JsonValue>,
    pub status: String,
    pub scheduled_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A job row joined with the details of its identifying history row.
#[derive(Clone, Debug, sqlx::FromRow)]
pub(crate) struct JoinedJobRow {
    pub id: i64,
    #[sqlx(rename = "type")]
    pub job_type: String,
    pub payload: Json<JsonValue>,
    pub status: String,
    pub scheduled_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub details: Option<Json<JsonValue>>,
}

impl JoinedJobRow {
    pub(crate) fn split(self) -> (JobRow, Option<JsonValue>) {
        let details = self.details.map(|Json(details)| details);
        let row = JobRow {
            id: self.id,
            job_type: self.job_type,
            payload: self.payload,
            status: self.status,
            scheduled_at: self.scheduled_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            attempts: self.attempts,
            last_error: self.last_error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        };
        (row, details)
    }
}

/// A history row as it is written. The engine fills in `job_id`.
#[derive(Clone, Debug, PartialEq)]
pub struct NewHistory {
    pub status: JobStatus,
    pub details: JsonValue,
    pub created_at: i64,
}

#[derive(Clone, Debug, PartialEq, sqlx::FromRow)]
pub struct HistoryRow {
    pub id: i64,
    pub job_id: i64,
    pub status: String,
    pub details: Json<JsonValue>,
    pub created_at: i64,
}

/// Columns a status update writes. `None` leaves the stored value untouched.
#[derive(Clone, Debug, PartialEq)]
pub struct JobPatch {
    pub status: JobStatus,
    pub updated_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub last_error: Option<String>,
}

/// Order in which history rows are returned, by insertion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryOrder {
    OldestFirst,
    NewestFirst,
}

/// Table-level access to one physical store.
///
/// Each engine owns a `jobs` table and an append-only `job_history` table.
/// Filters are conditions built by the engine's matching `QueryAdapter`.
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    type Condition: Send + Sync;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Insert a job row and its first history row atomically.
    ///
    /// Returns the generated key, or `None` when the store did not produce one,
    /// in which case nothing is written.
    async fn insert_job(&self, job: NewJob, history: NewHistory)
        -> Result<Option<i64>, Self::Error>;

    /// Fetch history rows matching `filter`.
    async fn find_history(
        &self,
        filter: &Self::Condition,
        order: HistoryOrder,
        limit: Option<i64>,
    ) -> Result<Vec<HistoryRow>, Self::Error>;

    /// Fetch job rows matching `filter`, each with the details of its oldest
    /// history row matching `join`, if any.
    async fn find_jobs_with_history(
        &self,
        filter: &Self::Condition,
        join: &Self::Condition,
    ) -> Result<Vec<(JobRow, Option<JsonValue>)>, Self::Error>;

    /// Apply `patch` to the job matching `filter` and append `history` for
    /// `job_id`, in one transaction.
    ///
    /// Returns `false` when no job row matched, e.g. because it was deleted
    /// after its key was resolved. Nothing is written in that case.
    async fn record_status(
        &self,
        job_id: i64,
        filter: &Self::Condition,
        patch: &JobPatch,
        history: NewHistory,
    ) -> Result<bool, Self::Error>;

    /// Delete the job rows matching `filter` together with their history.
    /// Returns the number of job rows removed.
    async fn delete_jobs(&self, filter: &Self::Condition) -> Result<u64, Self::Error>;
}
