use crate::engine::storage::{
    HistoryOrder, HistoryRow, JobPatch, JobRow, JoinedJobRow, NewHistory, NewJob, Storage,
};
use crate::query::{SqlCondition, SqliteQueryAdapter};
use crate::repository::Repository;
use futures::TryStreamExt;
use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::{QueryBuilder, SqliteConnection};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

/// Lightweight storage engine backed by an SQLite file or an in-memory database.
///
/// Intended for development and single-node deployments.
pub struct Sqlite {
    pub pool: Arc<sqlx::SqlitePool>,
}

impl Sqlite {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open the database at `url`, creating the file if needed.
    ///
    /// In-memory URLs are served by a single connection that is never
    /// recycled, since every new connection would see an empty database.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = if is_memory_url(url) {
            debug!("opening in-memory sqlite database");
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(max_connections)
                .connect_with(options.journal_mode(SqliteJournalMode::Wal))
                .await?
        };

        Ok(Self::new(pool))
    }

    /// A private in-memory database, mostly useful in tests.
    pub async fn in_memory() -> Result<Self, sqlx::Error> {
        Self::connect("sqlite::memory:", 1).await
    }

    /// Create or upgrade the `jobs` and `job_history` tables.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations/sqlite").run(&*self.pool).await?;
        info!("sqlite job tables are up to date");
        Ok(())
    }

    pub fn into_repository(self) -> Repository<Self, SqliteQueryAdapter> {
        Repository::new(self, SqliteQueryAdapter)
    }
}

impl From<sqlx::SqlitePool> for Sqlite {
    fn from(pool: sqlx::SqlitePool) -> Self {
        Self::new(pool)
    }
}

impl From<Arc<sqlx::SqlitePool>> for Sqlite {
    fn from(pool: Arc<sqlx::SqlitePool>) -> Self {
        Self { pool }
    }
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

async fn insert_history(
    conn: &mut SqliteConnection,
    job_id: i64,
    history: NewHistory,
) -> Result<(), sqlx::Error> {
    sqlx::query(r#"INSERT INTO job_history (job_id, status, details, created_at) VALUES (?, ?, ?, ?)"#)
        .bind(job_id)
        .bind(history.status.as_str())
        .bind(Json(history.details))
        .bind(history.created_at)
        .execute(conn)
        .await
        .map(|_| ())
}

#[async_trait::async_trait]
impl Storage for Sqlite {
    type Condition = SqlCondition<sqlx::Sqlite>;
    type Error = sqlx::Error;

    async fn insert_job(
        &self,
        job: NewJob,
        history: NewHistory,
    ) -> Result<Option<i64>, Self::Error> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (
                type, payload, status, scheduled_at, started_at, completed_at,
                attempts, last_error, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.job_type)
        .bind(Json(job.payload))
        .bind(job.status.as_str())
        .bind(job.scheduled_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.attempts)
        .bind(job.last_error)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let id = result.last_insert_rowid();
        insert_history(&mut *tx, id, history).await?;
        tx.commit().await?;

        Ok(Some(id))
    }

    async fn find_history(
        &self,
        filter: &Self::Condition,
        order: HistoryOrder,
        limit: Option<i64>,
    ) -> Result<Vec<HistoryRow>, Self::Error> {
        let mut builder = QueryBuilder::<sqlx::Sqlite>::new(
            "SELECT id, job_id, status, details, created_at FROM job_history WHERE ",
        );
        filter.push_to(&mut builder);
        builder.push(match order {
            HistoryOrder::OldestFirst => " ORDER BY id ASC",
            HistoryOrder::NewestFirst => " ORDER BY id DESC",
        });
        if let Some(limit) = limit {
            builder.push(" LIMIT ").push_bind(limit);
        }

        builder
            .build_query_as::<HistoryRow>()
            .fetch_all(&*self.pool)
            .await
    }

    async fn find_jobs_with_history(
        &self,
        filter: &Self::Condition,
        join: &Self::Condition,
    ) -> Result<Vec<(JobRow, Option<JsonValue>)>, Self::Error> {
        let mut builder = QueryBuilder::<sqlx::Sqlite>::new(
            "SELECT jobs.id AS id, jobs.type AS type, jobs.payload AS payload, \
             jobs.status AS status, jobs.scheduled_at AS scheduled_at, \
             jobs.started_at AS started_at, jobs.completed_at AS completed_at, \
             jobs.attempts AS attempts, jobs.last_error AS last_error, \
             jobs.created_at AS created_at, jobs.updated_at AS updated_at, \
             (SELECT job_history.details FROM job_history \
             WHERE job_history.job_id = jobs.id AND ",
        );
        join.push_to(&mut builder);
        builder.push(" ORDER BY job_history.id ASC LIMIT 1) AS details FROM jobs WHERE ");
        filter.push_to(&mut builder);

        builder
            .build_query_as::<JoinedJobRow>()
            .fetch(&*self.pool)
            .map_ok(JoinedJobRow::split)
            .try_collect()
            .await
    }

    async fn record_status(
        &self,
        job_id: i64,
        filter: &Self::Condition,
        patch: &JobPatch,
        history: NewHistory,
    ) -> Result<bool, Self::Error> {
        let mut tx = self.pool.begin().await?;

        let mut builder = QueryBuilder::<sqlx::Sqlite>::new("UPDATE jobs SET status = ");
        builder.push_bind(patch.status.as_str());
        builder.push(", updated_at = ").push_bind(patch.updated_at);
        if let Some(started_at) = patch.started_at {
            builder.push(", started_at = ").push_bind(started_at);
        }
        if let Some(completed_at) = patch.completed_at {
            builder.push(", completed_at = ").push_bind(completed_at);
        }
        if let Some(last_error) = &patch.last_error {
            builder.push(", last_error = ").push_bind(last_error.clone());
        }
        builder.push(" WHERE ");
        filter.push_to(&mut builder);

        let result = builder.build().execute(&mut *tx).await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_history(&mut *tx, job_id, history).await?;
        tx.commit().await?;

        Ok(true)
    }

    async fn delete_jobs(&self, filter: &Self::Condition) -> Result<u64, Self::Error> {
        let mut tx = self.pool.begin().await?;

        let mut history = QueryBuilder::<sqlx::Sqlite>::new(
            "DELETE FROM job_history WHERE job_id IN (SELECT id FROM jobs WHERE ",
        );
        filter.push_to(&mut history);
        history.push(")");
        history.build().execute(&mut *tx).await?;

        let mut jobs = QueryBuilder::<sqlx::Sqlite>::new("DELETE FROM jobs WHERE ");
        filter.push_to(&mut jobs);
        let result = jobs.build().execute(&mut *tx).await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }
}
