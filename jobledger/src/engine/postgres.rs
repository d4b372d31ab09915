use crate::engine::storage::{
    HistoryOrder, HistoryRow, JobPatch, JobRow, JoinedJobRow, NewHistory, NewJob, Storage,
};
use crate::query::{PgQueryAdapter, SqlCondition};
use crate::repository::Repository;
use futures::TryStreamExt;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgConnection, QueryBuilder};
use std::sync::Arc;
use tracing::info;

const JOINED_COLUMNS: &str = "jobs.id AS id, jobs.type AS type, jobs.payload AS payload, \
     jobs.status AS status, jobs.scheduled_at AS scheduled_at, jobs.started_at AS started_at, \
     jobs.completed_at AS completed_at, jobs.attempts AS attempts, jobs.last_error AS last_error, \
     jobs.created_at AS created_at, jobs.updated_at AS updated_at, origin.details AS details";

/// Durable storage engine backed by PostgreSQL.
pub struct Postgres {
    pub pool: Arc<sqlx::PgPool>,
}

impl Postgres {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Create or upgrade the `jobs` and `job_history` tables.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations/postgres").run(&*self.pool).await?;
        info!("postgres job tables are up to date");
        Ok(())
    }

    pub fn into_repository(self) -> Repository<Self, PgQueryAdapter> {
        Repository::new(self, PgQueryAdapter)
    }
}

impl From<sqlx::PgPool> for Postgres {
    fn from(pool: sqlx::PgPool) -> Self {
        Self::new(pool)
    }
}

impl From<Arc<sqlx::PgPool>> for Postgres {
    fn from(pool: Arc<sqlx::PgPool>) -> Self {
        Self { pool }
    }
}

async fn insert_history(
    conn: &mut PgConnection,
    job_id: i64,
    history: NewHistory,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO job_history (job_id, status, details, created_at) VALUES ($1, $2, $3, $4)"#,
    )
    .bind(job_id)
    .bind(history.status.as_str())
    .bind(Json(history.details))
    .bind(history.created_at)
    .execute(conn)
    .await
    .map(|_| ())
}

#[async_trait::async_trait]
impl Storage for Postgres {
    type Condition = SqlCondition<sqlx::Postgres>;
    type Error = sqlx::Error;

    async fn insert_job(
        &self,
        job: NewJob,
        history: NewHistory,
    ) -> Result<Option<i64>, Self::Error> {
        let mut tx = self.pool.begin().await?;

        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO jobs (
                type, payload, status, scheduled_at, started_at, completed_at,
                attempts, last_error, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            "#,
        )
        .bind(&job.job_type)
        .bind(Json(job.payload))
        .bind(job.status.as_str())
        .bind(job.scheduled_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.attempts)
        .bind(&job.last_error)
        .bind(job.created_at)
        .bind(job.updated_at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(id) = id else {
            tx.rollback().await?;
            return Ok(None);
        };

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
        let mut builder = QueryBuilder::<sqlx::Postgres>::new(
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
        let mut builder = QueryBuilder::<sqlx::Postgres>::new("SELECT ");
        builder.push(JOINED_COLUMNS);
        builder.push(
            " FROM jobs LEFT JOIN LATERAL (\
             SELECT job_history.details FROM job_history \
             WHERE job_history.job_id = jobs.id AND ",
        );
        join.push_to(&mut builder);
        builder.push(" ORDER BY job_history.id ASC LIMIT 1) origin ON TRUE WHERE ");
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

        let mut builder = QueryBuilder::<sqlx::Postgres>::new("UPDATE jobs SET status = ");
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
        // job_history rows go with their job through ON DELETE CASCADE.
        let mut builder = QueryBuilder::<sqlx::Postgres>::new("DELETE FROM jobs WHERE ");
        filter.push_to(&mut builder);

        let result = builder.build().execute(&*self.pool).await?;
        Ok(result.rows_affected())
    }
}
