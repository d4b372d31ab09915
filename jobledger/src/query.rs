//! Query adapters.
//!
//! An adapter builds the filter conditions a storage engine needs without the
//! repository knowing anything about the engine's SQL dialect. Conditions are
//! opaque to the repository: it only hands them back to the engine.

use sqlx::QueryBuilder;
use std::fmt;
use std::marker::PhantomData;

use crate::JobStatus;

pub trait QueryAdapter: Send + Sync {
    type Condition: Send + Sync;

    /// History rows whose details carry the given external id.
    fn external_id_eq(&self, external_id: &str) -> Self::Condition;

    /// History rows whose details carry any external id.
    fn has_external_id(&self) -> Self::Condition;

    /// Job rows in `pending`, `running` or `failed`.
    fn status_active(&self) -> Self::Condition;

    /// The job row with the given internal key.
    fn job_id_eq(&self, job_pk: i64) -> Self::Condition;

    /// `completed` job rows that finished strictly before `cutoff` (epoch ms).
    fn completed_before(&self, cutoff: i64) -> Self::Condition;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Part {
    Sql(&'static str),
    Text(String),
    Int(i64),
}

/// A SQL boolean expression with its bind values, tagged with the database it
/// was written for.
pub struct SqlCondition<DB> {
    parts: Vec<Part>,
    database: PhantomData<fn() -> DB>,
}

impl<DB> SqlCondition<DB> {
    fn new() -> Self {
        Self {
            parts: Vec::new(),
            database: PhantomData,
        }
    }

    fn sql(mut self, fragment: &'static str) -> Self {
        self.parts.push(Part::Sql(fragment));
        self
    }

    fn text(mut self, value: impl Into<String>) -> Self {
        self.parts.push(Part::Text(value.into()));
        self
    }

    fn int(mut self, value: i64) -> Self {
        self.parts.push(Part::Int(value));
        self
    }

    fn status_in(mut self, statuses: &[JobStatus]) -> Self {
        self = self.sql("status IN (");
        for (i, status) in statuses.iter().enumerate() {
            if i > 0 {
                self = self.sql(", ");
            }
            self = self.text(status.as_str());
        }
        self.sql(")")
    }
}

impl<DB> fmt::Debug for SqlCondition<DB> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlCondition")
            .field("parts", &self.parts)
            .finish()
    }
}

impl SqlCondition<sqlx::Postgres> {
    pub(crate) fn push_to(&self, builder: &mut QueryBuilder<'_, sqlx::Postgres>) {
        for part in &self.parts {
            match part {
                Part::Sql(fragment) => builder.push(fragment),
                Part::Text(value) => builder.push_bind(value.clone()),
                Part::Int(value) => builder.push_bind(*value),
            };
        }
    }
}

impl SqlCondition<sqlx::Sqlite> {
    pub(crate) fn push_to(&self, builder: &mut QueryBuilder<'_, sqlx::Sqlite>) {
        for part in &self.parts {
            match part {
                Part::Sql(fragment) => builder.push(fragment),
                Part::Text(value) => builder.push_bind(value.clone()),
                Part::Int(value) => builder.push_bind(*value),
            };
        }
    }
}

/// Conditions for the PostgreSQL engine. History details are JSONB.
#[derive(Clone, Copy, Debug, Default)]
pub struct PgQueryAdapter;

impl QueryAdapter for PgQueryAdapter {
    type Condition = SqlCondition<sqlx::Postgres>;

    fn external_id_eq(&self, external_id: &str) -> Self::Condition {
        SqlCondition::new()
            .sql("details ->> 'externalId' = ")
            .text(external_id)
    }

    fn has_external_id(&self) -> Self::Condition {
        SqlCondition::new().sql("details ->> 'externalId' IS NOT NULL")
    }

    fn status_active(&self) -> Self::Condition {
        SqlCondition::new().status_in(&JobStatus::ACTIVE)
    }

    fn job_id_eq(&self, job_pk: i64) -> Self::Condition {
        SqlCondition::new().sql("id = ").int(job_pk)
    }

    fn completed_before(&self, cutoff: i64) -> Self::Condition {
        SqlCondition::new()
            .sql("status = ")
            .text(JobStatus::Completed.as_str())
            .sql(" AND completed_at < ")
            .int(cutoff)
    }
}

/// Conditions for the SQLite engine. History details are JSON text.
#[derive(Clone, Copy, Debug, Default)]
pub struct SqliteQueryAdapter;

impl QueryAdapter for SqliteQueryAdapter {
    type Condition = SqlCondition<sqlx::Sqlite>;

    fn external_id_eq(&self, external_id: &str) -> Self::Condition {
        SqlCondition::new()
            .sql("json_extract(details, '$.externalId') = ")
            .text(external_id)
    }

    fn has_external_id(&self) -> Self::Condition {
        SqlCondition::new().sql("json_extract(details, '$.externalId') IS NOT NULL")
    }

    fn status_active(&self) -> Self::Condition {
        SqlCondition::new().status_in(&JobStatus::ACTIVE)
    }

    fn job_id_eq(&self, job_pk: i64) -> Self::Condition {
        SqlCondition::new().sql("id = ").int(job_pk)
    }

    fn completed_before(&self, cutoff: i64) -> Self::Condition {
        SqlCondition::new()
            .sql("status = ")
            .text(JobStatus::Completed.as_str())
            .sql(" AND completed_at < ")
            .int(cutoff)
    }
}
