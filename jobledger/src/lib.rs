//! jobledger: a persistent job repository.
//!
//! Jobs are recorded under a caller-supplied external id, every status
//! transition is appended to an audit trail, and completed jobs are reclaimed
//! by a retention sweep. The same [`JobRepository`] contract is served by a
//! durable PostgreSQL engine and a lightweight SQLite engine; [`open`] picks
//! one from [`Settings`] at startup.

mod config;
mod engine;
mod error;
mod model;
mod query;
mod repository;
mod sweeper;

pub use config::{RetentionSettings, Settings};
pub use engine::{
    open, EngineKind, HistoryOrder, HistoryRow, JobPatch, JobRow, NewHistory, NewJob, Postgres,
    Sqlite, Storage,
};
pub use error::{Error, Result};
pub use model::{
    now_millis, HistoryDetails, HistoryEntry, JobError, JobPayload, JobPriority, JobResult,
    JobStatus, JobType, NormalizedJob, StatusUpdate,
};
pub use query::{PgQueryAdapter, QueryAdapter, SqlCondition, SqliteQueryAdapter};
pub use repository::{JobRepository, Repository};
pub use sweeper::Sweeper;

/// A prelude for code that records and reports jobs.
pub mod prelude {
    pub use crate::{
        JobPayload, JobPriority, JobRepository, JobResult, JobStatus, JobType, NormalizedJob,
        StatusUpdate,
    };
}
