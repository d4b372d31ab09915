//! Storage engines and engine selection.
//!
//! jobledger ships with two engines:
//!
//! Postgres — the durable engine for production deployments.
//! Sqlite — the lightweight default for development and single-node use, backed
//! by a local file or an in-memory database.

mod postgres;
mod sqlite;
pub(crate) mod storage;

pub use postgres::Postgres;
pub use sqlite::Sqlite;
pub use storage::{HistoryOrder, HistoryRow, JobPatch, JobRow, NewHistory, NewJob, Storage};

use crate::{Error, JobRepository, Result, Settings};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum EngineKind {
    Postgres,
    #[default]
    Sqlite,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Postgres => "postgres",
            EngineKind::Sqlite => "sqlite",
        }
    }

    /// Resolve the configured engine name. Unset means the default.
    pub fn from_setting(name: Option<&str>) -> Self {
        name.map(EngineKind::from).unwrap_or_default()
    }
}

/// Unrecognised names fall back to the default engine rather than failing.
impl From<&str> for EngineKind {
    fn from(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => EngineKind::Postgres,
            "sqlite" | "sqlite3" | "memory" => EngineKind::Sqlite,
            "" => EngineKind::default(),
            other => {
                warn!(engine = other, "unknown storage engine, falling back to sqlite");
                EngineKind::default()
            }
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the job repository selected by `settings`.
///
/// Selecting Postgres without a `database_url`, or with an unreachable
/// database, is an error. Any other engine name opens SQLite.
pub async fn open(settings: &Settings) -> Result<Arc<dyn JobRepository>> {
    let kind = EngineKind::from_setting(settings.engine.as_deref());
    info!(engine = %kind, "opening job repository");

    match kind {
        EngineKind::Postgres => {
            let url = settings
                .database_url
                .as_deref()
                .ok_or(Error::MissingSetting {
                    engine: "postgres",
                    setting: "database_url",
                })?;
            let storage = Postgres::connect(url, settings.max_connections).await?;
            if settings.run_migrations {
                storage.migrate().await?;
            }
            Ok(Arc::new(storage.into_repository()))
        }
        EngineKind::Sqlite => {
            let storage = Sqlite::connect(&settings.sqlite_url, settings.max_connections).await?;
            if settings.run_migrations {
                storage.migrate().await?;
            }
            Ok(Arc::new(storage.into_repository()))
        }
    }
}
