use buildstructor::buildstructor;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Current wall-clock time as epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Failed,
    Completed,
}

impl JobStatus {
    /// Statuses a job can be resumed from after a restart.
    pub const ACTIVE: [JobStatus; 3] = [JobStatus::Pending, JobStatus::Running, JobStatus::Failed];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Failed => "failed",
            JobStatus::Completed => "completed",
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, JobStatus::Completed)
    }

    /// Whether a status update in this state may record `last_error`.
    pub(crate) fn is_settled(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "failed" => Ok(JobStatus::Failed),
            "completed" => Ok(JobStatus::Completed),
            other => Err(Error::UnknownStatus(other.to_string())),
        }
    }
}

/// Job priority. Ordered `Low < Medium < High`.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low = 0,
    #[default]
    Medium = 1,
    High = 2,
}

impl JobPriority {
    pub fn ordinal(&self) -> i32 {
        *self as i32
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobPriority::Low => "low",
            JobPriority::Medium => "medium",
            JobPriority::High => "high",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(JobPriority::Low),
            "medium" => Some(JobPriority::Medium),
            "high" => Some(JobPriority::High),
            _ => None,
        }
    }
}

/// The kind of work a job performs.
///
/// Kinds this crate does not know about are kept verbatim so that rows written
/// by a newer producer still load.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobType {
    ToolExecution,
    Other(String),
}

impl JobType {
    pub fn as_str(&self) -> &str {
        match self {
            JobType::ToolExecution => "tool-execution",
            JobType::Other(kind) => kind,
        }
    }
}

impl From<String> for JobType {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "tool-execution" => JobType::ToolExecution,
            _ => JobType::Other(kind),
        }
    }
}

impl From<&str> for JobType {
    fn from(kind: &str) -> Self {
        kind.to_string().into()
    }
}

impl From<JobType> for String {
    fn from(kind: JobType) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-owned job data, persisted verbatim.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobPayload {
    pub data: JsonValue,
    /// Execution timeout in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    pub dependencies: Vec<String>,
    pub tags: Vec<String>,
}

impl JobPayload {
    /// Decode a stored payload field by field. A field of the wrong type is
    /// defaulted without losing the others.
    pub fn from_value(value: &JsonValue) -> Self {
        let empty = Map::new();
        let fields = value.as_object().unwrap_or(&empty);
        let field = |key: &str| fields.get(key).filter(|v| !v.is_null());

        Self {
            data: fields.get("data").cloned().unwrap_or_default(),
            timeout: field("timeout").and_then(JsonValue::as_u64),
            max_retries: field("maxRetries")
                .and_then(JsonValue::as_u64)
                .and_then(|n| u32::try_from(n).ok()),
            dependencies: field("dependencies")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default(),
            tags: field("tags")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub name: String,
    pub message: String,
}

/// Outcome of a job, present once it reached a terminal state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

impl JobResult {
    pub fn success() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failure(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(JobError {
                name: name.into(),
                message: message.into(),
            }),
        }
    }

    pub(crate) fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }
}

/// Metadata carried by a history row.
///
/// Insert rows carry the identifying fields, status update rows carry the
/// external id and the result. Reading is lenient: fields that are missing or
/// have the wrong shape come back as `None`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<JobPriority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
}

impl HistoryDetails {
    pub(crate) fn for_insert(job: &NormalizedJob) -> Self {
        Self {
            external_id: Some(job.id.clone()),
            name: Some(job.name.clone()),
            priority: Some(job.priority),
            tool: job.tool.clone(),
            endpoint: job.endpoint.clone(),
            result: None,
        }
    }

    pub(crate) fn for_update(external_id: &str, result: Option<JobResult>) -> Self {
        Self {
            external_id: Some(external_id.to_string()),
            result,
            ..Default::default()
        }
    }

    pub(crate) fn to_value(&self) -> Result<JsonValue, Error> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: &JsonValue) -> Self {
        let empty = Map::new();
        let fields = value.as_object().unwrap_or(&empty);
        let text = |key: &str| fields.get(key).and_then(JsonValue::as_str).map(String::from);

        Self {
            external_id: text("externalId"),
            name: text("name"),
            priority: fields
                .get("priority")
                .and_then(JsonValue::as_str)
                .and_then(JobPriority::parse),
            tool: text("tool"),
            endpoint: text("endpoint"),
            result: fields
                .get("result")
                .and_then(|r| serde_json::from_value(r.clone()).ok()),
        }
    }
}

/// One entry of a job's audit trail.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub status: JobStatus,
    pub details: HistoryDetails,
    pub created_at: i64,
}

/// The canonical representation of a job.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedJob {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub name: String,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub created_at: i64,
    pub updated_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub payload: JobPayload,
    pub retry_count: i32,
    pub result: Option<JobResult>,
    pub tool: Option<String>,
    pub endpoint: Option<String>,
    /// Not persisted from here; see `JobRepository::history`.
    pub execution_history: Vec<HistoryEntry>,
}

#[buildstructor]
impl NormalizedJob {
    #[builder]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        job_type: JobType,
        name: String,
        priority: Option<JobPriority>,
        status: Option<JobStatus>,
        created_at: Option<i64>,
        payload: Option<JobPayload>,
        retry_count: Option<i32>,
        tool: Option<String>,
        endpoint: Option<String>,
    ) -> Self {
        let created_at = created_at.unwrap_or_else(now_millis);

        Self {
            id,
            job_type,
            name,
            priority: priority.unwrap_or_default(),
            status: status.unwrap_or(JobStatus::Pending),
            created_at,
            updated_at: created_at,
            started_at: None,
            completed_at: None,
            payload: payload.unwrap_or_default(),
            retry_count: retry_count.unwrap_or(0),
            result: None,
            tool,
            endpoint,
            execution_history: Vec::new(),
        }
    }
}

/// A status transition reported by an executor.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusUpdate {
    pub status: JobStatus,
    pub updated_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub result: Option<JobResult>,
}

impl StatusUpdate {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            updated_at: now_millis(),
            started_at: None,
            completed_at: None,
            result: None,
        }
    }

    pub fn updated_at(mut self, at: i64) -> Self {
        self.updated_at = at;
        self
    }

    pub fn started_at(mut self, at: i64) -> Self {
        self.started_at = Some(at);
        self
    }

    pub fn completed_at(mut self, at: i64) -> Self {
        self.completed_at = Some(at);
        self
    }

    pub fn result(mut self, result: JobResult) -> Self {
        self.result = Some(result);
        self
    }
}
