//! Types for the job catalog (the source of truth for transfer jobs).

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// Job type under which transfer jobs are recorded in the catalog.
pub const TRANSFER_JOB_TYPE: &str = "globus_transfer_job";

/// Errors that can occur when talking to the catalog.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid job id: {0}")]
    InvalidJobId(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("API error (HTTP {status}): {body}")]
    ApiError { status: u16, body: String },
}

impl CatalogError {
    /// The catalog refused the job itself; further writes for it are pointless.
    pub fn rejects_job(&self) -> bool {
        matches!(self, CatalogError::Forbidden(_) | CatalogError::InvalidJobId(_))
    }
}

/// Lifecycle status of a transfer job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Transferring,
    Finished,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Transferring => "transferring",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Transferring)
    }

    /// Transitions only move toward a terminal state.
    pub fn can_transition_to(&self, _next: JobStatus) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status code/message pairs written to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatusCode {
    Started,
    Transferring,
    Finished,
    Cancelled,
    CancelFailed,
    NotArchivable,
    PollFailed,
}

impl JobStatusCode {
    pub fn code(&self) -> &'static str {
        match self {
            JobStatusCode::Started => "001",
            JobStatusCode::Transferring => "002",
            JobStatusCode::Finished => "003",
            JobStatusCode::Cancelled => "004",
            JobStatusCode::CancelFailed => "996",
            JobStatusCode::NotArchivable => "997",
            JobStatusCode::PollFailed => "998",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            JobStatusCode::Started => "started",
            JobStatusCode::Transferring => "transferring",
            JobStatusCode::Finished => "finished",
            JobStatusCode::Cancelled => "cancelled",
            JobStatusCode::CancelFailed => "cancelling failed",
            JobStatusCode::NotArchivable => "completed but can't mark dataset as archivable",
            JobStatusCode::PollFailed => {
                "an error has occurred during task polling, this job is not updated anymore"
            }
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            JobStatusCode::Started | JobStatusCode::Transferring => JobStatus::Transferring,
            JobStatusCode::Finished | JobStatusCode::NotArchivable => JobStatus::Finished,
            JobStatusCode::Cancelled => JobStatus::Cancelled,
            JobStatusCode::CancelFailed | JobStatusCode::PollFailed => JobStatus::Failed,
        }
    }
}

/// Structured result attached to every job update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobResultObject {
    /// Transfer-service reference of the running transfer.
    #[serde(rename = "globusTaskId")]
    pub transfer_reference: String,
    pub bytes_transferred: u64,
    pub files_transferred: u64,
    pub files_total: u64,
    pub completed: bool,
    pub status: JobStatus,
    /// Error text, empty when none.
    pub error: String,
}

/// One dataset referenced by a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetElement {
    pub pid: String,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobParams {
    pub dataset_list: Vec<DatasetElement>,
}

/// A job record as stored in the catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CatalogJob {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub owner_group: String,
    pub status_code: String,
    pub status_message: String,
    pub job_params: JobParams,
    pub job_result_object: JobResultObject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl CatalogJob {
    /// Transfer reference, if the transfer was ever started.
    pub fn transfer_reference(&self) -> Option<&str> {
        let reference = self.job_result_object.transfer_reference.as_str();
        (!reference.is_empty()).then_some(reference)
    }

    pub fn dataset_pids(&self) -> Vec<&str> {
        self.job_params
            .dataset_list
            .iter()
            .map(|d| d.pid.as_str())
            .collect()
    }
}

/// Filter for listing catalog jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub job_type: Option<String>,
    pub completed: Option<bool>,
    pub error: Option<String>,
}

impl JobFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = Some(job_type.into());
        self
    }

    pub fn with_completed(mut self, completed: bool) -> Self {
        self.completed = Some(completed);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Transfer jobs that are neither completed nor errored.
    pub fn unfinished_transfers() -> Self {
        Self::new()
            .with_type(TRANSFER_JOB_TYPE)
            .with_completed(false)
            .with_error("")
    }

    /// Whether a job satisfies this filter.
    pub fn matches(&self, job: &CatalogJob) -> bool {
        self.job_type.as_ref().is_none_or(|t| &job.job_type == t)
            && self
                .completed
                .is_none_or(|c| job.job_result_object.completed == c)
            && self
                .error
                .as_ref()
                .is_none_or(|e| &job.job_result_object.error == e)
    }

    /// Catalog `where` clause for this filter.
    pub fn to_query(&self) -> serde_json::Value {
        let mut clause = serde_json::Map::new();
        if let Some(job_type) = &self.job_type {
            clause.insert("type".to_string(), json!(job_type));
        }
        if let Some(completed) = self.completed {
            clause.insert("jobResultObject.completed".to_string(), json!(completed));
        }
        if let Some(error) = &self.error {
            clause.insert("jobResultObject.error".to_string(), json!(error));
        }
        json!({ "where": clause })
    }
}

/// The subset of a dataset record the orchestrator needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Dataset {
    pub pid: String,
    pub owner_group: String,
    pub source_folder: String,
}

/// Result of a service-identity login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_in_secs: i64,
}

impl AuthSession {
    /// Absolute expiry, or `None` when the lifetime the catalog sent does
    /// not fit in a timestamp.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        TimeDelta::try_seconds(self.expires_in_secs)
            .and_then(|lifetime| self.created_at.checked_add_signed(lifetime))
    }
}

/// An authenticated caller, resolved from their catalog API key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallerIdentity {
    pub username: String,
    pub access_groups: Vec<String>,
    /// The caller's own catalog token, used for reads on their behalf.
    #[serde(skip_serializing)]
    pub token: String,
}

impl CallerIdentity {
    pub fn has_group(&self, group: &str) -> bool {
        self.access_groups.iter().any(|g| g == group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_map_to_status() {
        assert_eq!(JobStatusCode::Started.code(), "001");
        assert_eq!(JobStatusCode::Cancelled.code(), "004");
        assert_eq!(JobStatusCode::NotArchivable.status(), JobStatus::Finished);
        assert_eq!(JobStatusCode::CancelFailed.status(), JobStatus::Failed);
        assert_eq!(JobStatusCode::PollFailed.status(), JobStatus::Failed);
        assert_eq!(JobStatusCode::CancelFailed.message(), "cancelling failed");
    }

    #[test]
    fn test_terminal_states_are_never_left() {
        for terminal in [JobStatus::Finished, JobStatus::Failed, JobStatus::Cancelled] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(JobStatus::Transferring));
            assert!(!terminal.can_transition_to(JobStatus::Finished));
        }
        assert!(JobStatus::Transferring.can_transition_to(JobStatus::Transferring));
        assert!(JobStatus::Transferring.can_transition_to(JobStatus::Cancelled));
    }

    #[test]
    fn test_result_object_wire_names() {
        let result = JobResultObject {
            transfer_reference: "task-1".to_string(),
            bytes_transferred: 10,
            files_total: 3,
            status: JobStatus::Failed,
            ..Default::default()
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["globusTaskId"], "task-1");
        assert_eq!(value["bytesTransferred"], 10);
        assert_eq!(value["filesTotal"], 3);
        assert_eq!(value["status"], "failed");
        assert_eq!(value["completed"], false);
        assert_eq!(value["error"], "");
    }

    #[test]
    fn test_catalog_job_deserialize_partial() {
        let job: CatalogJob = serde_json::from_value(json!({
            "id": "job-1",
            "type": TRANSFER_JOB_TYPE,
            "ownerGroup": "group",
            "jobParams": { "datasetList": [{ "pid": "pid-1", "files": [] }] },
            "jobResultObject": { "globusTaskId": "task-1" },
            "createdAt": "2024-05-01T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(job.transfer_reference(), Some("task-1"));
        assert_eq!(job.dataset_pids(), vec!["pid-1"]);
        assert!(job.created_at.is_some());
        assert!(!job.job_result_object.completed);
    }

    #[test]
    fn test_missing_transfer_reference() {
        let job = CatalogJob::default();
        assert_eq!(job.transfer_reference(), None);
    }

    #[test]
    fn test_unfinished_filter_query() {
        let query = JobFilter::unfinished_transfers().to_query();
        assert_eq!(
            query,
            json!({
                "where": {
                    "type": TRANSFER_JOB_TYPE,
                    "jobResultObject.completed": false,
                    "jobResultObject.error": ""
                }
            })
        );
    }

    #[test]
    fn test_filter_matches() {
        let filter = JobFilter::unfinished_transfers();
        let mut job = CatalogJob {
            job_type: TRANSFER_JOB_TYPE.to_string(),
            ..Default::default()
        };
        assert!(filter.matches(&job));
        job.job_result_object.error = "boom".to_string();
        assert!(!filter.matches(&job));
    }

    #[test]
    fn test_auth_session_expiry() {
        let created_at = Utc::now();
        let session = AuthSession {
            token: "t".to_string(),
            created_at,
            expires_in_secs: 60,
        };
        assert_eq!(
            session.expires_at(),
            Some(created_at + TimeDelta::seconds(60))
        );
    }

    #[test]
    fn test_auth_session_expiry_out_of_range() {
        let session = AuthSession {
            token: "t".to_string(),
            created_at: Utc::now(),
            expires_in_secs: i64::MAX,
        };
        assert_eq!(session.expires_at(), None);
    }

    #[test]
    fn test_rejects_job() {
        assert!(CatalogError::Forbidden("x".into()).rejects_job());
        assert!(CatalogError::InvalidJobId("x".into()).rejects_job());
        assert!(!CatalogError::Timeout.rejects_job());
    }
}
