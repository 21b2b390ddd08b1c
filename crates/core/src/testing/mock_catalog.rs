//! Mock job catalog for testing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::catalog::{
    AuthSession, CallerIdentity, Catalog, CatalogError, CatalogJob, Dataset, DatasetElement,
    JobFilter, JobParams, JobResultObject, JobStatusCode, TRANSFER_JOB_TYPE,
};

/// A recorded, accepted `update_job` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedUpdate {
    pub job_id: String,
    pub code: JobStatusCode,
    pub result: JobResultObject,
}

#[derive(Debug, Default)]
struct CatalogState {
    jobs: Vec<CatalogJob>,
    updates: Vec<RecordedUpdate>,
    deleted: Vec<String>,
    marked_ready: Vec<String>,
    datasets: HashMap<String, Dataset>,
    users: HashMap<String, CallerIdentity>,
    logins: u32,
    job_counter: u32,
    token_lifetime_secs: i64,
    login_delay: Duration,
    fail_logins: bool,
    fail_mark_ready: bool,
    rejected_jobs: Vec<String>,
    next_create_error: Option<CatalogError>,
    next_update_error: Option<CatalogError>,
    next_list_error: Option<CatalogError>,
}

/// Mock implementation of the `Catalog` trait.
///
/// Provides controllable behavior for testing:
/// - Records job creation, updates, deletions and archival marks
/// - Issues numbered service tokens (`token-1`, `token-2`, ...) with a
///   configurable lifetime
/// - Simulates failures per operation
///
/// # Example
///
/// ```rust,ignore
/// let catalog = MockCatalog::new();
/// catalog.add_dataset(Dataset { pid: "pid-1".into(), ..Default::default() });
///
/// // ... run a worker ...
///
/// let updates = catalog.updates_for("job-1");
/// assert_eq!(updates.last().unwrap().result.status, JobStatus::Finished);
/// ```
#[derive(Debug, Clone)]
pub struct MockCatalog {
    state: Arc<Mutex<CatalogState>>,
}

impl Default for MockCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCatalog {
    /// Create a new mock catalog.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(CatalogState {
                token_lifetime_secs: 3600,
                ..Default::default()
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, CatalogState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pre-populate a job (for listing and recovery tests).
    pub fn insert_job(&self, job: CatalogJob) {
        self.state().jobs.push(job);
    }

    pub fn add_dataset(&self, dataset: Dataset) {
        self.state().datasets.insert(dataset.pid.clone(), dataset);
    }

    /// Register a caller API key.
    pub fn add_user(&self, api_key: &str, username: &str, access_groups: &[&str]) {
        self.state().users.insert(
            api_key.to_string(),
            CallerIdentity {
                username: username.to_string(),
                access_groups: access_groups.iter().map(|g| g.to_string()).collect(),
                token: api_key.to_string(),
            },
        );
    }

    pub fn job(&self, job_id: &str) -> Option<CatalogJob> {
        self.state().jobs.iter().find(|j| j.id == job_id).cloned()
    }

    pub fn jobs(&self) -> Vec<CatalogJob> {
        self.state().jobs.clone()
    }

    /// All accepted updates, in call order.
    pub fn updates(&self) -> Vec<RecordedUpdate> {
        self.state().updates.clone()
    }

    pub fn updates_for(&self, job_id: &str) -> Vec<RecordedUpdate> {
        self.state()
            .updates
            .iter()
            .filter(|u| u.job_id == job_id)
            .cloned()
            .collect()
    }

    pub fn deleted_jobs(&self) -> Vec<String> {
        self.state().deleted.clone()
    }

    /// Datasets marked ready for archival, in call order.
    pub fn marked_ready(&self) -> Vec<String> {
        self.state().marked_ready.clone()
    }

    /// Number of successful service logins.
    pub fn login_count(&self) -> u32 {
        self.state().logins
    }

    pub fn set_token_lifetime(&self, secs: i64) {
        self.state().token_lifetime_secs = secs;
    }

    pub fn set_login_delay(&self, delay: Duration) {
        self.state().login_delay = delay;
    }

    pub fn fail_logins(&self, fail: bool) {
        self.state().fail_logins = fail;
    }

    pub fn fail_mark_ready(&self, fail: bool) {
        self.state().fail_mark_ready = fail;
    }

    /// Answer every update of this job with `Forbidden`.
    pub fn reject_updates_for(&self, job_id: &str) {
        self.state().rejected_jobs.push(job_id.to_string());
    }

    pub fn fail_next_create(&self, error: CatalogError) {
        self.state().next_create_error = Some(error);
    }

    pub fn fail_next_update(&self, error: CatalogError) {
        self.state().next_update_error = Some(error);
    }

    pub fn fail_next_list(&self, error: CatalogError) {
        self.state().next_list_error = Some(error);
    }
}

#[async_trait]
impl Catalog for MockCatalog {
    async fn authenticate(
        &self,
        username: &str,
        _password: &str,
    ) -> Result<AuthSession, CatalogError> {
        let delay = self.state().login_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if state.fail_logins {
            return Err(CatalogError::AuthenticationFailed(format!(
                "login rejected for '{}'",
                username
            )));
        }
        state.logins += 1;
        Ok(AuthSession {
            token: format!("token-{}", state.logins),
            created_at: Utc::now(),
            expires_in_secs: state.token_lifetime_secs,
        })
    }

    async fn create_job(
        &self,
        _token: &str,
        owner_group: &str,
        dataset_pid: &str,
    ) -> Result<CatalogJob, CatalogError> {
        let mut state = self.state();
        if let Some(error) = state.next_create_error.take() {
            return Err(error);
        }

        state.job_counter += 1;
        let now = Utc::now();
        let job = CatalogJob {
            id: format!("job-{}", state.job_counter),
            job_type: TRANSFER_JOB_TYPE.to_string(),
            owner_group: owner_group.to_string(),
            job_params: JobParams {
                dataset_list: vec![DatasetElement {
                    pid: dataset_pid.to_string(),
                    files: vec![],
                }],
            },
            created_at: Some(now),
            updated_at: Some(now),
            ..Default::default()
        };
        state.jobs.push(job.clone());
        Ok(job)
    }

    async fn update_job(
        &self,
        _token: &str,
        job_id: &str,
        code: JobStatusCode,
        result: &JobResultObject,
    ) -> Result<(), CatalogError> {
        let mut state = self.state();
        if state.rejected_jobs.iter().any(|id| id == job_id) {
            return Err(CatalogError::Forbidden(format!("cannot update job '{}'", job_id)));
        }
        if let Some(error) = state.next_update_error.take() {
            return Err(error);
        }

        if let Some(job) = state.jobs.iter_mut().find(|j| j.id == job_id) {
            job.status_code = code.code().to_string();
            job.status_message = code.message().to_string();
            job.job_result_object = result.clone();
            job.updated_at = Some(Utc::now());
        }
        state.updates.push(RecordedUpdate {
            job_id: job_id.to_string(),
            code,
            result: result.clone(),
        });
        Ok(())
    }

    async fn list_jobs(
        &self,
        _token: &str,
        filter: &JobFilter,
    ) -> Result<Vec<CatalogJob>, CatalogError> {
        let mut state = self.state();
        if let Some(error) = state.next_list_error.take() {
            return Err(error);
        }
        Ok(state
            .jobs
            .iter()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect())
    }

    async fn get_job(&self, _token: &str, job_id: &str) -> Result<CatalogJob, CatalogError> {
        self.state()
            .jobs
            .iter()
            .find(|j| j.id == job_id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(job_id.to_string()))
    }

    async fn delete_job(&self, _token: &str, job_id: &str) -> Result<(), CatalogError> {
        let mut state = self.state();
        state.jobs.retain(|j| j.id != job_id);
        state.deleted.push(job_id.to_string());
        Ok(())
    }

    async fn mark_dataset_ready(
        &self,
        _token: &str,
        dataset_pid: &str,
    ) -> Result<(), CatalogError> {
        let mut state = self.state();
        if state.fail_mark_ready {
            return Err(CatalogError::Forbidden(format!(
                "cannot update dataset '{}'",
                dataset_pid
            )));
        }
        state.marked_ready.push(dataset_pid.to_string());
        Ok(())
    }

    async fn get_dataset(&self, _token: &str, pid: &str) -> Result<Dataset, CatalogError> {
        self.state()
            .datasets
            .get(pid)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(format!("dataset '{}'", pid)))
    }

    async fn user_identity(&self, api_key: &str) -> Result<CallerIdentity, CatalogError> {
        self.state()
            .users
            .get(api_key)
            .cloned()
            .ok_or_else(|| CatalogError::AuthenticationFailed("access token rejected".to_string()))
    }
}
