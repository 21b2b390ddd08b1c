//! Job catalog - the external record of every transfer job.
//!
//! The catalog owns job state; the orchestrator only mirrors progress into
//! it. All calls take an explicit bearer token so callers decide whether
//! they act as the service identity or on behalf of a user.

mod http;
mod types;

pub use http::HttpCatalogClient;
pub use types::*;

use async_trait::async_trait;

/// Trait for job catalog backends.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Log in with username/password and return a session token.
    async fn authenticate(&self, username: &str, password: &str)
        -> Result<AuthSession, CatalogError>;

    /// Create a transfer job record for one dataset.
    async fn create_job(
        &self,
        token: &str,
        owner_group: &str,
        dataset_pid: &str,
    ) -> Result<CatalogJob, CatalogError>;

    /// Write a status update and result object for a job.
    ///
    /// Fails with `Forbidden` or `InvalidJobId` when the catalog refuses the
    /// job itself.
    async fn update_job(
        &self,
        token: &str,
        job_id: &str,
        code: JobStatusCode,
        result: &JobResultObject,
    ) -> Result<(), CatalogError>;

    /// List jobs matching a filter.
    async fn list_jobs(&self, token: &str, filter: &JobFilter)
        -> Result<Vec<CatalogJob>, CatalogError>;

    /// Fetch a single job record.
    async fn get_job(&self, token: &str, job_id: &str) -> Result<CatalogJob, CatalogError>;

    /// Delete a job record.
    async fn delete_job(&self, token: &str, job_id: &str) -> Result<(), CatalogError>;

    /// Flag a dataset as ready for archival.
    async fn mark_dataset_ready(&self, token: &str, dataset_pid: &str)
        -> Result<(), CatalogError>;

    /// Fetch a dataset visible to the token's owner.
    async fn get_dataset(&self, token: &str, pid: &str) -> Result<Dataset, CatalogError>;

    /// Resolve a caller's API key into their identity and groups.
    async fn user_identity(&self, api_key: &str) -> Result<CallerIdentity, CatalogError>;
}

/// Create a transfer job and immediately record it as started with the
/// given transfer reference. Returns the new job id.
pub async fn create_transfer_job(
    catalog: &dyn Catalog,
    token: &str,
    owner_group: &str,
    dataset_pid: &str,
    transfer_reference: &str,
) -> Result<String, CatalogError> {
    let job = catalog.create_job(token, owner_group, dataset_pid).await?;

    let result = JobResultObject {
        transfer_reference: transfer_reference.to_string(),
        ..Default::default()
    };
    catalog
        .update_job(token, &job.id, JobStatusCode::Started, &result)
        .await?;

    Ok(job.id)
}
