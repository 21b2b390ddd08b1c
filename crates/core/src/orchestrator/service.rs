//! Transfer orchestrator implementation.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::catalog::{
    create_transfer_job, CallerIdentity, Catalog, CatalogError, Dataset, TRANSFER_JOB_TYPE,
};
use crate::credentials::CredentialCache;
use crate::jobs::{CancellationRegistry, JobDescriptor, JobPool};
use crate::template::DestinationParams;
use crate::transfer::{StartTransferRequest, TransferService};

use super::config::OrchestratorConfig;
use super::types::{
    FacilityRole, JobControlError, RequestError, TransferRequestBody, TransferRequestParams,
};

/// Turns validated client requests into running, tracked transfer jobs.
pub struct TransferOrchestrator {
    config: OrchestratorConfig,
    catalog: Arc<dyn Catalog>,
    transfer: Arc<dyn TransferService>,
    credentials: Arc<CredentialCache>,
    registry: Arc<CancellationRegistry>,
    pool: JobPool,
    /// Serialises the capacity check with the submission on bounded pools.
    admission: Mutex<()>,
}

impl TransferOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        catalog: Arc<dyn Catalog>,
        transfer: Arc<dyn TransferService>,
        credentials: Arc<CredentialCache>,
        registry: Arc<CancellationRegistry>,
        pool: JobPool,
    ) -> Self {
        Self {
            config,
            catalog,
            transfer,
            credentials,
            registry,
            pool,
            admission: Mutex::new(()),
        }
    }

    pub fn pool(&self) -> &JobPool {
        &self.pool
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Validate a request, start its transfer, record the catalog job and
    /// hand it to the pool. Returns the catalog job id.
    pub async fn request_transfer(
        &self,
        caller: &CallerIdentity,
        params: TransferRequestParams,
        body: Option<TransferRequestBody>,
    ) -> Result<String, RequestError> {
        let source_collection = self.collection(FacilityRole::Source, &params.source_facility)?;
        let destination_collection =
            self.collection(FacilityRole::Destination, &params.dest_facility)?;

        let dataset = self.dataset(caller, &params.scicat_pid).await?;
        self.authorize(caller, &params, &dataset)?;

        let _admission = if self.pool.is_bounded() {
            let guard = self.admission.lock().await;
            if !self.pool.can_submit() {
                warn!(pid = %params.scicat_pid, "Rejecting transfer request, job queue is full");
                return Err(RequestError::QueueFull);
            }
            Some(guard)
        } else {
            None
        };

        let body = body.ok_or(RequestError::MissingBody)?;
        let destination_path = self.config.destination_path.render(&DestinationParams::new(
            &params.scicat_pid,
            &dataset.source_folder,
            &caller.username,
        ))?;

        let request = StartTransferRequest {
            source_collection: source_collection.to_string(),
            source_path: dataset.source_folder.clone(),
            destination_collection: destination_collection.to_string(),
            destination_path,
            files: body.file_list,
        };
        let reference = self.transfer.start_transfer(&request).await?;
        info!(
            reference = %reference,
            pid = %params.scicat_pid,
            source = %request.source_path,
            destination = %request.destination_path,
            "Transfer started"
        );

        let token = match self.credentials.get_token().await {
            Ok(token) => token,
            Err(e) => {
                self.abandon_transfer(&reference).await;
                return Err(RequestError::CredentialFailed(e));
            }
        };

        let job_id = match create_transfer_job(
            self.catalog.as_ref(),
            &token,
            &dataset.owner_group,
            &params.scicat_pid,
            &reference,
        )
        .await
        {
            Ok(job_id) => job_id,
            Err(e) => {
                self.abandon_transfer(&reference).await;
                return Err(RequestError::JobCreation(e));
            }
        };

        self.pool
            .submit(JobDescriptor::new(&job_id, &reference, &params.scicat_pid))?;

        info!(
            job_id = %job_id,
            reference = %reference,
            user = %caller.username,
            "Transfer job created"
        );
        Ok(job_id)
    }

    /// Signal cancellation of an active job owned by one of the caller's
    /// groups.
    pub async fn cancel_job(
        &self,
        caller: &CallerIdentity,
        job_id: &str,
    ) -> Result<(), JobControlError> {
        self.authorize_job(caller, job_id).await?;
        self.registry.cancel(job_id)?;
        info!(job_id = %job_id, user = %caller.username, "Job cancellation requested");
        Ok(())
    }

    /// Cancel a job if it is active, then delete its catalog record.
    /// Returns whether an active job was signalled.
    pub async fn delete_job(
        &self,
        caller: &CallerIdentity,
        job_id: &str,
    ) -> Result<bool, JobControlError> {
        self.authorize_job(caller, job_id).await?;
        let signalled = self.registry.delete(job_id).await?;
        info!(job_id = %job_id, user = %caller.username, signalled, "Job deleted");
        Ok(signalled)
    }

    /// Look the job up as the service user and require its owner group.
    async fn authorize_job(
        &self,
        caller: &CallerIdentity,
        job_id: &str,
    ) -> Result<(), JobControlError> {
        let token = self.credentials.get_token().await?;
        let job = self
            .catalog
            .get_job(&token, job_id)
            .await
            .map_err(|e| match e {
                CatalogError::NotFound(_) | CatalogError::InvalidJobId(_) => {
                    JobControlError::JobNotFound(job_id.to_string())
                }
                other => JobControlError::JobLookup(other),
            })?;
        if job.job_type != TRANSFER_JOB_TYPE {
            return Err(JobControlError::JobNotFound(job_id.to_string()));
        }

        if caller.has_group(&job.owner_group) {
            Ok(())
        } else {
            warn!(
                user = %caller.username,
                job_id = %job_id,
                owner_group = %job.owner_group,
                "Caller lacks the job's owner group"
            );
            Err(JobControlError::MissingGroups(vec![job.owner_group]))
        }
    }

    fn collection(&self, role: FacilityRole, facility: &str) -> Result<&str, RequestError> {
        self.config
            .collection(facility)
            .ok_or_else(|| RequestError::UnknownFacility {
                role,
                name: facility.to_string(),
            })
    }

    async fn dataset(&self, caller: &CallerIdentity, pid: &str) -> Result<Dataset, RequestError> {
        self.catalog
            .get_dataset(&caller.token, pid)
            .await
            .map_err(|e| match e {
                CatalogError::NotFound(_) | CatalogError::Forbidden(_) => {
                    RequestError::DatasetNotFound(pid.to_string())
                }
                other => RequestError::DatasetLookup(other),
            })
    }

    fn authorize(
        &self,
        caller: &CallerIdentity,
        params: &TransferRequestParams,
        dataset: &Dataset,
    ) -> Result<(), RequestError> {
        let required = [
            self.config.source_group.render(&params.source_facility),
            self.config.destination_group.render(&params.dest_facility),
            dataset.owner_group.clone(),
        ];
        let missing: Vec<String> = required
            .into_iter()
            .filter(|group| !caller.has_group(group))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            warn!(user = %caller.username, missing = ?missing, "Caller lacks access groups");
            Err(RequestError::MissingGroups(missing))
        }
    }

    /// Best-effort cancel of a transfer whose job could not be recorded.
    async fn abandon_transfer(&self, reference: &str) {
        if let Err(e) = self.transfer.cancel_transfer(reference).await {
            error!(reference = %reference, error = %e, "Failed to cancel orphaned transfer");
        } else {
            warn!(reference = %reference, "Cancelled transfer without a catalog job");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::JobStatusCode;
    use crate::jobs::{PoolConfig, RegistryError};
    use crate::template::{DestinationTemplate, GroupTemplate};
    use crate::testing::fixtures::dataset;
    use crate::testing::{worker_context, MockCatalog, MockTransferService};
    use crate::transfer::{TransferError, TransferFile, TransferStatus};
    use std::collections::BTreeMap;
    use std::time::Duration;

    struct Harness {
        catalog: Arc<MockCatalog>,
        transfer: Arc<MockTransferService>,
        orchestrator: TransferOrchestrator,
    }

    fn harness(queue_capacity: usize) -> Harness {
        let catalog = Arc::new(MockCatalog::new());
        let transfer = Arc::new(MockTransferService::new());
        catalog.add_dataset(dataset("20.500/abc", "group-a", "/data/run-1"));

        let context = worker_context(catalog.clone(), transfer.clone());
        let pool = JobPool::new(
            PoolConfig {
                max_concurrency: 2,
                queue_capacity,
                poll_interval: Duration::from_millis(5),
            },
            context.clone(),
        );
        let config = OrchestratorConfig {
            facilities: BTreeMap::from([
                ("PSI".to_string(), "collection-psi".to_string()),
                ("ETH".to_string(), "collection-eth".to_string()),
            ]),
            source_group: GroupTemplate::parse("{facility}-source").unwrap(),
            destination_group: GroupTemplate::parse("{facility}-destination").unwrap(),
            destination_path: DestinationTemplate::parse("/{username}/{pid_short}/{dataset_folder}")
                .unwrap(),
        };
        let orchestrator = TransferOrchestrator::new(
            config,
            catalog.clone(),
            transfer.clone(),
            context.credentials,
            context.registry,
            pool,
        );
        Harness {
            catalog,
            transfer,
            orchestrator,
        }
    }

    fn caller(groups: &[&str]) -> CallerIdentity {
        CallerIdentity {
            username: "alice".to_string(),
            access_groups: groups.iter().map(|g| g.to_string()).collect(),
            token: "user-token".to_string(),
        }
    }

    fn authorized() -> CallerIdentity {
        caller(&["PSI-source", "ETH-destination", "group-a"])
    }

    fn params(pid: &str, source: &str, dest: &str) -> TransferRequestParams {
        TransferRequestParams {
            scicat_pid: pid.to_string(),
            source_facility: source.to_string(),
            dest_facility: dest.to_string(),
        }
    }

    fn folder_sync() -> Option<TransferRequestBody> {
        Some(TransferRequestBody::default())
    }

    #[tokio::test]
    async fn test_request_starts_transfer_and_tracks_job() {
        let h = harness(0);
        h.transfer.hold("transfer-1");

        let job_id = h
            .orchestrator
            .request_transfer(&authorized(), params("20.500/abc", "PSI", "ETH"), folder_sync())
            .await
            .unwrap();
        assert_eq!(job_id, "job-1");

        let started = h.transfer.started_transfers();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].source_collection, "collection-psi");
        assert_eq!(started[0].source_path, "/data/run-1");
        assert_eq!(started[0].destination_collection, "collection-eth");
        assert_eq!(started[0].destination_path, "/alice/abc/run-1");
        assert_eq!(started[0].files, None);

        let job = h.catalog.job("job-1").unwrap();
        assert_eq!(job.job_type, TRANSFER_JOB_TYPE);
        assert_eq!(job.owner_group, "group-a");
        let updates = h.catalog.updates_for("job-1");
        assert_eq!(updates[0].code, JobStatusCode::Started);
        assert_eq!(updates[0].result.transfer_reference, "transfer-1");

        assert!(h.orchestrator.pool().is_tracked("job-1"));
        h.transfer.release("transfer-1", TransferStatus::succeeded(1, 1, 1));
    }

    #[tokio::test]
    async fn test_file_list_is_forwarded() {
        let h = harness(0);
        h.transfer.hold("transfer-1");
        let files = vec![
            TransferFile {
                path: "a.tif".to_string(),
                is_symlink: false,
            },
            TransferFile {
                path: "latest".to_string(),
                is_symlink: true,
            },
        ];
        let body = TransferRequestBody {
            file_list: Some(files.clone()),
        };

        h.orchestrator
            .request_transfer(&authorized(), params("20.500/abc", "PSI", "ETH"), Some(body))
            .await
            .unwrap();
        assert_eq!(h.transfer.started_transfers()[0].files, Some(files));
    }

    #[tokio::test]
    async fn test_unknown_facility_is_rejected_before_any_call() {
        let h = harness(0);
        let err = h
            .orchestrator
            .request_transfer(&authorized(), params("20.500/abc", "PSI", "CERN"), folder_sync())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RequestError::UnknownFacility {
                role: FacilityRole::Destination,
                ..
            }
        ));
        assert!(h.transfer.started_transfers().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_dataset() {
        let h = harness(0);
        let err = h
            .orchestrator
            .request_transfer(&authorized(), params("missing", "PSI", "ETH"), folder_sync())
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::DatasetNotFound(pid) if pid == "missing"));
    }

    #[tokio::test]
    async fn test_missing_groups_are_listed() {
        let h = harness(0);
        let err = h
            .orchestrator
            .request_transfer(&caller(&["PSI-source"]), params("20.500/abc", "PSI", "ETH"), folder_sync())
            .await
            .unwrap_err();
        match err {
            RequestError::MissingGroups(missing) => {
                assert_eq!(missing, vec!["ETH-destination".to_string(), "group-a".to_string()])
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(h.transfer.started_transfers().is_empty());
    }

    #[tokio::test]
    async fn test_missing_body() {
        let h = harness(0);
        let err = h
            .orchestrator
            .request_transfer(&authorized(), params("20.500/abc", "PSI", "ETH"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::MissingBody));
        assert!(h.transfer.started_transfers().is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_rejects_before_starting_transfer() {
        let h = harness(1);
        h.transfer.hold("transfer-1");
        h.orchestrator
            .request_transfer(&authorized(), params("20.500/abc", "PSI", "ETH"), folder_sync())
            .await
            .unwrap();

        let err = h
            .orchestrator
            .request_transfer(&authorized(), params("20.500/abc", "PSI", "ETH"), folder_sync())
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::QueueFull));
        assert_eq!(h.transfer.started_transfers().len(), 1);
        h.transfer.release("transfer-1", TransferStatus::succeeded(1, 1, 1));
    }

    #[tokio::test]
    async fn test_transfer_start_failure() {
        let h = harness(0);
        h.transfer
            .fail_next_start(TransferError::Rejected("endpoint offline".into()));
        let err = h
            .orchestrator
            .request_transfer(&authorized(), params("20.500/abc", "PSI", "ETH"), folder_sync())
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::TransferStart(_)));
        assert!(h.catalog.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_job_creation_failure_cancels_transfer() {
        let h = harness(0);
        h.catalog.fail_next_create(CatalogError::Timeout);
        let err = h
            .orchestrator
            .request_transfer(&authorized(), params("20.500/abc", "PSI", "ETH"), folder_sync())
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::JobCreation(_)));
        assert_eq!(h.transfer.cancel_requests(), vec!["transfer-1".to_string()]);
    }

    #[tokio::test]
    async fn test_credential_failure_cancels_transfer() {
        let h = harness(0);
        h.catalog.fail_logins(true);
        let err = h
            .orchestrator
            .request_transfer(&authorized(), params("20.500/abc", "PSI", "ETH"), folder_sync())
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::CredentialFailed(_)));
        assert_eq!(h.transfer.cancel_requests(), vec!["transfer-1".to_string()]);
        assert!(h.catalog.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_unknown_job() {
        let h = harness(0);
        assert!(matches!(
            h.orchestrator.cancel_job(&authorized(), "nope").await,
            Err(JobControlError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_finished_job_is_not_active() {
        let h = harness(0);
        h.catalog
            .insert_job(crate::testing::fixtures::transfer_job("job-old", "transfer-old", &["pid"]));
        assert!(matches!(
            h.orchestrator.cancel_job(&authorized(), "job-old").await,
            Err(JobControlError::Registry(RegistryError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_job_of_other_type_is_not_found() {
        let h = harness(0);
        let mut job = crate::testing::fixtures::transfer_job("job-archive", "", &["pid"]);
        job.job_type = "archive".to_string();
        h.catalog.insert_job(job);
        assert!(matches!(
            h.orchestrator.delete_job(&authorized(), "job-archive").await,
            Err(JobControlError::JobNotFound(_))
        ));
        assert!(h.catalog.job("job-archive").is_some());
    }

    #[tokio::test]
    async fn test_non_owner_cannot_cancel_or_delete() {
        let h = harness(0);
        h.transfer.hold("transfer-1");
        let job_id = h
            .orchestrator
            .request_transfer(&authorized(), params("20.500/abc", "PSI", "ETH"), folder_sync())
            .await
            .unwrap();
        h.transfer.wait_for_poll("transfer-1").await;

        let outsider = caller(&["PSI-source", "ETH-destination", "group-b"]);
        match h.orchestrator.cancel_job(&outsider, &job_id).await {
            Err(JobControlError::MissingGroups(missing)) => {
                assert_eq!(missing, vec!["group-a".to_string()])
            }
            other => panic!("expected missing groups, got {:?}", other),
        }
        assert!(matches!(
            h.orchestrator.delete_job(&outsider, &job_id).await,
            Err(JobControlError::MissingGroups(_))
        ));

        assert!(h.orchestrator.pool().is_tracked(&job_id));
        assert!(h.catalog.job(&job_id).is_some());
        assert!(h.catalog.deleted_jobs().is_empty());
        assert!(h.transfer.cancel_requests().is_empty());

        h.transfer
            .release("transfer-1", TransferStatus::succeeded(1, 1, 1));
        while h.orchestrator.pool().is_tracked(&job_id) {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    #[tokio::test]
    async fn test_cancel_running_job() {
        let h = harness(0);
        h.transfer.hold("transfer-1");
        let job_id = h
            .orchestrator
            .request_transfer(&authorized(), params("20.500/abc", "PSI", "ETH"), folder_sync())
            .await
            .unwrap();
        h.transfer.wait_for_poll("transfer-1").await;

        h.orchestrator.cancel_job(&authorized(), &job_id).await.unwrap();
        while h.orchestrator.pool().is_tracked(&job_id) {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(h.transfer.cancel_requests(), vec!["transfer-1".to_string()]);
        let last = h.catalog.updates_for(&job_id).pop().unwrap();
        assert_eq!(last.code, JobStatusCode::Cancelled);
    }
}
