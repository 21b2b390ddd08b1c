//! Testing utilities and mock implementations.
//!
//! Mock implementations of the catalog and transfer-service traits let the
//! job lifecycle run end to end without either service.
//!
//! # Example
//!
//! ```rust,ignore
//! use ferry_core::testing::{worker_context, MockCatalog, MockTransferService};
//!
//! let catalog = Arc::new(MockCatalog::new());
//! let transfer = Arc::new(MockTransferService::new());
//! transfer.script_statuses("task-1", vec![Ok(TransferStatus::succeeded(10, 1, 1))]);
//!
//! let pool = JobPool::new(PoolConfig::default(), worker_context(catalog, transfer));
//! ```

use std::sync::Arc;

use crate::credentials::CredentialCache;
use crate::jobs::{CancellationRegistry, WorkerContext};

mod mock_catalog;
mod mock_transfer;

pub use mock_catalog::{MockCatalog, RecordedUpdate};
pub use mock_transfer::MockTransferService;

/// Wire mocks into a worker context with a fresh credential cache and
/// cancellation registry.
pub fn worker_context(
    catalog: Arc<MockCatalog>,
    transfer: Arc<MockTransferService>,
) -> WorkerContext {
    let credentials = Arc::new(CredentialCache::new(catalog.clone(), "service", "secret"));
    let registry = Arc::new(CancellationRegistry::new(catalog.clone(), credentials.clone()));
    WorkerContext {
        catalog,
        transfer,
        credentials,
        registry,
    }
}

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::catalog::{
        CatalogJob, Dataset, DatasetElement, JobParams, JobResultObject, TRANSFER_JOB_TYPE,
    };

    /// An unfinished transfer job as a previous process would have left it.
    pub fn transfer_job(id: &str, reference: &str, datasets: &[&str]) -> CatalogJob {
        CatalogJob {
            id: id.to_string(),
            job_type: TRANSFER_JOB_TYPE.to_string(),
            owner_group: "group-a".to_string(),
            status_code: "002".to_string(),
            status_message: "transferring".to_string(),
            job_params: JobParams {
                dataset_list: datasets
                    .iter()
                    .map(|pid| DatasetElement {
                        pid: pid.to_string(),
                        files: vec![],
                    })
                    .collect(),
            },
            job_result_object: JobResultObject {
                transfer_reference: reference.to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn dataset(pid: &str, owner_group: &str, source_folder: &str) -> Dataset {
        Dataset {
            pid: pid.to_string(),
            owner_group: owner_group.to_string(),
            source_folder: source_folder.to_string(),
        }
    }
}
