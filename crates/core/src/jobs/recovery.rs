//! Start-up re-adoption of unfinished jobs.

use std::sync::Arc;

use tracing::{info, warn};

use crate::catalog::{Catalog, CatalogJob, JobFilter};
use crate::credentials::CredentialCache;
use crate::metrics::JOBS_RECOVERED;

use super::{JobDescriptor, JobPool, RecoveryError};

/// Why an unfinished job was not resumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NoTransferReference,
    MultipleDatasets(usize),
    NoDatasets,
    Refused(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NoTransferReference => {
                write!(f, "it has no transfer reference, so it cannot be resumed")
            }
            SkipReason::MultipleDatasets(count) => write!(
                f,
                "it has more than one associated dataset (a total of {}), which is not supported",
                count
            ),
            SkipReason::NoDatasets => {
                write!(f, "it has no associated datasets, so it cannot be resumed")
            }
            SkipReason::Refused(reason) => write!(f, "the pool refused it: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedJob {
    pub job_id: String,
    pub reason: SkipReason,
}

/// What one recovery pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub resumed: Vec<String>,
    pub skipped: Vec<SkippedJob>,
}

/// Re-submits jobs a previous process left unfinished.
pub struct RecoveryLoader {
    catalog: Arc<dyn Catalog>,
    credentials: Arc<CredentialCache>,
}

impl RecoveryLoader {
    pub fn new(catalog: Arc<dyn Catalog>, credentials: Arc<CredentialCache>) -> Self {
        Self {
            catalog,
            credentials,
        }
    }

    /// Resume every eligible unfinished transfer job.
    ///
    /// Only the listing call is fatal; individual jobs that cannot be
    /// resumed are logged and skipped.
    pub async fn resume(&self, pool: &JobPool) -> Result<RecoveryReport, RecoveryError> {
        let token = self.credentials.get_token().await?;
        let jobs = self
            .catalog
            .list_jobs(&token, &JobFilter::unfinished_transfers())
            .await?;

        info!(count = jobs.len(), "Found unfinished transfer jobs");

        let mut report = RecoveryReport::default();
        for job in jobs {
            match Self::descriptor(&job) {
                Ok(descriptor) => match pool.submit(descriptor) {
                    Ok(_) => {
                        JOBS_RECOVERED.inc();
                        report.resumed.push(job.id);
                    }
                    Err(e) => report.skip(job.id, SkipReason::Refused(e.to_string())),
                },
                Err(reason) => report.skip(job.id, reason),
            }
        }

        info!(
            resumed = report.resumed.len(),
            skipped = report.skipped.len(),
            "Job recovery finished"
        );
        Ok(report)
    }

    fn descriptor(job: &CatalogJob) -> Result<JobDescriptor, SkipReason> {
        let reference = job
            .transfer_reference()
            .ok_or(SkipReason::NoTransferReference)?;

        let dataset = match job.dataset_pids().as_slice() {
            [] => return Err(SkipReason::NoDatasets),
            [single] => single.to_string(),
            many => return Err(SkipReason::MultipleDatasets(many.len())),
        };

        Ok(JobDescriptor::new(&job.id, reference, dataset).recovered())
    }
}

impl RecoveryReport {
    fn skip(&mut self, job_id: String, reason: SkipReason) {
        warn!(job_id = %job_id, "Skipping job: {}", reason);
        self.skipped.push(SkippedJob { job_id, reason });
    }
}
