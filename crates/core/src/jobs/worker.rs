//! Per-job polling state machine.
//!
//! A worker drives one job from `Transferring` to a terminal state:
//! - polls the transfer service once per interval
//! - mirrors counters and status into the catalog after every poll
//! - marks the dataset ready for archival on success
//! - cancels the transfer when its cancellation token fires
//!
//! A failed poll ends the job; there is no retry.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::catalog::{JobResultObject, JobStatus, JobStatusCode};
use crate::metrics::{CATALOG_UPDATE_FAILURES, JOBS_COMPLETED, POLL_ERRORS, TRANSFER_POLLS};
use crate::transfer::{TransferState, TransferStatus};

use super::{JobDescriptor, JobOutcome, WorkerContext};

/// What a single poll produced.
struct PollResult {
    code: JobStatusCode,
    error: Option<String>,
}

/// Why a catalog update did not go through.
enum ReportError {
    /// The job can no longer be reported on (credential failure or the
    /// catalog refused the job).
    Fatal(String),
    /// Worth logging; the next poll reports fresh state anyway.
    Transient(String),
}

pub struct TransferJobWorker {
    descriptor: JobDescriptor,
    context: WorkerContext,
    cancel: CancellationToken,
    poll_interval: Duration,
    status: JobStatus,
    result: JobResultObject,
}

impl TransferJobWorker {
    pub fn new(
        descriptor: JobDescriptor,
        context: WorkerContext,
        cancel: CancellationToken,
        poll_interval: Duration,
    ) -> Self {
        let result = JobResultObject {
            transfer_reference: descriptor.transfer_reference.clone(),
            ..Default::default()
        };
        Self {
            descriptor,
            context,
            cancel,
            poll_interval,
            status: JobStatus::Transferring,
            result,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.descriptor.job_id
    }

    /// Run the job to a terminal state.
    ///
    /// The job's cancellation handle is deregistered on every exit path.
    pub async fn run(mut self) -> JobOutcome {
        info!(
            job_id = %self.descriptor.job_id,
            reference = %self.descriptor.transfer_reference,
            dataset = %self.descriptor.dataset_pid,
            origin = self.descriptor.origin.as_str(),
            "Tracking transfer"
        );

        let error = self.drive().await;

        self.context.registry.remove(&self.descriptor.job_id);
        JOBS_COMPLETED
            .with_label_values(&[self.status.as_str()])
            .inc();
        info!(
            job_id = %self.descriptor.job_id,
            status = %self.status,
            "Job reached terminal state"
        );

        JobOutcome {
            job_id: self.descriptor.job_id,
            status: self.status,
            error,
        }
    }

    async fn drive(&mut self) -> Option<String> {
        loop {
            if self.cancel.is_cancelled() {
                return self.cancel_transfer().await;
            }

            let poll = self.poll().await;
            if let Err(report) = self.report(poll.code, poll.error.clone()).await {
                match report {
                    ReportError::Fatal(reason) => {
                        if !self.status.is_terminal() {
                            self.transition(JobStatus::Failed);
                        }
                        return Some(reason);
                    }
                    ReportError::Transient(reason) => {
                        warn!(
                            job_id = %self.descriptor.job_id,
                            error = %reason,
                            "Catalog update failed, continuing"
                        );
                    }
                }
            }

            if self.status.is_terminal() {
                if self.status == JobStatus::Finished {
                    self.mark_dataset_ready().await;
                }
                return poll.error;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.cancel.cancelled() => {
                    debug!(job_id = %self.descriptor.job_id, "Woken by cancellation");
                }
            }
        }
    }

    /// Poll the transfer service once and fold the answer into the counters.
    async fn poll(&mut self) -> PollResult {
        TRANSFER_POLLS.inc();
        let reference = self.descriptor.transfer_reference.clone();

        let status = match self.context.transfer.get_transfer_status(&reference).await {
            Ok(status) => status,
            Err(e) => {
                POLL_ERRORS.inc();
                return self.poll_failed(format!(
                    "can't continue transfer because an error occurred while polling '{}': {}",
                    reference, e
                ));
            }
        };

        match &status.state {
            TransferState::Active => {
                self.record_counters(&status);
                PollResult {
                    code: JobStatusCode::Transferring,
                    error: None,
                }
            }
            TransferState::Succeeded => {
                self.record_counters(&status);
                self.transition(JobStatus::Finished);
                PollResult {
                    code: JobStatusCode::Finished,
                    error: None,
                }
            }
            TransferState::Failed => self.poll_failed(format!(
                "transfer failed - {}",
                status.error_detail.as_deref().unwrap_or("no detail given")
            )),
            TransferState::Inactive => self.poll_failed(
                "transfer became inactive, requires manual intervention".to_string(),
            ),
            TransferState::Unknown(state) => {
                self.poll_failed(format!("unknown transfer status: {}", state))
            }
        }
    }

    fn poll_failed(&mut self, error: String) -> PollResult {
        self.transition(JobStatus::Failed);
        PollResult {
            code: JobStatusCode::PollFailed,
            error: Some(error),
        }
    }

    fn record_counters(&mut self, status: &TransferStatus) {
        self.result.bytes_transferred = status.bytes_transferred;
        self.result.files_transferred = status.files_transferred;
        self.result.files_total = status.files_total;
    }

    fn transition(&mut self, next: JobStatus) {
        if self.status.can_transition_to(next) {
            self.status = next;
        } else {
            error!(
                job_id = %self.descriptor.job_id,
                from = %self.status,
                to = %next,
                "Refusing to leave terminal state"
            );
        }
    }

    /// Write the current counters and status to the catalog.
    async fn report(
        &mut self,
        code: JobStatusCode,
        error: Option<String>,
    ) -> Result<(), ReportError> {
        self.result.status = code.status();
        self.result.completed = code.status().is_terminal();
        self.result.error = error.unwrap_or_default();

        info!(
            job_id = %self.descriptor.job_id,
            reference = %self.descriptor.transfer_reference,
            dataset = %self.descriptor.dataset_pid,
            bytes_transferred = self.result.bytes_transferred,
            files_transferred = self.result.files_transferred,
            files_total = self.result.files_total,
            status = %self.result.status,
            error = %self.result.error,
            "Transfer progress"
        );

        let token = match self.context.credentials.get_token().await {
            Ok(token) => token,
            Err(e) => {
                CATALOG_UPDATE_FAILURES.with_label_values(&["credential"]).inc();
                return Err(ReportError::Fatal(format!(
                    "getting service token failed, job can no longer be updated: {}",
                    e
                )));
            }
        };

        match self
            .context
            .catalog
            .update_job(&token, &self.descriptor.job_id, code, &self.result)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.rejects_job() => {
                CATALOG_UPDATE_FAILURES.with_label_values(&["rejected"]).inc();
                Err(ReportError::Fatal(format!("catalog rejected job update: {}", e)))
            }
            Err(e) => {
                CATALOG_UPDATE_FAILURES.with_label_values(&["transient"]).inc();
                Err(ReportError::Transient(e.to_string()))
            }
        }
    }

    /// Flag the dataset for archival; record a failure once, then give up.
    async fn mark_dataset_ready(&mut self) {
        let job_id = self.descriptor.job_id.clone();
        let dataset = self.descriptor.dataset_pid.clone();

        let token = match self.context.credentials.get_token().await {
            Ok(token) => token,
            Err(e) => {
                error!(job_id = %job_id, dataset = %dataset, error = %e,
                    "Cannot mark dataset ready, no service token");
                return;
            }
        };

        let failure = match self
            .context
            .catalog
            .mark_dataset_ready(&token, &dataset)
            .await
        {
            Ok(()) => {
                info!(job_id = %job_id, dataset = %dataset, "Dataset marked ready for archival");
                return;
            }
            Err(e) => e.to_string(),
        };

        warn!(job_id = %job_id, dataset = %dataset, error = %failure,
            "Marking dataset ready failed");
        if let Err(ReportError::Fatal(e) | ReportError::Transient(e)) = self
            .report(JobStatusCode::NotArchivable, Some(failure))
            .await
        {
            error!(job_id = %job_id, error = %e, "Recording archival failure failed");
        }
    }

    /// Cancel the transfer and record the result.
    async fn cancel_transfer(&mut self) -> Option<String> {
        let reference = self.descriptor.transfer_reference.clone();
        info!(job_id = %self.descriptor.job_id, reference = %reference, "Cancelling transfer");

        let (code, error) = match self.context.transfer.cancel_transfer(&reference).await {
            Ok(()) => (JobStatusCode::Cancelled, None),
            Err(e) => (
                JobStatusCode::CancelFailed,
                Some(format!("failed cancelling transfer: {}", e)),
            ),
        };
        self.transition(code.status());

        if let Err(ReportError::Fatal(e) | ReportError::Transient(e)) =
            self.report(code, error.clone()).await
        {
            error!(job_id = %self.descriptor.job_id, error = %e,
                "Recording cancellation failed");
        }
        error
    }
}
