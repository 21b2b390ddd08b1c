//! Types shared by the job pool, workers and recovery.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::catalog::{Catalog, CatalogError, JobStatus};
use crate::config::PoolSettings;
use crate::credentials::{CredentialCache, CredentialError};
use crate::transfer::TransferService;

use super::CancellationRegistry;

/// Where a submitted job came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobOrigin {
    /// A fresh client request.
    #[default]
    Request,
    /// Re-adopted from the catalog at start-up.
    Recovery,
}

impl JobOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOrigin::Request => "request",
            JobOrigin::Recovery => "recovery",
        }
    }
}

/// Everything a worker needs to track one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    /// Catalog job id.
    pub job_id: String,
    /// Transfer-service reference of the running transfer.
    pub transfer_reference: String,
    pub dataset_pid: String,
    pub origin: JobOrigin,
}

impl JobDescriptor {
    pub fn new(
        job_id: impl Into<String>,
        transfer_reference: impl Into<String>,
        dataset_pid: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            transfer_reference: transfer_reference.into(),
            dataset_pid: dataset_pid.into(),
            origin: JobOrigin::Request,
        }
    }

    pub fn recovered(mut self) -> Self {
        self.origin = JobOrigin::Recovery;
        self
    }
}

/// Final result of one worker run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub job_id: String,
    /// Always a terminal status.
    pub status: JobStatus,
    pub error: Option<String>,
}

/// Pool configuration, fixed at pool creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_concurrency: usize,
    /// Maximum outstanding jobs (0 = unbounded).
    pub queue_capacity: usize,
    pub poll_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig::from(&PoolSettings::default())
    }
}

impl From<&PoolSettings> for PoolConfig {
    fn from(settings: &PoolSettings) -> Self {
        Self {
            max_concurrency: settings.max_concurrency.max(1),
            queue_capacity: settings.queue_capacity,
            poll_interval: Duration::from_secs(settings.poll_interval_secs),
        }
    }
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Workers currently running.
    pub active: usize,
    /// Jobs admitted but waiting for a slot.
    pub queued: usize,
    pub max_concurrency: usize,
    pub queue_capacity: usize,
}

/// Collaborators shared by every worker.
#[derive(Clone)]
pub struct WorkerContext {
    pub catalog: Arc<dyn Catalog>,
    pub transfer: Arc<dyn TransferService>,
    pub credentials: Arc<CredentialCache>,
    pub registry: Arc<CancellationRegistry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("Job queue is full ({capacity} outstanding jobs)")]
    QueueFull { capacity: usize },

    #[error("Job '{0}' is already tracked by the pool")]
    AlreadyTracked(String),

    #[error("Job pool is shut down")]
    ShutDown,

    #[error("Worker for job '{0}' ended without an outcome")]
    WorkerAborted(String),
}

impl PoolError {
    pub(crate) fn reason(&self) -> &'static str {
        match self {
            PoolError::QueueFull { .. } => "queue_full",
            PoolError::AlreadyTracked(_) => "already_tracked",
            PoolError::ShutDown => "shut_down",
            PoolError::WorkerAborted(_) => "worker_aborted",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("No active job with id '{0}'")]
    NotFound(String),

    #[error("Job '{0}' already has a cancellation handle")]
    AlreadyRegistered(String),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("Catalog deletion failed: {0}")]
    Catalog(#[from] CatalogError),
}

#[derive(Debug, Clone, Error)]
pub enum RecoveryError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("Listing unfinished jobs failed: {0}")]
    Listing(#[from] CatalogError),
}
