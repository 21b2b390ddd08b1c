//! Types for transfer requests.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::CatalogError;
use crate::credentials::CredentialError;
use crate::jobs::{PoolError, RegistryError};
use crate::template::TemplateError;
use crate::transfer::{TransferError, TransferFile};

/// Which end of a transfer a facility was named for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacilityRole {
    Source,
    Destination,
}

impl std::fmt::Display for FacilityRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FacilityRole::Source => write!(f, "source"),
            FacilityRole::Destination => write!(f, "destination"),
        }
    }
}

/// Errors that can occur while handling a transfer request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("invalid {role} facility '{name}'")]
    UnknownFacility { role: FacilityRole, name: String },

    #[error("the dataset '{0}' does not exist or you don't have access rights to it")]
    DatasetNotFound(String),

    /// Dataset lookup failed for a reason other than absence.
    #[error("dataset lookup failed: {0}")]
    DatasetLookup(#[source] CatalogError),

    #[error("missing access groups: {}", .0.join(", "))]
    MissingGroups(Vec<String>),

    #[error("the job queue is currently full, try again later")]
    QueueFull,

    #[error("no body was sent with the request")]
    MissingBody,

    #[error("couldn't template destination folder: {0}")]
    Template(#[from] TemplateError),

    #[error("can't request transfer: {0}")]
    TransferStart(#[from] TransferError),

    #[error("service user login failed: {0}")]
    CredentialFailed(#[from] CredentialError),

    #[error("failed creating transfer job in the catalog: {0}")]
    JobCreation(#[source] CatalogError),

    #[error("job pool refused the job: {0}")]
    Submission(#[from] PoolError),
}

/// Errors that can occur while cancelling or deleting an existing job.
#[derive(Debug, Error)]
pub enum JobControlError {
    #[error("job '{0}' does not exist")]
    JobNotFound(String),

    /// Job lookup failed for a reason other than absence.
    #[error("job lookup failed: {0}")]
    JobLookup(#[source] CatalogError),

    #[error("missing access groups: {}", .0.join(", "))]
    MissingGroups(Vec<String>),

    #[error("service user login failed: {0}")]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Query parameters of a transfer request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequestParams {
    pub scicat_pid: String,
    pub source_facility: String,
    pub dest_facility: String,
}

/// Body of a transfer request. Without a file list the whole source
/// folder is synchronised.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequestBody {
    #[serde(default)]
    pub file_list: Option<Vec<TransferFile>>,
}
