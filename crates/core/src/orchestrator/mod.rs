//! Transfer orchestrator: client requests in, tracked jobs out.
//!
//! A request is checked in this order:
//! - **Facilities**: both must be configured
//! - **Dataset**: fetched with the caller's own token
//! - **Groups**: facility groups plus the dataset's owner group
//! - **Admission**: bounded pools are checked and submitted under one lock
//!
//! Only then is the transfer started and the catalog job recorded. If the
//! job cannot be recorded the transfer is cancelled again.
//!
//! Cancelling or deleting a job requires the job's owner group.

mod config;
mod service;
mod types;

pub use config::OrchestratorConfig;
pub use service::TransferOrchestrator;
pub use types::{
    FacilityRole, JobControlError, RequestError, TransferRequestBody, TransferRequestParams,
};
