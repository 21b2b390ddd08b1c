//! Types for transfer-service operations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when talking to the transfer service.
#[derive(Debug, Clone, Error)]
pub enum TransferError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Transfer rejected: {0}")]
    Rejected(String),

    #[error("Transfer not found: {0}")]
    NotFound(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("API error (HTTP {status}): {body}")]
    ApiError { status: u16, body: String },

    #[error("Request timeout")]
    Timeout,
}

/// State of a transfer as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    /// Still moving data.
    Active,
    /// Paused by the service; needs manual intervention.
    Inactive,
    Succeeded,
    Failed,
    /// Any state the orchestrator does not know about.
    Unknown(String),
}

impl TransferState {
    /// Parse the service's upper-case status string.
    pub fn from_service(status: &str) -> Self {
        match status {
            "ACTIVE" => TransferState::Active,
            "INACTIVE" => TransferState::Inactive,
            "SUCCEEDED" => TransferState::Succeeded,
            "FAILED" => TransferState::Failed,
            other => TransferState::Unknown(other.to_string()),
        }
    }
}

/// Snapshot of a transfer's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStatus {
    pub state: TransferState,
    pub bytes_transferred: u64,
    pub files_transferred: u64,
    /// Files the transfer will move (skipped files excluded).
    pub files_total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl TransferStatus {
    pub fn active(bytes_transferred: u64, files_transferred: u64, files_total: u64) -> Self {
        Self {
            state: TransferState::Active,
            bytes_transferred,
            files_transferred,
            files_total,
            error_detail: None,
        }
    }

    pub fn succeeded(bytes_transferred: u64, files_transferred: u64, files_total: u64) -> Self {
        Self {
            state: TransferState::Succeeded,
            ..Self::active(bytes_transferred, files_transferred, files_total)
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            state: TransferState::Failed,
            error_detail: Some(detail.into()),
            ..Self::active(0, 0, 0)
        }
    }

    pub fn with_state(mut self, state: TransferState) -> Self {
        self.state = state;
        self
    }
}

/// One file of an explicit file list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferFile {
    /// Path relative to the transfer's source folder.
    pub path: String,
    #[serde(default)]
    pub is_symlink: bool,
}

/// Request to start a transfer between two collections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartTransferRequest {
    pub source_collection: String,
    pub source_path: String,
    pub destination_collection: String,
    pub destination_path: String,
    /// Explicit file list; `None` syncs the whole source folder.
    pub files: Option<Vec<TransferFile>>,
}

/// Trait for transfer-service backends.
#[async_trait]
pub trait TransferService: Send + Sync {
    /// Start a transfer and return its reference.
    async fn start_transfer(&self, request: &StartTransferRequest)
        -> Result<String, TransferError>;

    /// Current status of a transfer.
    async fn get_transfer_status(&self, reference: &str) -> Result<TransferStatus, TransferError>;

    /// Ask the service to cancel a transfer.
    async fn cancel_transfer(&self, reference: &str) -> Result<(), TransferError>;
}
