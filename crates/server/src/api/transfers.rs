//! Transfer request and job cancellation handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use ferry_core::{
    CatalogError, JobControlError, PoolError, RegistryError, RequestError, TransferRequestBody,
    TransferRequestParams,
};

use super::middleware::Caller;
use super::ErrorResponse;
use crate::state::AppState;

type ApiError = (StatusCode, Json<ErrorResponse>);

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct TransferResponse {
    pub job_id: String,
}

/// Query parameters for deleting a job
#[derive(Debug, Default, Deserialize)]
pub struct DeleteTransferParams {
    /// Also remove the job record from the catalog
    #[serde(default)]
    pub delete: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteTransferResponse {
    pub job_id: String,
    /// Whether an active job was told to stop
    pub cancelled: bool,
    pub deleted: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// Request a transfer of a dataset between two facilities.
pub async fn request_transfer(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Query(params): Query<TransferRequestParams>,
    body: Option<Json<TransferRequestBody>>,
) -> Result<Json<TransferResponse>, ApiError> {
    let body = body.map(|Json(body)| body);
    match state
        .orchestrator()
        .request_transfer(&caller, params, body)
        .await
    {
        Ok(job_id) => Ok(Json(TransferResponse { job_id })),
        Err(e) => Err(request_error(e)),
    }
}

/// Cancel a transfer job, optionally deleting its catalog record.
pub async fn delete_transfer(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
    Path(job_id): Path<String>,
    Query(params): Query<DeleteTransferParams>,
) -> Result<Json<DeleteTransferResponse>, ApiError> {
    let orchestrator = state.orchestrator();
    let result = if params.delete {
        orchestrator.delete_job(&caller, &job_id).await
    } else {
        orchestrator.cancel_job(&caller, &job_id).await.map(|()| true)
    };

    match result {
        Ok(cancelled) => {
            info!(
                job_id = %job_id,
                user = %caller.username,
                deleted = params.delete,
                "Transfer job stopped"
            );
            Ok(Json(DeleteTransferResponse {
                job_id,
                cancelled,
                deleted: params.delete,
            }))
        }
        Err(e) => Err(job_control_error(e)),
    }
}

// ============================================================================
// Error mapping
// ============================================================================

fn error(status: StatusCode, message: impl Into<String>, details: Option<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            message: message.into(),
            details,
        }),
    )
}

fn request_error(e: RequestError) -> ApiError {
    let details = Some(e.to_string());
    match e {
        RequestError::UnknownFacility { role, .. } => error(
            StatusCode::FORBIDDEN,
            format!("invalid {} facility", role),
            details,
        ),
        RequestError::DatasetNotFound(_) => error(
            StatusCode::BAD_REQUEST,
            "the dataset with the given pid does not exist or you don't have access rights to it",
            details,
        ),
        RequestError::MissingGroups(missing) => error(
            StatusCode::UNAUTHORIZED,
            "you don't have the required access groups to request this transfer",
            Some(format!("missing groups: {:?}", missing)),
        ),
        RequestError::QueueFull | RequestError::Submission(PoolError::QueueFull { .. }) => error(
            StatusCode::SERVICE_UNAVAILABLE,
            "the task queue is currently full, try again later...",
            None,
        ),
        RequestError::Submission(_) => error(
            StatusCode::SERVICE_UNAVAILABLE,
            "the job pool is not accepting jobs",
            details,
        ),
        RequestError::MissingBody => {
            error(StatusCode::BAD_REQUEST, "no body was sent with the request", None)
        }
        RequestError::TransferStart(_) => {
            error(StatusCode::BAD_REQUEST, "can't request transfer", details)
        }
        RequestError::DatasetLookup(_) => error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "couldn't fetch the dataset from the catalog",
            details,
        ),
        RequestError::Template(_) => error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "couldn't template destination folder for the transfer",
            details,
        ),
        RequestError::CredentialFailed(_) => {
            warn!(error = ?details, "Service user login failed during transfer request");
            error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "service user login failed",
                details,
            )
        }
        RequestError::JobCreation(_) => error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed creating transfer job in the catalog",
            details,
        ),
    }
}

fn job_control_error(e: JobControlError) -> ApiError {
    let details = Some(e.to_string());
    match e {
        JobControlError::MissingGroups(missing) => error(
            StatusCode::UNAUTHORIZED,
            "you don't have the required access groups to stop this transfer",
            Some(format!("missing groups: {:?}", missing)),
        ),
        JobControlError::JobNotFound(_)
        | JobControlError::Registry(RegistryError::NotFound(_))
        | JobControlError::Registry(RegistryError::Catalog(CatalogError::NotFound(_))) => {
            error(StatusCode::NOT_FOUND, "no such transfer job", details)
        }
        JobControlError::Registry(RegistryError::AlreadyRegistered(_)) => {
            error(StatusCode::CONFLICT, "transfer job is already being stopped", details)
        }
        JobControlError::Credential(_) | JobControlError::Registry(RegistryError::Credential(_)) => {
            error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "service user login failed",
                details,
            )
        }
        JobControlError::JobLookup(_) => error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed looking up the job in the catalog",
            details,
        ),
        JobControlError::Registry(RegistryError::Catalog(_)) => error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed deleting the job from the catalog",
            details,
        ),
    }
}
