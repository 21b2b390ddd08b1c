//! Globus-transfer-style HTTP client.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::TransferConfig;
use crate::metrics::observe_external;

use super::{
    StartTransferRequest, TransferError, TransferService, TransferState, TransferStatus,
};

/// Refresh the service token this long before it actually expires.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

/// Sync level used for whole-folder transfers (checksum comparison).
const FOLDER_SYNC_LEVEL: u8 = 3;

#[derive(Debug)]
struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Transfer client authenticated with the OAuth2 client-credentials grant.
pub struct HttpTransferClient {
    client: Client,
    config: TransferConfig,
    token: Mutex<Option<AccessToken>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Deserialize)]
struct SubmissionIdResponse {
    value: String,
}

#[derive(Deserialize)]
struct SubmitResponse {
    task_id: String,
}

#[derive(Deserialize)]
struct FatalError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
struct TaskResponse {
    status: String,
    #[serde(default)]
    bytes_transferred: u64,
    #[serde(default)]
    files_transferred: u64,
    #[serde(default)]
    files: u64,
    #[serde(default)]
    files_skipped: Option<u64>,
    #[serde(default)]
    fatal_error: Option<FatalError>,
}

impl TaskResponse {
    fn into_status(self) -> TransferStatus {
        let files_total = self.files.saturating_sub(self.files_skipped.unwrap_or(0));
        let state = TransferState::from_service(&self.status);
        let error_detail = match (&state, self.fatal_error) {
            (TransferState::Failed, Some(fatal)) => Some(format!(
                "code: \"{}\" description: \"{}\"",
                fatal.code, fatal.description
            )),
            _ => None,
        };
        TransferStatus {
            state,
            bytes_transferred: self.bytes_transferred,
            files_transferred: self.files_transferred,
            files_total,
            error_detail,
        }
    }
}

impl HttpTransferClient {
    /// Create a new transfer client.
    pub fn new(config: TransferConfig) -> Result<Self, TransferError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()
            .map_err(|e| TransferError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            client,
            config,
            token: Mutex::new(None),
        })
    }

    /// Get the base URL without trailing slash.
    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    /// Ensure we have a valid access token, requesting one if needed.
    async fn access_token(&self) -> Result<String, TransferError> {
        let mut slot = self.token.lock().await;
        if let Some(token) = slot.as_ref() {
            if Utc::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let request = self
            .client
            .post(&self.config.auth_url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[
                ("grant_type", "client_credentials".to_string()),
                ("scope", self.config.scopes.join(" ")),
            ]);
        let response = self.send("token", request).await?;
        if !response.status().is_success() {
            return Err(TransferError::AuthenticationFailed(format!(
                "client-credentials grant rejected (HTTP {})",
                response.status().as_u16()
            )));
        }

        let granted: TokenResponse = Self::json(response).await?;
        let expires_at = token_expiry(Utc::now(), granted.expires_in).ok_or_else(|| {
            TransferError::UnexpectedResponse(format!(
                "token lifetime out of range: {}s",
                granted.expires_in
            ))
        })?;
        let value = granted.access_token.clone();
        *slot = Some(AccessToken {
            value: granted.access_token,
            expires_at,
        });
        debug!("Transfer service token obtained");
        Ok(value)
    }

    /// Drop the cached token after the service refused it.
    async fn invalidate_token(&self) {
        warn!("Transfer service token rejected, will re-authenticate");
        *self.token.lock().await = None;
    }

    async fn send(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<Response, TransferError> {
        let started = Instant::now();
        let result = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransferError::Timeout
            } else if e.is_connect() {
                TransferError::ConnectionFailed(e.to_string())
            } else {
                TransferError::UnexpectedResponse(e.to_string())
            }
        });
        observe_external("transfer", operation, started, &result);
        result
    }

    /// Send an authenticated request and map error statuses.
    async fn authorized(
        &self,
        operation: &str,
        build: impl Fn(&Client) -> RequestBuilder,
    ) -> Result<Response, TransferError> {
        let token = self.access_token().await?;
        let response = self.send(operation, build(&self.client).bearer_auth(token)).await?;

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED => {
                self.invalidate_token().await;
                Err(TransferError::AuthenticationFailed(
                    "access token rejected".to_string(),
                ))
            }
            StatusCode::NOT_FOUND => Err(TransferError::NotFound(operation.to_string())),
            StatusCode::BAD_REQUEST | StatusCode::FORBIDDEN | StatusCode::CONFLICT => {
                let body = response.text().await.unwrap_or_default();
                Err(TransferError::Rejected(body.chars().take(300).collect()))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(TransferError::ApiError {
                    status: status.as_u16(),
                    body: body.chars().take(300).collect(),
                })
            }
        }
    }

    async fn json<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, TransferError> {
        response
            .json()
            .await
            .map_err(|e| TransferError::UnexpectedResponse(e.to_string()))
    }

    async fn submission_id(&self) -> Result<String, TransferError> {
        let url = format!("{}/submission_id", self.base_url());
        let response = self
            .authorized("submission_id", |client| client.get(&url))
            .await?;
        let id: SubmissionIdResponse = Self::json(response).await?;
        Ok(id.value)
    }
}

/// Build the transfer document for a start request.
fn transfer_document(request: &StartTransferRequest, submission_id: &str) -> Value {
    let mut document = json!({
        "DATA_TYPE": "transfer",
        "submission_id": submission_id,
        "source_endpoint": request.source_collection,
        "destination_endpoint": request.destination_collection,
    });

    let items: Vec<Value> = match &request.files {
        Some(files) => files
            .iter()
            .map(|file| {
                let data_type = if file.is_symlink {
                    "transfer_symlink_item"
                } else {
                    "transfer_item"
                };
                json!({
                    "DATA_TYPE": data_type,
                    "source_path": join_path(&request.source_path, &file.path),
                    "destination_path": join_path(&request.destination_path, &file.path),
                })
            })
            .collect(),
        None => {
            document["sync_level"] = json!(FOLDER_SYNC_LEVEL);
            vec![json!({
                "DATA_TYPE": "transfer_item",
                "source_path": request.source_path,
                "destination_path": request.destination_path,
                "recursive": true,
            })]
        }
    };
    document["DATA"] = Value::Array(items);
    document
}

/// Cache expiry for a token granted at `now`, shortened by the refresh margin.
fn token_expiry(now: DateTime<Utc>, expires_in: i64) -> Option<DateTime<Utc>> {
    let lifetime = expires_in.saturating_sub(TOKEN_EXPIRY_MARGIN_SECS).max(0);
    TimeDelta::try_seconds(lifetime).and_then(|lifetime| now.checked_add_signed(lifetime))
}

fn join_path(base: &str, relative: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        relative.trim_start_matches('/')
    )
}

#[async_trait]
impl TransferService for HttpTransferClient {
    async fn start_transfer(
        &self,
        request: &StartTransferRequest,
    ) -> Result<String, TransferError> {
        let submission_id = self.submission_id().await?;
        let document = transfer_document(request, &submission_id);
        let url = format!("{}/transfer", self.base_url());

        let response = self
            .authorized("start_transfer", |client| client.post(&url).json(&document))
            .await?;
        let submitted: SubmitResponse = Self::json(response).await?;

        info!(
            reference = %submitted.task_id,
            source = %request.source_collection,
            destination = %request.destination_collection,
            "Transfer submitted"
        );
        Ok(submitted.task_id)
    }

    async fn get_transfer_status(&self, reference: &str) -> Result<TransferStatus, TransferError> {
        let url = format!("{}/task/{}", self.base_url(), urlencoding::encode(reference));
        let response = self
            .authorized("get_transfer_status", |client| client.get(&url))
            .await?;
        let task: TaskResponse = Self::json(response).await?;
        Ok(task.into_status())
    }

    async fn cancel_transfer(&self, reference: &str) -> Result<(), TransferError> {
        let url = format!(
            "{}/task/{}/cancel",
            self.base_url(),
            urlencoding::encode(reference)
        );
        self.authorized("cancel_transfer", |client| client.post(&url))
            .await?;
        info!(reference = %reference, "Transfer cancelled");
        Ok(())
    }
}
