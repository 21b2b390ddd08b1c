//! HTTP client for a SciCat-style catalog.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::config::CatalogConfig;
use crate::metrics::observe_external;

use super::{
    AuthSession, CallerIdentity, Catalog, CatalogError, CatalogJob, Dataset, JobFilter,
    JobResultObject, JobStatusCode, TRANSFER_JOB_TYPE,
};

/// Catalog client speaking the SciCat v3/v4 REST API.
pub struct HttpCatalogClient {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateJobBody<'a> {
    #[serde(rename = "type")]
    job_type: &'a str,
    owner_group: &'a str,
    job_params: serde_json::Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateJobBody<'a> {
    status_code: &'a str,
    status_message: &'a str,
    job_result_object: &'a JobResultObject,
}

#[derive(Deserialize)]
struct LoginResponse {
    access_token: String,
    created: DateTime<Utc>,
    expires_in: i64,
}

#[derive(Deserialize)]
struct IdentityResponse {
    #[serde(default)]
    profile: IdentityProfile,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct IdentityProfile {
    username: String,
    access_groups: Vec<String>,
}

impl HttpCatalogClient {
    /// Create a new catalog client.
    pub fn new(config: &CatalogConfig) -> Result<Self, CatalogError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()
            .map_err(|e| CatalogError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn job_url(&self, job_id: &str) -> String {
        self.url(&format!("/api/v4/jobs/{}", urlencoding::encode(job_id)))
    }

    fn dataset_url(&self, pid: &str) -> String {
        self.url(&format!("/api/v3/datasets/{}", urlencoding::encode(pid)))
    }

    async fn send(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<Response, CatalogError> {
        let started = Instant::now();
        let result = request.send().await.map_err(|e| {
            if e.is_timeout() {
                CatalogError::Timeout
            } else if e.is_connect() {
                CatalogError::ConnectionFailed(e.to_string())
            } else {
                CatalogError::UnexpectedResponse(e.to_string())
            }
        });
        observe_external("catalog", operation, started, &result);
        result
    }

    async fn api_error(response: Response) -> CatalogError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        CatalogError::ApiError {
            status,
            body: body.chars().take(200).collect(),
        }
    }

    async fn json<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, CatalogError> {
        response
            .json()
            .await
            .map_err(|e| CatalogError::UnexpectedResponse(e.to_string()))
    }
}

#[async_trait]
impl Catalog for HttpCatalogClient {
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<AuthSession, CatalogError> {
        let request = self
            .client
            .post(self.url("/api/v3/auth/login"))
            .json(&json!({ "username": username, "password": password }));
        let response = self.send("authenticate", request).await?;

        match response.status() {
            status if status.is_success() => {
                let login: LoginResponse = Self::json(response).await?;
                debug!(username = %username, "Catalog login successful");
                Ok(AuthSession {
                    token: login.access_token,
                    created_at: login.created,
                    expires_in_secs: login.expires_in,
                })
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(
                CatalogError::AuthenticationFailed(format!("login rejected for '{}'", username)),
            ),
            _ => Err(Self::api_error(response).await),
        }
    }

    async fn create_job(
        &self,
        token: &str,
        owner_group: &str,
        dataset_pid: &str,
    ) -> Result<CatalogJob, CatalogError> {
        let body = CreateJobBody {
            job_type: TRANSFER_JOB_TYPE,
            owner_group,
            job_params: json!({ "datasetList": [{ "pid": dataset_pid, "files": [] }] }),
        };
        let request = self
            .client
            .post(self.url("/api/v4/jobs"))
            .bearer_auth(token)
            .json(&body);
        let response = self.send("create_job", request).await?;

        match response.status() {
            status if status.is_success() => Self::json(response).await,
            StatusCode::UNAUTHORIZED => Err(CatalogError::AuthenticationFailed(
                "user is not logged in".to_string(),
            )),
            StatusCode::FORBIDDEN => Err(CatalogError::Forbidden(format!(
                "cannot create job for group '{}'",
                owner_group
            ))),
            _ => Err(Self::api_error(response).await),
        }
    }

    async fn update_job(
        &self,
        token: &str,
        job_id: &str,
        code: JobStatusCode,
        result: &JobResultObject,
    ) -> Result<(), CatalogError> {
        let body = UpdateJobBody {
            status_code: code.code(),
            status_message: code.message(),
            job_result_object: result,
        };
        let request = self
            .client
            .patch(self.job_url(job_id))
            .bearer_auth(token)
            .json(&body);
        let response = self.send("update_job", request).await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::FORBIDDEN => Err(CatalogError::Forbidden(format!(
                "cannot update job '{}'",
                job_id
            ))),
            StatusCode::BAD_REQUEST => Err(CatalogError::InvalidJobId(job_id.to_string())),
            _ => Err(Self::api_error(response).await),
        }
    }

    async fn list_jobs(
        &self,
        token: &str,
        filter: &JobFilter,
    ) -> Result<Vec<CatalogJob>, CatalogError> {
        let request = self
            .client
            .get(self.url("/api/v4/jobs"))
            .bearer_auth(token)
            .query(&[("filter", filter.to_query().to_string())]);
        let response = self.send("list_jobs", request).await?;

        match response.status() {
            StatusCode::OK => Self::json(response).await,
            StatusCode::BAD_REQUEST => Err(CatalogError::UnexpectedResponse(
                "job listing rejected, the filter is likely malformed".to_string(),
            )),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(
                CatalogError::Forbidden("not allowed to list jobs".to_string()),
            ),
            _ => Err(Self::api_error(response).await),
        }
    }

    async fn get_job(&self, token: &str, job_id: &str) -> Result<CatalogJob, CatalogError> {
        let request = self.client.get(self.job_url(job_id)).bearer_auth(token);
        let response = self.send("get_job", request).await?;

        match response.status() {
            StatusCode::OK => Self::json(response).await,
            StatusCode::NOT_FOUND => Err(CatalogError::NotFound(job_id.to_string())),
            StatusCode::FORBIDDEN => Err(CatalogError::Forbidden(format!(
                "cannot read job '{}'",
                job_id
            ))),
            StatusCode::BAD_REQUEST => Err(CatalogError::InvalidJobId(job_id.to_string())),
            _ => Err(Self::api_error(response).await),
        }
    }

    async fn delete_job(&self, token: &str, job_id: &str) -> Result<(), CatalogError> {
        let request = self.client.delete(self.job_url(job_id)).bearer_auth(token);
        let response = self.send("delete_job", request).await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(CatalogError::NotFound(job_id.to_string())),
            StatusCode::FORBIDDEN => Err(CatalogError::Forbidden(format!(
                "cannot delete job '{}'",
                job_id
            ))),
            StatusCode::BAD_REQUEST => Err(CatalogError::InvalidJobId(job_id.to_string())),
            _ => Err(Self::api_error(response).await),
        }
    }

    async fn mark_dataset_ready(
        &self,
        token: &str,
        dataset_pid: &str,
    ) -> Result<(), CatalogError> {
        let body = json!({
            "datasetlifecycle": {
                "archivable": true,
                "archiveStatusMessage": "datasetCreated"
            }
        });
        let request = self
            .client
            .patch(self.dataset_url(dataset_pid))
            .bearer_auth(token)
            .json(&body);
        let response = self.send("mark_dataset_ready", request).await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(CatalogError::NotFound(dataset_pid.to_string())),
            StatusCode::FORBIDDEN => Err(CatalogError::Forbidden(format!(
                "cannot update dataset '{}'",
                dataset_pid
            ))),
            _ => Err(Self::api_error(response).await),
        }
    }

    async fn get_dataset(&self, token: &str, pid: &str) -> Result<Dataset, CatalogError> {
        let request = self.client.get(self.dataset_url(pid)).bearer_auth(token);
        let response = self.send("get_dataset", request).await?;

        match response.status() {
            StatusCode::OK => {
                let mut dataset: Dataset = Self::json(response).await?;
                if dataset.pid.is_empty() {
                    dataset.pid = pid.to_string();
                }
                Ok(dataset)
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(CatalogError::NotFound(format!(
                    "dataset '{}' (HTTP {}): {}",
                    pid,
                    status.as_u16(),
                    body.chars().take(200).collect::<String>()
                )))
            }
        }
    }

    async fn user_identity(&self, api_key: &str) -> Result<CallerIdentity, CatalogError> {
        let request = self
            .client
            .get(self.url("/api/v3/users/my/identity"))
            .bearer_auth(api_key);
        let response = self.send("user_identity", request).await?;

        if response.status() != StatusCode::OK {
            return Err(CatalogError::AuthenticationFailed(format!(
                "access token rejected (HTTP {})",
                response.status().as_u16()
            )));
        }

        let identity: IdentityResponse = Self::json(response).await?;
        Ok(CallerIdentity {
            username: identity.profile.username,
            access_groups: identity.profile.access_groups,
            token: api_key.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(url: &str) -> HttpCatalogClient {
        HttpCatalogClient::new(&CatalogConfig {
            url: url.to_string(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_urls_trim_trailing_slash_and_encode_ids() {
        let catalog = client("http://catalog.local/");
        assert_eq!(
            catalog.job_url("job/1"),
            "http://catalog.local/api/v4/jobs/job%2F1"
        );
        assert_eq!(
            catalog.dataset_url("20.500/abc"),
            "http://catalog.local/api/v3/datasets/20.500%2Fabc"
        );
    }

    #[test]
    fn test_login_response_parse() {
        let login: LoginResponse = serde_json::from_value(json!({
            "access_token": "tok",
            "id": "tok",
            "created": "2024-05-01T10:00:00.000Z",
            "expires_in": 3600,
            "ttl": 3600,
            "userId": "u1"
        }))
        .unwrap();
        assert_eq!(login.access_token, "tok");
        assert_eq!(login.expires_in, 3600);
    }

    #[test]
    fn test_identity_response_parse() {
        let identity: IdentityResponse = serde_json::from_value(json!({
            "id": "u1",
            "profile": {
                "username": "jdoe",
                "accessGroups": ["g1", "g2"],
                "email": "jdoe@example.org"
            }
        }))
        .unwrap();
        assert_eq!(identity.profile.username, "jdoe");
        assert_eq!(identity.profile.access_groups, vec!["g1", "g2"]);
    }

    #[tokio::test]
    async fn test_unreachable_catalog_is_connection_error() {
        let catalog = client("http://127.0.0.1:1");
        let result = catalog.authenticate("user", "pass").await;
        assert!(matches!(
            result,
            Err(CatalogError::ConnectionFailed(_)) | Err(CatalogError::Timeout)
        ));
    }
}
