//! Common test utilities for API testing with mocks.
//!
//! The fixture builds the full router in-process with a mock catalog and a
//! mock transfer service behind it, so requests run through authentication,
//! the orchestrator and the job pool without any external service.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use ferry_core::testing::{worker_context, MockCatalog, MockTransferService};
use ferry_core::{load_config_from_str, JobPool, OrchestratorConfig, PoolConfig, TransferOrchestrator};
use ferry_server::api::create_router;
use ferry_server::state::AppState;

/// Re-export fixtures for test convenience
pub use ferry_core::testing::fixtures;

/// API key of a caller holding every group the default request needs.
pub const ALICE_KEY: &str = "alice-key";
/// API key of a caller with no access groups.
pub const BOB_KEY: &str = "bob-key";

/// Dataset registered in the mock catalog by default.
pub const DATASET_PID: &str = "20.500.11935/abc-123";

/// Test fixture wiring the router to mock services.
pub struct TestFixture {
    pub router: Router,
    pub catalog: Arc<MockCatalog>,
    pub transfer: Arc<MockTransferService>,
    pub pool: JobPool,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
    pub text: String,
}

/// Knobs for the fixture's job pool.
#[derive(Debug, Clone)]
pub struct TestConfig {
    pub max_concurrency: usize,
    pub queue_capacity: usize,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            queue_capacity: 0,
        }
    }
}

impl TestFixture {
    /// Create a new test fixture with default settings.
    pub fn new() -> Self {
        Self::with_config(TestConfig::default())
    }

    pub fn with_config(test_config: TestConfig) -> Self {
        let config = load_config_from_str(&format!(
            r#"
[server]
host = "127.0.0.1"
port = 8080

[catalog]
url = "http://catalog.test/api/v3/"

[service_user]
username = "ingestor"
password = "service-password"

[transfer]
client_id = "client"
client_secret = "transfer-secret"

[pool]
max_concurrency = {}
queue_capacity = {}
poll_interval_secs = 1

[facilities]
PSI = "collection-psi"
ETH = "collection-eth"

[templates]
source_group = "{{facility}}-source"
destination_group = "{{facility}}-destination"
destination_path = "/{{username}}/{{pid_short}}"
"#,
            test_config.max_concurrency, test_config.queue_capacity
        ))
        .expect("valid test config");

        let catalog = Arc::new(MockCatalog::new());
        catalog.add_dataset(fixtures::dataset(DATASET_PID, "group-a", "/data/raw/abc"));
        catalog.add_user(
            ALICE_KEY,
            "alice",
            &["group-a", "PSI-source", "ETH-destination"],
        );
        catalog.add_user(BOB_KEY, "bob", &[]);

        let transfer = Arc::new(MockTransferService::new());
        let context = worker_context(catalog.clone(), transfer.clone());

        // Poll fast so jobs settle within a test.
        let pool_config = PoolConfig {
            poll_interval: Duration::from_millis(10),
            ..PoolConfig::from(&config.pool)
        };
        let pool = JobPool::new(pool_config, context.clone());

        let orchestrator = Arc::new(TransferOrchestrator::new(
            OrchestratorConfig::from_config(&config).expect("valid templates"),
            catalog.clone(),
            transfer.clone(),
            context.credentials.clone(),
            context.registry.clone(),
            pool.clone(),
        ));

        let state = Arc::new(AppState::new(config, catalog.clone(), orchestrator));
        let router = create_router(state);

        Self {
            router,
            catalog,
            transfer,
            pool,
        }
    }

    /// Send a GET request without credentials.
    pub async fn get(&self, uri: &str) -> TestResponse {
        self.request("GET", uri, None, None).await
    }

    /// POST a JSON body as the caller owning `api_key`.
    pub async fn post_as(&self, api_key: &str, uri: &str, body: Option<Value>) -> TestResponse {
        self.request("POST", uri, Some(api_key), body).await
    }

    /// Send a DELETE request as the caller owning `api_key`.
    pub async fn delete_as(&self, api_key: &str, uri: &str) -> TestResponse {
        self.request("DELETE", uri, Some(api_key), None).await
    }

    /// Request a transfer of the default dataset from PSI to ETH.
    pub async fn request_transfer(&self, api_key: &str, body: Option<Value>) -> TestResponse {
        let uri = format!(
            "/api/v1/transfer?scicat_pid={}&source_facility=PSI&dest_facility=ETH",
            urlencode(DATASET_PID)
        );
        self.post_as(api_key, &uri, body).await
    }

    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        api_key: Option<&str>,
        body: Option<Value>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(key) = api_key {
            builder = builder.header("SciCat-API-Key", key);
        }
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        TestResponse { status, body, text }
    }

    /// Wait until the pool has no outstanding jobs.
    pub async fn wait_until_idle(&self) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let status = self.pool.status();
                if status.active == 0 && status.queued == 0 {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("pool did not drain in time");
    }
}

fn urlencode(value: &str) -> String {
    value.replace('/', "%2F")
}
