use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub service_user: ServiceUserConfig,
    pub transfer: TransferConfig,
    #[serde(default)]
    pub pool: PoolSettings,
    /// Facility name -> transfer-service collection id
    #[serde(default)]
    pub facilities: BTreeMap<String, String>,
    #[serde(default)]
    pub templates: TemplateConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

/// Job catalog configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogConfig {
    /// Catalog base URL (e.g., "https://catalog.example.org/")
    pub url: String,
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
}

/// Service identity used to act against the catalog.
/// Normally supplied through `FERRY_SERVICE_USER__USERNAME` / `__PASSWORD`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServiceUserConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Transfer service configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransferConfig {
    /// Transfer API base URL
    #[serde(default = "default_transfer_url")]
    pub base_url: String,
    /// OAuth2 token endpoint for the client-credentials grant
    #[serde(default = "default_transfer_auth_url")]
    pub auth_url: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_transfer_scopes")]
    pub scopes: Vec<String>,
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
}

fn default_transfer_url() -> String {
    "https://transfer.api.globusonline.org/v0.10".to_string()
}

fn default_transfer_auth_url() -> String {
    "https://auth.globus.org/v2/oauth2/token".to_string()
}

fn default_transfer_scopes() -> Vec<String> {
    vec!["urn:globus:auth:scope:transfer.api.globus.org:all".to_string()]
}

fn default_timeout() -> u32 {
    30
}

/// Job pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolSettings {
    /// Maximum number of transfers tracked at the same time
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Maximum number of outstanding jobs (0 = unbounded)
    #[serde(default)]
    pub queue_capacity: usize,
    /// Seconds between two status polls of one transfer
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            queue_capacity: 0,
            poll_interval_secs: default_poll_interval(),
        }
    }
}

fn default_max_concurrency() -> usize {
    10
}

fn default_poll_interval() -> u64 {
    30
}

/// Templates for required access groups and destination paths.
///
/// Group templates accept `{facility}`; the destination template accepts
/// `{dataset_folder}`, `{source_folder}`, `{pid}`, `{pid_short}`,
/// `{pid_prefix}`, `{pid_encoded}` and `{username}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TemplateConfig {
    #[serde(default = "default_source_group")]
    pub source_group: String,
    #[serde(default = "default_destination_group")]
    pub destination_group: String,
    #[serde(default = "default_destination_path")]
    pub destination_path: String,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            source_group: default_source_group(),
            destination_group: default_destination_group(),
            destination_path: default_destination_path(),
        }
    }
}

fn default_source_group() -> String {
    "{facility}-source".to_string()
}

fn default_destination_group() -> String {
    "{facility}-destination".to_string()
}

fn default_destination_path() -> String {
    "/{username}/{pid_short}/{dataset_folder}".to_string()
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub catalog: CatalogConfig,
    pub service_user: SanitizedServiceUser,
    pub transfer: SanitizedTransferConfig,
    pub pool: PoolSettings,
    pub facilities: Vec<String>,
    pub templates: TemplateConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedServiceUser {
    pub username: String,
    pub password_configured: bool,
}

/// Sanitized transfer config (client secret hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedTransferConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret_configured: bool,
    pub scopes: Vec<String>,
    pub timeout_secs: u32,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            catalog: config.catalog.clone(),
            service_user: SanitizedServiceUser {
                username: config.service_user.username.clone(),
                password_configured: !config.service_user.password.is_empty(),
            },
            transfer: SanitizedTransferConfig {
                base_url: config.transfer.base_url.clone(),
                client_id: config.transfer.client_id.clone(),
                client_secret_configured: !config.transfer.client_secret.is_empty(),
                scopes: config.transfer.scopes.clone(),
                timeout_secs: config.transfer.timeout_secs,
            },
            pool: config.pool.clone(),
            facilities: config.facilities.keys().cloned().collect(),
            templates: config.templates.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[catalog]
url = "http://catalog.local/"

[transfer]
client_id = "client"
"#;

    #[test]
    fn test_deserialize_minimal_config() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host.to_string(), "0.0.0.0");
        assert_eq!(config.catalog.url, "http://catalog.local/");
        assert_eq!(config.catalog.timeout_secs, 30);
        assert_eq!(config.pool.max_concurrency, 10);
        assert_eq!(config.pool.queue_capacity, 0);
        assert_eq!(config.pool.poll_interval_secs, 30);
        assert!(config.facilities.is_empty());
        assert_eq!(config.templates.source_group, "{facility}-source");
    }

    #[test]
    fn test_deserialize_missing_catalog_fails() {
        let toml = r#"
[transfer]
client_id = "client"
"#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_facilities_and_pool() {
        let toml = r#"
[catalog]
url = "http://catalog.local/"

[transfer]
client_id = "client"

[pool]
max_concurrency = 2
queue_capacity = 5
poll_interval_secs = 10

[facilities]
PSI = "collection-psi"
ETH = "collection-eth"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.pool.max_concurrency, 2);
        assert_eq!(config.pool.queue_capacity, 5);
        assert_eq!(config.pool.poll_interval_secs, 10);
        assert_eq!(config.facilities.get("PSI").unwrap(), "collection-psi");
        assert_eq!(config.facilities.len(), 2);
    }

    #[test]
    fn test_sanitized_config_hides_secrets() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.service_user.username = "ingestor".to_string();
        config.service_user.password = "hunter2".to_string();
        config.transfer.client_secret = "secret".to_string();
        config
            .facilities
            .insert("PSI".to_string(), "collection-psi".to_string());

        let sanitized = SanitizedConfig::from(&config);
        assert_eq!(sanitized.service_user.username, "ingestor");
        assert!(sanitized.service_user.password_configured);
        assert!(sanitized.transfer.client_secret_configured);
        assert_eq!(sanitized.facilities, vec!["PSI".to_string()]);

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(!json.contains("\"secret\""));
    }
}
