//! Service-identity credential cache.
//!
//! One `CredentialCache` exists per service identity and is shared through
//! an `Arc`. The token and its expiry live behind a single async mutex that
//! is held across the refresh, so concurrent callers wait for the one
//! in-flight login instead of starting their own.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, CatalogError};
use crate::metrics::TOKEN_REFRESHES;

#[derive(Debug, Clone, Error)]
pub enum CredentialError {
    #[error("Service login failed: {0}")]
    RefreshFailed(#[from] CatalogError),

    #[error("Catalog issued a token that is already expired (expiry {0})")]
    AlreadyExpired(DateTime<Utc>),

    #[error("Catalog issued a token with an out-of-range lifetime ({0}s)")]
    InvalidLifetime(i64),
}

/// Bearer token plus its absolute expiry.
#[derive(Debug)]
struct Credential {
    token: String,
    expires_at: DateTime<Utc>,
}

impl Credential {
    fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

pub struct CredentialCache {
    catalog: Arc<dyn Catalog>,
    username: String,
    password: String,
    credential: Mutex<Option<Credential>>,
}

impl CredentialCache {
    /// Create an empty cache; the first `get_token` logs in.
    pub fn new(
        catalog: Arc<dyn Catalog>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            username: username.into(),
            password: password.into(),
            credential: Mutex::new(None),
        }
    }

    /// Create a cache and log in immediately, failing on a bad account.
    pub async fn login(
        catalog: Arc<dyn Catalog>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, CredentialError> {
        let cache = Self::new(catalog, username, password);
        {
            let mut slot = cache.credential.lock().await;
            *slot = Some(cache.refresh().await?);
        }
        info!(username = %cache.username, "Service identity logged in");
        Ok(cache)
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Return a token that is valid at the instant of return.
    pub async fn get_token(&self) -> Result<String, CredentialError> {
        let mut slot = self.credential.lock().await;

        if let Some(credential) = slot.as_ref() {
            if credential.is_valid_at(Utc::now()) {
                return Ok(credential.token.clone());
            }
            debug!(expired_at = %credential.expires_at, "Service token expired, refreshing");
        }

        // A failed refresh leaves the stale credential in place.
        let fresh = self.refresh().await?;
        let token = fresh.token.clone();
        *slot = Some(fresh);
        Ok(token)
    }

    /// Expiry of the cached token, if one has been obtained.
    pub async fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.credential.lock().await.as_ref().map(|c| c.expires_at)
    }

    async fn refresh(&self) -> Result<Credential, CredentialError> {
        let session = match self
            .catalog
            .authenticate(&self.username, &self.password)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                TOKEN_REFRESHES.with_label_values(&["error"]).inc();
                warn!(username = %self.username, error = %e, "Service token refresh failed");
                return Err(e.into());
            }
        };

        let Some(expires_at) = session.expires_at() else {
            TOKEN_REFRESHES.with_label_values(&["error"]).inc();
            warn!(
                username = %self.username,
                expires_in = session.expires_in_secs,
                "Catalog token lifetime out of range"
            );
            return Err(CredentialError::InvalidLifetime(session.expires_in_secs));
        };
        let credential = Credential {
            expires_at,
            token: session.token,
        };
        if !credential.is_valid_at(Utc::now()) {
            TOKEN_REFRESHES.with_label_values(&["error"]).inc();
            return Err(CredentialError::AlreadyExpired(credential.expires_at));
        }

        TOKEN_REFRESHES.with_label_values(&["success"]).inc();
        debug!(expires_at = %credential.expires_at, "Service token refreshed");
        Ok(credential)
    }
}

impl std::fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCache")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockCatalog;
    use std::time::Duration;

    #[tokio::test]
    async fn test_first_call_logs_in() {
        let catalog = Arc::new(MockCatalog::new());
        let cache = CredentialCache::new(catalog.clone(), "svc", "pw");
        assert_eq!(catalog.login_count(), 0);

        let token = cache.get_token().await.unwrap();
        assert_eq!(token, "token-1");
        assert_eq!(catalog.login_count(), 1);
    }

    #[tokio::test]
    async fn test_valid_token_is_reused() {
        let catalog = Arc::new(MockCatalog::new());
        let cache = CredentialCache::new(catalog.clone(), "svc", "pw");

        for _ in 0..5 {
            assert_eq!(cache.get_token().await.unwrap(), "token-1");
        }
        assert_eq!(catalog.login_count(), 1);
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed() {
        let catalog = Arc::new(MockCatalog::new());
        catalog.set_token_lifetime(1);
        let cache = CredentialCache::new(catalog.clone(), "svc", "pw");

        assert_eq!(cache.get_token().await.unwrap(), "token-1");
        tokio::time::sleep(Duration::from_millis(1100)).await;

        let token = cache.get_token().await.unwrap();
        assert_eq!(token, "token-2");
        assert_eq!(catalog.login_count(), 2);
        assert!(cache.expires_at().await.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_stale_credential() {
        let catalog = Arc::new(MockCatalog::new());
        catalog.set_token_lifetime(1);
        let cache = CredentialCache::new(catalog.clone(), "svc", "pw");
        cache.get_token().await.unwrap();
        let stale_expiry = cache.expires_at().await;

        tokio::time::sleep(Duration::from_millis(1100)).await;
        catalog.fail_logins(true);
        let result = cache.get_token().await;
        assert!(matches!(result, Err(CredentialError::RefreshFailed(_))));
        assert_eq!(cache.expires_at().await, stale_expiry);

        catalog.fail_logins(false);
        assert_eq!(cache.get_token().await.unwrap(), "token-2");
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let catalog = Arc::new(MockCatalog::new());
        catalog.set_login_delay(Duration::from_millis(50));
        let cache = Arc::new(CredentialCache::new(catalog.clone(), "svc", "pw"));

        let tokens = futures::future::join_all((0..10).map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_token().await })
        }))
        .await;
        for token in tokens {
            assert_eq!(token.unwrap().unwrap(), "token-1");
        }
        assert_eq!(catalog.login_count(), 1);
    }

    #[tokio::test]
    async fn test_login_fails_on_bad_account() {
        let catalog = Arc::new(MockCatalog::new());
        catalog.fail_logins(true);
        let result = CredentialCache::login(catalog, "svc", "wrong").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_already_expired_token_rejected() {
        let catalog = Arc::new(MockCatalog::new());
        catalog.set_token_lifetime(0);
        let cache = CredentialCache::new(catalog, "svc", "pw");
        assert!(matches!(
            cache.get_token().await,
            Err(CredentialError::AlreadyExpired(_))
        ));
    }

    #[tokio::test]
    async fn test_out_of_range_lifetime_rejected() {
        let catalog = Arc::new(MockCatalog::new());
        catalog.set_token_lifetime(i64::MAX);
        let cache = CredentialCache::new(catalog, "svc", "pw");
        assert!(matches!(
            cache.get_token().await,
            Err(CredentialError::InvalidLifetime(i64::MAX))
        ));
        assert_eq!(cache.expires_at().await, None);
    }
}
