//! Job id -> cancellation signal map.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::credentials::CredentialCache;

use super::RegistryError;

/// Lets callers interrupt in-flight workers.
///
/// The map lock is never held across an `.await`; signalling a token does
/// not block.
pub struct CancellationRegistry {
    tokens: Mutex<HashMap<String, CancellationToken>>,
    catalog: Arc<dyn Catalog>,
    credentials: Arc<CredentialCache>,
}

impl CancellationRegistry {
    pub fn new(catalog: Arc<dyn Catalog>, credentials: Arc<CredentialCache>) -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            catalog,
            credentials,
        }
    }

    fn tokens(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        // Every critical section is a single map operation, so a poisoned map is still consistent.
        self.tokens.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a job and return the token its worker watches.
    pub fn register(&self, job_id: &str) -> Result<CancellationToken, RegistryError> {
        let mut tokens = self.tokens();
        if tokens.contains_key(job_id) {
            return Err(RegistryError::AlreadyRegistered(job_id.to_string()));
        }
        let token = CancellationToken::new();
        tokens.insert(job_id.to_string(), token.clone());
        Ok(token)
    }

    /// Signal a job's worker and forget the handle.
    pub fn cancel(&self, job_id: &str) -> Result<(), RegistryError> {
        let token = self
            .tokens()
            .remove(job_id)
            .ok_or_else(|| RegistryError::NotFound(job_id.to_string()))?;
        token.cancel();
        info!(job_id = %job_id, "Cancellation requested");
        Ok(())
    }

    /// Cancel the job if it is running, then delete its catalog record.
    ///
    /// Returns whether a running worker was signalled. The record is
    /// deleted even when no worker was found.
    pub async fn delete(&self, job_id: &str) -> Result<bool, RegistryError> {
        let signalled = match self.cancel(job_id) {
            Ok(()) => true,
            Err(RegistryError::NotFound(_)) => {
                warn!(job_id = %job_id, "No active worker for job, deleting record only");
                false
            }
            Err(e) => return Err(e),
        };

        let token = self.credentials.get_token().await?;
        self.catalog.delete_job(&token, job_id).await?;
        info!(job_id = %job_id, "Job record deleted");
        Ok(signalled)
    }

    /// Drop a handle without signalling it.
    pub fn remove(&self, job_id: &str) -> bool {
        self.tokens().remove(job_id).is_some()
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.tokens().contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.tokens().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockCatalog;

    fn registry() -> (Arc<MockCatalog>, CancellationRegistry) {
        let catalog = Arc::new(MockCatalog::new());
        let credentials = Arc::new(CredentialCache::new(catalog.clone(), "svc", "pw"));
        let registry = CancellationRegistry::new(catalog.clone(), credentials);
        (catalog, registry)
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let (_, registry) = registry();
        registry.register("job-1").unwrap();
        assert!(matches!(
            registry.register("job-1"),
            Err(RegistryError::AlreadyRegistered(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_cancel_signals_and_removes() {
        let (_, registry) = registry();
        let token = registry.register("job-1").unwrap();
        assert!(!token.is_cancelled());

        registry.cancel("job-1").unwrap();
        assert!(token.is_cancelled());
        assert!(!registry.contains("job-1"));
    }

    #[test]
    fn test_cancel_unknown_is_not_found() {
        let (_, registry) = registry();
        assert!(matches!(
            registry.cancel("missing"),
            Err(RegistryError::NotFound(_))
        ));

        registry.register("job-1").unwrap();
        registry.cancel("job-1").unwrap();
        assert!(matches!(
            registry.cancel("job-1"),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn test_remove_does_not_signal() {
        let (_, registry) = registry();
        let token = registry.register("job-1").unwrap();
        assert!(registry.remove("job-1"));
        assert!(!token.is_cancelled());
        assert!(!registry.remove("job-1"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_delete_cancels_and_deletes_record() {
        let (catalog, registry) = registry();
        let token = registry.register("job-1").unwrap();

        let signalled = registry.delete("job-1").await.unwrap();
        assert!(signalled);
        assert!(token.is_cancelled());
        assert_eq!(catalog.deleted_jobs(), vec!["job-1".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_without_worker_still_deletes() {
        let (catalog, registry) = registry();
        let signalled = registry.delete("job-9").await.unwrap();
        assert!(!signalled);
        assert_eq!(catalog.deleted_jobs(), vec!["job-9".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_reports_credential_failure() {
        let (catalog, registry) = registry();
        catalog.fail_logins(true);
        let result = registry.delete("job-1").await;
        assert!(matches!(result, Err(RegistryError::Credential(_))));
        assert!(catalog.deleted_jobs().is_empty());
    }
}
