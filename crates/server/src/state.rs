use std::sync::Arc;

use ferry_core::{Catalog, Config, JobPool, SanitizedConfig, TransferOrchestrator};

/// Shared application state
pub struct AppState {
    config: Config,
    catalog: Arc<dyn Catalog>,
    orchestrator: Arc<TransferOrchestrator>,
}

impl AppState {
    pub fn new(
        config: Config,
        catalog: Arc<dyn Catalog>,
        orchestrator: Arc<TransferOrchestrator>,
    ) -> Self {
        Self {
            config,
            catalog,
            orchestrator,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    /// Catalog used to resolve caller identities.
    pub fn catalog(&self) -> &dyn Catalog {
        self.catalog.as_ref()
    }

    pub fn orchestrator(&self) -> &TransferOrchestrator {
        &self.orchestrator
    }

    pub fn pool(&self) -> &JobPool {
        self.orchestrator.pool()
    }
}
