pub mod catalog;
pub mod config;
pub mod credentials;
pub mod jobs;
pub mod metrics;
pub mod orchestrator;
pub mod template;
pub mod testing;
pub mod transfer;

pub use catalog::{
    create_transfer_job, CallerIdentity, Catalog, CatalogError, CatalogJob, HttpCatalogClient,
    JobFilter, JobResultObject, JobStatus, JobStatusCode,
};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use credentials::{CredentialCache, CredentialError};
pub use jobs::{
    CancellationRegistry, JobDescriptor, JobHandle, JobOutcome, JobPool, PoolConfig, PoolError,
    PoolStatus, RecoveryError, RecoveryLoader, RecoveryReport, RegistryError, TransferJobWorker,
    WorkerContext,
};
pub use orchestrator::{
    JobControlError, OrchestratorConfig, RequestError, TransferOrchestrator, TransferRequestBody,
    TransferRequestParams,
};
pub use template::TemplateError;
pub use transfer::{
    HttpTransferClient, StartTransferRequest, TransferError, TransferFile, TransferService,
    TransferState, TransferStatus,
};
