//! SyncBridge sync connector
//!
//! This crate connects a local-first sync engine to the SyncBridge backend:
//! - Credential fetching with coalesced, time-bounded refresh
//! - Upload of queued mutations with per-operation failure classification
//! - Retry strategy with exponential backoff
//! - Connect/disconnect lifecycle driven by authentication events
//! - A local engine that uploads on a schedule

pub mod classify;
pub mod config;
pub mod connector;
pub mod credentials;
pub mod engine;
pub mod identity;
pub mod remote;
pub mod retry;
pub mod scheduler;
pub mod supervisor;
pub mod upload;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types
pub use classify::{is_fatal, is_fatal_code, is_retryable, OpOutcome, FATAL_RESPONSE_CODES};
pub use config::SyncConfig;
pub use connector::{
    build_http_client, http_connector_factory, BackendConnector, ConnectorFactory, SyncConnector,
};
pub use credentials::{CredentialProvider, Credentials, RefreshGuard};
pub use engine::{LocalEngine, SyncEngine};
pub use identity::{IdentityProvider, StaticIdentity};
pub use remote::{MutationPayload, MutationTransport, RemoteMutationClient};
pub use retry::{RetryConfig, RetryExecutor};
pub use scheduler::{UploadRequest, UploadScheduler, UploadSchedulerHandle};
pub use supervisor::{AuthEvent, ConnectionHandle, ConnectionState, ConnectionSupervisor};
pub use upload::{DrainOutcome, RejectedOp, UploadPump};
