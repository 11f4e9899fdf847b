//! Backend connector handed to the sync engine.

use async_trait::async_trait;
use reqwest::Client;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, info};

use syncbridge_common::{Error, Result};
use syncbridge_queue::MutationQueue;

use crate::config::SyncConfig;
use crate::credentials::{CredentialProvider, Credentials};
use crate::identity::IdentityProvider;
use crate::remote::{MutationTransport, RemoteMutationClient};
use crate::upload::{DrainOutcome, UploadPump};

/// What the sync engine needs from the backend.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    /// Credentials for the sync channel, or `None` when unauthenticated or
    /// the backend refused.
    async fn fetch_credentials(&self) -> Option<Credentials>;

    /// Signal that the last credentials were rejected.
    ///
    /// Must return immediately.
    fn invalidate_credentials(&self);

    /// Upload pending local mutations.
    ///
    /// # Errors
    /// - Local queue faults or malformed local data; remote failures are
    ///   handled internally
    async fn upload_data(&self, queue: &dyn MutationQueue) -> Result<()>;
}

/// Builds a connector for a new connection.
///
/// Arguments are the identity provider, the sync configuration and the
/// liveness flag of the connection the connector belongs to.
pub type ConnectorFactory = Box<
    dyn Fn(
            Arc<dyn IdentityProvider>,
            &SyncConfig,
            Arc<AtomicBool>,
        ) -> Result<Arc<dyn BackendConnector>>
        + Send
        + Sync,
>;

/// Factory producing [`SyncConnector`]s that talk HTTP to the backend.
pub fn http_connector_factory() -> ConnectorFactory {
    Box::new(
        |identity: Arc<dyn IdentityProvider>, config: &SyncConfig, active: Arc<AtomicBool>| {
            let connector: Arc<dyn BackendConnector> =
                Arc::new(SyncConnector::new(identity, config, active)?);
            Ok(connector)
        },
    )
}

/// Shared HTTP client for the backend.
///
/// # Errors
/// - The TLS backend could not be initialized
pub fn build_http_client(config: &SyncConfig) -> Result<Client> {
    Client::builder()
        .user_agent(concat!("syncbridge/", env!("CARGO_PKG_VERSION")))
        .timeout(config.request_timeout())
        .build()
        .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))
}

/// The credential provider and upload pump of one connection.
pub struct SyncConnector {
    credentials: CredentialProvider,
    pump: UploadPump,
}

impl SyncConnector {
    /// Create a connector talking to the configured backend.
    ///
    /// Upload progress starts empty: a pending transaction is uploaded from
    /// its first operation and no earlier backoff window applies.
    ///
    /// # Errors
    /// - The backend URL cannot be joined with the API paths
    /// - The HTTP client could not be built
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        config: &SyncConfig,
        active: Arc<AtomicBool>,
    ) -> Result<Self> {
        let http = build_http_client(config)?;
        let transport = Arc::new(RemoteMutationClient::new(
            http.clone(),
            config.data_url()?,
            identity.clone(),
        ));
        let credentials = CredentialProvider::new(
            identity,
            http,
            config.token_url()?,
            config.refresh_timeout(),
        );

        Ok(Self::from_parts(credentials, transport, config, active))
    }

    /// Assemble a connector around an existing transport.
    pub fn from_parts(
        credentials: CredentialProvider,
        transport: Arc<dyn MutationTransport>,
        config: &SyncConfig,
        active: Arc<AtomicBool>,
    ) -> Self {
        Self {
            credentials,
            pump: UploadPump::new(transport, config, active),
        }
    }

    pub fn credentials(&self) -> &CredentialProvider {
        &self.credentials
    }

    pub fn pump(&self) -> &UploadPump {
        &self.pump
    }
}

#[async_trait]
impl BackendConnector for SyncConnector {
    async fn fetch_credentials(&self) -> Option<Credentials> {
        self.credentials.fetch_credentials().await
    }

    fn invalidate_credentials(&self) {
        self.credentials.invalidate_credentials();
    }

    async fn upload_data(&self, queue: &dyn MutationQueue) -> Result<()> {
        match self.pump.upload_pending(queue).await? {
            DrainOutcome::Idle | DrainOutcome::BackingOff { .. } => {}
            DrainOutcome::Completed {
                transaction,
                applied,
                rejected,
            } => {
                info!(
                    "{} uploaded: {} applied, {} rejected",
                    transaction,
                    applied,
                    rejected.len()
                );
            }
            outcome => debug!("Upload stopped: {:?}", outcome),
        }
        Ok(())
    }
}
