//! Connection lifecycle driven by authentication state.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info};
use uuid::Uuid;

use syncbridge_common::{Result, UserId};

use crate::config::SyncConfig;
use crate::connector::{http_connector_factory, BackendConnector, ConnectorFactory};
use crate::engine::SyncEngine;
use crate::identity::IdentityProvider;

/// Authentication state change published by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(UserId),
    SignedOut,
}

impl From<Option<UserId>> for AuthEvent {
    fn from(user: Option<UserId>) -> Self {
        match user {
            Some(user) => AuthEvent::SignedIn(user),
            None => AuthEvent::SignedOut,
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    LoggedOut,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::LoggedOut => write!(f, "logged out"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// The live connection: who it belongs to and the connector serving it.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    user: UserId,
    connector: Arc<dyn BackendConnector>,
    active: Arc<AtomicBool>,
    connected_at: DateTime<Utc>,
}

impl ConnectionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn connector(&self) -> Arc<dyn BackendConnector> {
        self.connector.clone()
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// False once the connection was torn down.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn teardown(&self) {
        self.active.store(false, Ordering::Release);
        debug!("Connection {} for {} torn down", self.id, self.user);
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("user", &self.user)
            .field("active", &self.is_active())
            .field("connected_at", &self.connected_at)
            .finish()
    }
}

/// Connects and disconnects the sync engine as users sign in and out.
///
/// At most one connection is live. Transitions are serialized: each one
/// holds the connection slot until the engine call returns.
pub struct ConnectionSupervisor {
    engine: Arc<dyn SyncEngine>,
    identity: Arc<dyn IdentityProvider>,
    config: SyncConfig,
    factory: ConnectorFactory,
    connection: Mutex<Option<ConnectionHandle>>,
}

impl ConnectionSupervisor {
    /// Create a supervisor building HTTP connectors from `config`.
    pub fn new(
        engine: Arc<dyn SyncEngine>,
        identity: Arc<dyn IdentityProvider>,
        config: SyncConfig,
    ) -> Self {
        Self::with_factory(engine, identity, config, http_connector_factory())
    }

    /// Create a supervisor with a custom connector factory.
    pub fn with_factory(
        engine: Arc<dyn SyncEngine>,
        identity: Arc<dyn IdentityProvider>,
        config: SyncConfig,
        factory: ConnectorFactory,
    ) -> Self {
        Self {
            engine,
            identity,
            config,
            factory,
            connection: Mutex::new(None),
        }
    }

    /// Initialize the engine and connect if someone is already signed in.
    ///
    /// # Errors
    /// - Engine initialization or connect failed
    /// - The connector could not be built
    pub async fn start(&self) -> Result<ConnectionState> {
        self.engine.initialize().await?;

        match self.identity.current_user().await {
            Some(user) => self.connect(user).await?,
            None => info!("No user signed in, staying logged out"),
        }

        Ok(self.state().await)
    }

    /// Apply one authentication event.
    ///
    /// Every sign-in event reconnects, even for the same user.
    pub async fn handle_event(&self, event: AuthEvent) -> Result<ConnectionState> {
        match event {
            AuthEvent::SignedIn(user) => self.connect(user).await?,
            AuthEvent::SignedOut => self.disconnect().await?,
        }

        Ok(self.state().await)
    }

    /// Consume authentication events in order until the sender closes.
    ///
    /// Failed transitions are logged; later events are still applied.
    pub async fn run(&self, mut events: mpsc::Receiver<AuthEvent>) {
        info!("Connection supervisor listening for auth events");

        while let Some(event) = events.recv().await {
            debug!("Auth event: {:?}", event);
            if let Err(e) = self.handle_event(event).await {
                error!("Failed to apply auth event: {}", e);
            }
        }

        info!("Auth event stream closed");
    }

    /// Sign the user out and wipe local data.
    ///
    /// # Errors
    /// - The identity provider or the engine failed
    pub async fn sign_out(&self) -> Result<()> {
        self.identity.sign_out().await?;

        let mut connection = self.connection.lock().await;
        if let Some(handle) = connection.take() {
            handle.teardown();
        }
        self.engine.disconnect_and_clear().await?;

        info!("Signed out, local data cleared");
        Ok(())
    }

    pub async fn state(&self) -> ConnectionState {
        if self.connection.lock().await.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::LoggedOut
        }
    }

    /// User of the live connection.
    pub async fn current_user(&self) -> Option<UserId> {
        self.connection
            .lock()
            .await
            .as_ref()
            .map(|handle| handle.user.clone())
    }

    /// The live connection, if any.
    pub async fn connection(&self) -> Option<ConnectionHandle> {
        self.connection.lock().await.clone()
    }

    async fn connect(&self, user: UserId) -> Result<()> {
        let mut connection = self.connection.lock().await;
        if let Some(old) = connection.take() {
            old.teardown();
        }

        let active = Arc::new(AtomicBool::new(true));
        let connector = match (self.factory)(self.identity.clone(), &self.config, active.clone())
        {
            Ok(connector) => connector,
            Err(e) => {
                active.store(false, Ordering::Release);
                self.reset_engine().await;
                return Err(e);
            }
        };

        if let Err(e) = self.engine.connect(connector.clone()).await {
            active.store(false, Ordering::Release);
            self.reset_engine().await;
            return Err(e);
        }

        let handle = ConnectionHandle {
            id: Uuid::new_v4(),
            user,
            connector,
            active,
            connected_at: Utc::now(),
        };
        info!("Connected {} (connection {})", handle.user, handle.id);
        *connection = Some(handle);
        Ok(())
    }

    /// Leave the engine disconnected after a connect attempt failed part way.
    async fn reset_engine(&self) {
        if let Err(e) = self.engine.disconnect().await {
            error!("Failed to disconnect after a failed connect: {}", e);
        }
    }

    async fn disconnect(&self) -> Result<()> {
        let mut connection = self.connection.lock().await;
        if let Some(handle) = connection.take() {
            handle.teardown();
        }
        self.engine.disconnect().await?;

        info!("Disconnected, local data kept");
        Ok(())
    }
}
