//! In-memory fakes shared by the unit tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use syncbridge_common::{Error, Result, UserId};
use syncbridge_queue::{MutationQueue, OpKind};

use crate::connector::BackendConnector;
use crate::credentials::Credentials;
use crate::engine::SyncEngine;
use crate::identity::IdentityProvider;
use crate::remote::{MutationPayload, MutationTransport};

pub(crate) fn remote_error(status: u16, code: Option<&str>) -> Error {
    Error::Remote {
        status,
        code: code.map(String::from),
        message: "rejected".to_string(),
    }
}

/// Identity provider with scripted token behavior.
pub(crate) struct FakeIdentity {
    user: Mutex<Option<UserId>>,
    token_requests: AtomicUsize,
    forced_refreshes: AtomicUsize,
    sign_outs: AtomicUsize,
    delay: Option<Duration>,
    stalled: bool,
    failing: bool,
}

impl FakeIdentity {
    pub(crate) fn signed_in(user: &str) -> Self {
        let identity = Self::signed_out();
        identity.sign_in(user);
        identity
    }

    pub(crate) fn signed_out() -> Self {
        Self {
            user: Mutex::new(None),
            token_requests: AtomicUsize::new(0),
            forced_refreshes: AtomicUsize::new(0),
            sign_outs: AtomicUsize::new(0),
            delay: None,
            stalled: false,
            failing: false,
        }
    }

    pub(crate) fn failing_tokens(mut self) -> Self {
        self.failing = true;
        self
    }

    pub(crate) fn with_token_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Token requests never complete.
    pub(crate) fn with_stalled_tokens(mut self) -> Self {
        self.stalled = true;
        self
    }

    pub(crate) fn sign_in(&self, user: &str) {
        *self.user.lock().unwrap() = Some(UserId::new(user).unwrap());
    }

    pub(crate) fn token_requests(&self) -> usize {
        self.token_requests.load(Ordering::SeqCst)
    }

    pub(crate) fn forced_refreshes(&self) -> usize {
        self.forced_refreshes.load(Ordering::SeqCst)
    }

    pub(crate) fn sign_outs(&self) -> usize {
        self.sign_outs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn current_user(&self) -> Option<UserId> {
        self.user.lock().unwrap().clone()
    }

    async fn id_token(&self, force_refresh: bool) -> Result<String> {
        self.token_requests.fetch_add(1, Ordering::SeqCst);
        if force_refresh {
            self.forced_refreshes.fetch_add(1, Ordering::SeqCst);
        }

        if self.stalled {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing {
            return Err(Error::Network("identity service unreachable".to_string()));
        }
        if self.user.lock().unwrap().is_none() {
            return Err(Error::Authentication("No user is signed in".to_string()));
        }
        Ok("id-token".to_string())
    }

    async fn sign_out(&self) -> Result<()> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        *self.user.lock().unwrap() = None;
        Ok(())
    }
}

/// Transport that records every call and replays scripted results.
///
/// Once the script is exhausted every call succeeds, unless the transport
/// was built with `always_failing`.
pub(crate) struct FakeTransport {
    calls: Mutex<Vec<(OpKind, MutationPayload)>>,
    responses: Mutex<VecDeque<Result<()>>>,
    always_failing: bool,
    delay: Option<Duration>,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            responses: Mutex::new(VecDeque::new()),
            always_failing: false,
            delay: None,
        }
    }

    pub(crate) fn always_failing(mut self) -> Self {
        self.always_failing = true;
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn push_response(&self, response: Result<()>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub(crate) fn calls(&self) -> Vec<(OpKind, MutationPayload)> {
        self.calls.lock().unwrap().clone()
    }

    async fn record(&self, kind: OpKind, payload: &MutationPayload) -> Result<()> {
        self.calls.lock().unwrap().push((kind, payload.clone()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.responses.lock().unwrap().pop_front();
        match scripted {
            Some(response) => response,
            None if self.always_failing => Err(Error::Network("connection refused".to_string())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MutationTransport for FakeTransport {
    async fn upsert(&self, payload: &MutationPayload) -> Result<()> {
        self.record(OpKind::Put, payload).await
    }

    async fn patch(&self, payload: &MutationPayload) -> Result<()> {
        self.record(OpKind::Patch, payload).await
    }

    async fn delete(&self, payload: &MutationPayload) -> Result<()> {
        self.record(OpKind::Delete, payload).await
    }
}

/// Connector that counts calls instead of talking to a backend.
#[derive(Default)]
pub(crate) struct FakeConnector {
    uploads: AtomicUsize,
    fetches: AtomicUsize,
}

impl FakeConnector {
    pub(crate) fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendConnector for FakeConnector {
    async fn fetch_credentials(&self) -> Option<Credentials> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        None
    }

    fn invalidate_credentials(&self) {}

    async fn upload_data(&self, _queue: &dyn MutationQueue) -> Result<()> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EngineCall {
    Initialize,
    Connect,
    Disconnect,
    DisconnectAndClear,
}

/// Sync engine that records lifecycle calls.
#[derive(Default)]
pub(crate) struct FakeEngine {
    calls: Mutex<Vec<EngineCall>>,
    connectors: Mutex<Vec<Arc<dyn BackendConnector>>>,
    fail_connect: bool,
}

impl FakeEngine {
    pub(crate) fn failing_connect() -> Self {
        Self {
            fail_connect: true,
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn connectors(&self) -> usize {
        self.connectors.lock().unwrap().len()
    }
}

#[async_trait]
impl SyncEngine for FakeEngine {
    async fn initialize(&self) -> Result<()> {
        self.calls.lock().unwrap().push(EngineCall::Initialize);
        Ok(())
    }

    async fn connect(&self, connector: Arc<dyn BackendConnector>) -> Result<()> {
        self.calls.lock().unwrap().push(EngineCall::Connect);
        if self.fail_connect {
            return Err(Error::Engine("engine refused connection".to_string()));
        }
        self.connectors.lock().unwrap().push(connector);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.calls.lock().unwrap().push(EngineCall::Disconnect);
        Ok(())
    }

    async fn disconnect_and_clear(&self) -> Result<()> {
        self.calls.lock().unwrap().push(EngineCall::DisconnectAndClear);
        Ok(())
    }
}
