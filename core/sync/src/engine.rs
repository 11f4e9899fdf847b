//! Sync engine seam and a local engine driving uploads on a schedule.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use syncbridge_common::{Error, Result};
use syncbridge_queue::MutationQueue;

use crate::connector::BackendConnector;
use crate::scheduler::UploadScheduler;

/// The local sync engine the connection supervisor drives.
#[async_trait]
pub trait SyncEngine: Send + Sync {
    /// Prepare local storage. Called once before the first connect.
    async fn initialize(&self) -> Result<()>;

    /// Start syncing through `connector`, replacing any previous one.
    async fn connect(&self, connector: Arc<dyn BackendConnector>) -> Result<()>;

    /// Stop syncing. Local data is kept.
    async fn disconnect(&self) -> Result<()>;

    /// Stop syncing and wipe local data.
    async fn disconnect_and_clear(&self) -> Result<()>;
}

struct Session {
    scheduler: UploadScheduler,
    task: JoinHandle<()>,
}

/// Engine that uploads a local [`MutationQueue`] on a fixed interval.
///
/// Hosts without their own replication engine use this to get the upload
/// cadence: every interval, plus whenever [`LocalEngine::notify`] is called.
pub struct LocalEngine {
    queue: Arc<dyn MutationQueue>,
    period: Duration,
    initialized: AtomicBool,
    session: Mutex<Option<Session>>,
}

impl LocalEngine {
    /// Create an engine uploading `queue` every `period`.
    pub fn new(queue: Arc<dyn MutationQueue>, period: Duration) -> Self {
        Self {
            queue,
            period,
            initialized: AtomicBool::new(false),
            session: Mutex::new(None),
        }
    }

    /// Check if a connector is attached.
    pub async fn is_connected(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Trigger an upload without waiting for the interval.
    pub async fn notify(&self) {
        if let Some(session) = self.session.lock().await.as_ref() {
            session.scheduler.notify();
        }
    }

    /// Upload now and wait for the result.
    ///
    /// # Errors
    /// - Not connected
    /// - The upload hit a local fault
    pub async fn upload_now(&self) -> Result<()> {
        let scheduler = self
            .session
            .lock()
            .await
            .as_ref()
            .map(|session| session.scheduler.clone())
            .ok_or_else(|| Error::Engine("Not connected".to_string()))?;

        scheduler.request_upload().await
    }

    async fn stop_session(&self) {
        let Some(session) = self.session.lock().await.take() else {
            return;
        };

        session.scheduler.shutdown().await;
        if let Err(e) = session.task.await {
            warn!("Upload task ended abnormally: {}", e);
        }
        debug!("Upload session stopped");
    }
}

#[async_trait]
impl SyncEngine for LocalEngine {
    async fn initialize(&self) -> Result<()> {
        if !self.initialized.swap(true, Ordering::AcqRel) {
            info!("Sync engine initialized over {} queue", self.queue.name());
        }
        Ok(())
    }

    async fn connect(&self, connector: Arc<dyn BackendConnector>) -> Result<()> {
        if !self.initialized.load(Ordering::Acquire) {
            return Err(Error::Engine("Engine is not initialized".to_string()));
        }

        self.stop_session().await;

        match connector.fetch_credentials().await {
            Some(credentials) => info!("Sync channel endpoint: {}", credentials.endpoint),
            None => warn!("No sync credentials available, uploading only"),
        }

        let (scheduler, handle) = UploadScheduler::new(self.period);
        let queue = self.queue.clone();
        let task = tokio::spawn(handle.run(move || {
            let connector = connector.clone();
            let queue = queue.clone();
            async move { connector.upload_data(queue.as_ref()).await }
        }));

        *self.session.lock().await = Some(Session { scheduler, task });
        info!("Sync engine connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.stop_session().await;
        info!("Sync engine disconnected");
        Ok(())
    }

    async fn disconnect_and_clear(&self) -> Result<()> {
        self.stop_session().await;
        let cleared = self.queue.clear().await?;
        info!(
            "Sync engine disconnected, {} pending transactions discarded",
            cleared
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeConnector;
    use syncbridge_queue::{MemoryQueue, MutationOp};

    fn engine_with(queue: &MemoryQueue) -> LocalEngine {
        LocalEngine::new(Arc::new(queue.clone()), Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_connect_requires_initialize() {
        let engine = engine_with(&MemoryQueue::new());
        let result = engine.connect(Arc::new(FakeConnector::default())).await;
        assert!(matches!(result, Err(Error::Engine(_))));
    }

    #[tokio::test]
    async fn test_connect_fetches_credentials_and_uploads() {
        let engine = engine_with(&MemoryQueue::new());
        let connector = Arc::new(FakeConnector::default());

        engine.initialize().await.unwrap();
        engine.connect(connector.clone()).await.unwrap();
        assert!(engine.is_connected().await);
        assert_eq!(connector.fetches(), 1);

        engine.upload_now().await.unwrap();
        assert!(connector.uploads() >= 1);

        engine.disconnect().await.unwrap();
        assert!(!engine.is_connected().await);
    }

    #[tokio::test]
    async fn test_reconnect_replaces_connector() {
        let engine = engine_with(&MemoryQueue::new());
        let first = Arc::new(FakeConnector::default());
        let second = Arc::new(FakeConnector::default());

        engine.initialize().await.unwrap();
        engine.connect(first.clone()).await.unwrap();
        engine.connect(second.clone()).await.unwrap();

        let before = first.uploads();
        engine.upload_now().await.unwrap();
        assert_eq!(first.uploads(), before);
        assert!(second.uploads() >= 1);
    }

    #[tokio::test]
    async fn test_disconnect_keeps_queue() {
        let queue = MemoryQueue::new();
        queue.enqueue(vec![MutationOp::delete("todos", "r1")]).await;
        let engine = engine_with(&queue);

        engine.initialize().await.unwrap();
        engine.connect(Arc::new(FakeConnector::default())).await.unwrap();
        engine.disconnect().await.unwrap();

        assert_eq!(queue.len().await, 1);
        assert!(matches!(engine.upload_now().await, Err(Error::Engine(_))));
    }

    #[tokio::test]
    async fn test_disconnect_and_clear_discards_queue() {
        let queue = MemoryQueue::new();
        queue.enqueue(vec![MutationOp::delete("todos", "r1")]).await;
        let engine = engine_with(&queue);

        engine.initialize().await.unwrap();
        engine.connect(Arc::new(FakeConnector::default())).await.unwrap();
        engine.disconnect_and_clear().await.unwrap();

        assert!(queue.is_empty().await);
        assert!(!engine.is_connected().await);
    }
}
