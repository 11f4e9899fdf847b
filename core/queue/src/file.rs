//! File-backed mutation queue.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use syncbridge_common::{Error, Result, TransactionId};

use crate::mutation::MutationOp;
use crate::queue::{CompletionHandle, MutationQueue, PendingTransaction};
use crate::state::QueueState;

/// Mutation queue persisted as a JSON document.
///
/// Every change rewrites the whole document through a temporary file and a
/// rename, so a crash leaves either the old or the new queue on disk.
#[derive(Clone)]
pub struct FileQueue {
    path: PathBuf,
    state: Arc<Mutex<QueueState>>,
}

impl FileQueue {
    /// Open the queue at `path`, creating an empty one if it does not exist.
    ///
    /// # Errors
    /// - The file exists but is not a valid queue document
    /// - I/O errors
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let state = if fs::try_exists(&path).await? {
            let content = fs::read_to_string(&path).await?;
            serde_json::from_str(&content).map_err(|e| {
                Error::Queue(format!("Corrupt queue file {}: {}", path.display(), e))
            })?
        } else {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent).await?;
                }
            }
            QueueState::new()
        };

        let queue = Self {
            path,
            state: Arc::new(Mutex::new(state)),
        };
        info!(
            "Opened queue {} with {} pending transactions",
            queue.path.display(),
            queue.len().await
        );
        Ok(queue)
    }

    /// Path of the queue document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a local transaction and persist it.
    pub async fn enqueue(&self, ops: Vec<MutationOp>) -> Result<TransactionId> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let id = next.push(ops);
        self.persist(&next).await?;
        *state = next;
        debug!("Queued transaction {}", id);
        Ok(id)
    }

    /// Number of transactions not yet completed.
    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    /// Check if no transactions are pending.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Write `state` to disk. Callers update memory only after this succeeds.
    async fn persist(&self, state: &QueueState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl MutationQueue for FileQueue {
    fn name(&self) -> &str {
        "file"
    }

    async fn next_pending_transaction(&self) -> Result<Option<PendingTransaction>> {
        let state = self.state.lock().await;
        Ok(state.front().map(|tx| {
            PendingTransaction::new(tx.id, tx.ops.clone(), Arc::new(self.clone()))
        }))
    }

    async fn clear(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let count = next.clear();
        self.persist(&next).await?;
        *state = next;
        info!("Cleared {} pending transactions from {}", count, self.path.display());
        Ok(count)
    }
}

#[async_trait]
impl CompletionHandle for FileQueue {
    async fn complete(&self, id: TransactionId) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        if next.remove(id) {
            self.persist(&next).await?;
            *state = next;
            debug!("Completed transaction {}", id);
        }
        Ok(())
    }
}
