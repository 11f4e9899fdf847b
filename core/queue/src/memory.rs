//! In-memory mutation queue.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use syncbridge_common::{Result, TransactionId};

use crate::mutation::MutationOp;
use crate::queue::{CompletionHandle, MutationQueue, PendingTransaction};
use crate::state::QueueState;

/// In-memory mutation queue.
///
/// Useful for testing and for hosts that keep their own durable log. All
/// data is lost on drop. Clones share the same queue.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    state: Arc<Mutex<QueueState>>,
}

impl MemoryQueue {
    /// Create a new empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a local transaction.
    pub async fn enqueue(&self, ops: Vec<MutationOp>) -> TransactionId {
        let id = self.state.lock().await.push(ops);
        debug!("Queued transaction {}", id);
        id
    }

    /// Number of transactions not yet completed.
    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    /// Check if no transactions are pending.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl MutationQueue for MemoryQueue {
    fn name(&self) -> &str {
        "memory"
    }

    async fn next_pending_transaction(&self) -> Result<Option<PendingTransaction>> {
        let state = self.state.lock().await;
        Ok(state.front().map(|tx| {
            PendingTransaction::new(tx.id, tx.ops.clone(), Arc::new(self.clone()))
        }))
    }

    async fn clear(&self) -> Result<usize> {
        Ok(self.state.lock().await.clear())
    }
}

#[async_trait]
impl CompletionHandle for MemoryQueue {
    async fn complete(&self, id: TransactionId) -> Result<()> {
        if self.state.lock().await.remove(id) {
            debug!("Completed transaction {}", id);
        } else {
            debug!("Transaction {} already completed", id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_empty_queue_has_no_transaction() {
        let queue = MemoryQueue::new();
        assert!(queue.next_pending_transaction().await.unwrap().is_none());
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_transactions_are_fifo() {
        let queue = MemoryQueue::new();
        let first = queue
            .enqueue(vec![MutationOp::put("todos", "r1", json!({"title": "a"}))])
            .await;
        let second = queue.enqueue(vec![MutationOp::delete("todos", "r1")]).await;
        assert!(first < second);

        let tx = queue.next_pending_transaction().await.unwrap().unwrap();
        assert_eq!(tx.id(), first);
        assert_eq!(tx.len(), 1);

        tx.complete().await.unwrap();

        let tx = queue.next_pending_transaction().await.unwrap().unwrap();
        assert_eq!(tx.id(), second);
    }

    #[tokio::test]
    async fn test_transaction_stays_until_completed() {
        let queue = MemoryQueue::new();
        let id = queue.enqueue(vec![MutationOp::delete("todos", "r1")]).await;

        let a = queue.next_pending_transaction().await.unwrap().unwrap();
        let b = queue.next_pending_transaction().await.unwrap().unwrap();
        assert_eq!(a.id(), id);
        assert_eq!(b.id(), id);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_complete_twice_is_harmless() {
        let queue = MemoryQueue::new();
        queue.enqueue(vec![MutationOp::delete("todos", "r1")]).await;
        let keep = queue.enqueue(vec![MutationOp::delete("todos", "r2")]).await;

        let tx = queue.next_pending_transaction().await.unwrap().unwrap();
        tx.complete().await.unwrap();
        tx.complete().await.unwrap();

        assert_eq!(queue.len().await, 1);
        let next = queue.next_pending_transaction().await.unwrap().unwrap();
        assert_eq!(next.id(), keep);
    }

    #[tokio::test]
    async fn test_clear() {
        let queue = MemoryQueue::new();
        queue.enqueue(vec![]).await;
        queue.enqueue(vec![]).await;

        assert_eq!(queue.clear().await.unwrap(), 2);
        assert!(queue.is_empty().await);
    }
}
