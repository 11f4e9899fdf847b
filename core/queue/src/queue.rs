//! Mutation queue trait definition.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use syncbridge_common::{Result, TransactionId};

use crate::mutation::MutationOp;

/// Completion side of a queue.
///
/// Completing removes a transaction from the durable queue. Implementations
/// must be idempotent: completing an id that is no longer queued succeeds
/// and has no effect.
#[async_trait]
pub trait CompletionHandle: Send + Sync {
    /// Remove the transaction from the queue.
    async fn complete(&self, id: TransactionId) -> Result<()>;
}

/// One atomic batch of local mutations awaiting upload.
///
/// The transaction stays at the head of its queue until [`complete`] is
/// called, so an upload that stops half way will see it again on the next
/// read.
///
/// [`complete`]: PendingTransaction::complete
pub struct PendingTransaction {
    id: TransactionId,
    ops: Vec<MutationOp>,
    handle: Arc<dyn CompletionHandle>,
}

impl PendingTransaction {
    /// Create a transaction backed by a completion handle.
    pub fn new(id: TransactionId, ops: Vec<MutationOp>, handle: Arc<dyn CompletionHandle>) -> Self {
        Self { id, ops, handle }
    }

    /// Transaction id.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Operations in the order they were recorded.
    pub fn ops(&self) -> &[MutationOp] {
        &self.ops
    }

    /// Number of operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Check if the transaction has no operations.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Mark the transaction complete, evicting it from the queue.
    pub async fn complete(&self) -> Result<()> {
        self.handle.complete(self.id).await
    }
}

impl fmt::Debug for PendingTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTransaction")
            .field("id", &self.id)
            .field("ops", &self.ops)
            .finish_non_exhaustive()
    }
}

/// Read side of the local mutation queue.
#[async_trait]
pub trait MutationQueue: Send + Sync {
    /// Queue name used in logs (e.g., "memory", "file").
    fn name(&self) -> &str;

    /// Get the oldest transaction that has not been completed.
    ///
    /// Repeated calls return the same transaction until it is completed.
    async fn next_pending_transaction(&self) -> Result<Option<PendingTransaction>>;

    /// Discard every pending transaction. Returns how many were dropped.
    async fn clear(&self) -> Result<usize>;
}
