//! Queue contents shared by the in-memory and file-backed queues.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use syncbridge_common::TransactionId;

use crate::mutation::MutationOp;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredTransaction {
    pub id: TransactionId,
    pub ops: Vec<MutationOp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct QueueState {
    next_id: TransactionId,
    pending: VecDeque<StoredTransaction>,
}

impl QueueState {
    pub fn new() -> Self {
        Self {
            next_id: TransactionId::new(1),
            pending: VecDeque::new(),
        }
    }

    pub fn push(&mut self, ops: Vec<MutationOp>) -> TransactionId {
        let id = self.next_id;
        self.next_id = id.next();
        self.pending.push_back(StoredTransaction { id, ops });
        id
    }

    pub fn front(&self) -> Option<&StoredTransaction> {
        self.pending.front()
    }

    /// Returns false when the id was not queued.
    pub fn remove(&mut self, id: TransactionId) -> bool {
        match self.pending.iter().position(|tx| tx.id == id) {
            Some(index) => {
                self.pending.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

impl Default for QueueState {
    fn default() -> Self {
        Self::new()
    }
}
