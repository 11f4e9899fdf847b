//! Local mutation queue abstraction for SyncBridge.
//!
//! The embedded database records every local write as a row-level
//! [`MutationOp`] and groups the writes of one local commit into a
//! [`PendingTransaction`]. The upload side only ever sees the queue through
//! the [`MutationQueue`] trait:
//! - read the oldest pending transaction
//! - mark it complete once it has been handled
//!
//! [`MemoryQueue`] and [`FileQueue`] are self-contained implementations used
//! by tests and by the command line tool.

pub mod file;
pub mod memory;
pub mod mutation;
pub mod queue;

mod state;

pub use file::FileQueue;
pub use memory::MemoryQueue;
pub use mutation::{MutationOp, OpKind};
pub use queue::{CompletionHandle, MutationQueue, PendingTransaction};
