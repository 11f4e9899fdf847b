//! Common utilities and types shared across SyncBridge crates.
//!
//! This module provides the error type used at every crate boundary and the
//! identifier newtypes that flow between the queue, the connector and the
//! connection supervisor.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{TransactionId, UserId};
