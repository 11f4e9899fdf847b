//! Upload pump: drains the local mutation queue to the backend.
//!
//! One invocation handles at most one pending transaction:
//! - operations are sent in queue order, one remote call each
//! - a retryable failure is retried in place, then the drain stops and the
//!   transaction stays queued; the pump opens a backoff window and resumes
//!   at the failed operation next time
//! - a fatal failure drops that operation, reports it, and moves on
//! - the transaction is completed only once every operation succeeded or
//!   was rejected as fatal
//!
//! The pump owns no timer. The sync engine decides when to call it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use syncbridge_common::{Error, Result, TransactionId};
use syncbridge_queue::{MutationOp, MutationQueue};

use crate::classify::{self, OpOutcome};
use crate::config::SyncConfig;
use crate::remote::{MutationPayload, MutationTransport};
use crate::retry::{RetryConfig, RetryExecutor};

/// An operation the backend refused permanently.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedOp {
    /// The operation as it was queued.
    pub op: MutationOp,
    /// HTTP status of the rejection.
    pub status: Option<u16>,
    /// Backend error code.
    pub code: Option<String>,
    /// Rejection message.
    pub message: String,
}

impl RejectedOp {
    fn new(op: &MutationOp, err: &Error) -> Self {
        Self {
            op: op.clone(),
            status: err.status(),
            code: err.remote_code().map(String::from),
            message: err.to_string(),
        }
    }
}

/// Result of one [`UploadPump::upload_pending`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum DrainOutcome {
    /// Nothing was queued.
    Idle,
    /// A previous deferral's backoff window is still open.
    BackingOff { retry_after: Duration },
    /// Every operation was handled and the transaction was completed.
    Completed {
        transaction: TransactionId,
        applied: usize,
        rejected: Vec<RejectedOp>,
    },
    /// A retryable failure stopped the drain; the transaction stays queued.
    Deferred {
        transaction: TransactionId,
        next_op: usize,
        retry_after: Duration,
    },
    /// The transaction kept failing and was dropped after too many deferrals.
    Abandoned {
        transaction: TransactionId,
        deferrals: u32,
    },
    /// The connection was torn down mid-drain; the transaction stays queued.
    Disconnected {
        transaction: TransactionId,
        next_op: usize,
    },
}

/// Where to pick up a transaction that was not finished.
#[derive(Debug, Clone, Copy)]
struct ResumePoint {
    transaction: TransactionId,
    next_op: usize,
    deferrals: u32,
}

#[derive(Debug, Default)]
struct PumpState {
    resume: Option<ResumePoint>,
    not_before: Option<Instant>,
}

impl PumpState {
    fn start_index(&self, transaction: TransactionId) -> usize {
        match self.resume {
            Some(point) if point.transaction == transaction => point.next_op,
            _ => 0,
        }
    }

    fn deferrals(&self, transaction: TransactionId) -> u32 {
        match self.resume {
            Some(point) if point.transaction == transaction => point.deferrals,
            _ => 0,
        }
    }

    /// Record a deferral and open the backoff window.
    fn defer(
        &mut self,
        transaction: TransactionId,
        next_op: usize,
        backoff: &RetryConfig,
    ) -> (u32, Duration) {
        let deferrals = self.deferrals(transaction) + 1;
        self.resume = Some(ResumePoint {
            transaction,
            next_op,
            deferrals,
        });
        let delay = backoff.delay_for_attempt(deferrals - 1);
        self.not_before = Some(Instant::now() + delay);
        (deferrals, delay)
    }

    /// Remember progress without counting a failure.
    fn pause(&mut self, transaction: TransactionId, next_op: usize) {
        let deferrals = self.deferrals(transaction);
        self.resume = Some(ResumePoint {
            transaction,
            next_op,
            deferrals,
        });
    }

    fn reset(&mut self) {
        self.resume = None;
        self.not_before = None;
    }
}

/// Drains pending transactions to a [`MutationTransport`].
pub struct UploadPump {
    transport: Arc<dyn MutationTransport>,
    retry: RetryExecutor,
    backoff: RetryConfig,
    request_timeout: Duration,
    abandon_after_deferrals: Option<u32>,
    active: Arc<AtomicBool>,
    state: Mutex<PumpState>,
}

impl UploadPump {
    /// Create a pump dispatching to `transport`.
    ///
    /// `active` is the liveness flag of the owning connection; once it is
    /// cleared the pump stops dispatching.
    pub fn new(
        transport: Arc<dyn MutationTransport>,
        config: &SyncConfig,
        active: Arc<AtomicBool>,
    ) -> Self {
        Self {
            transport,
            retry: RetryExecutor::new(config.retry_config()),
            backoff: config.deferral_backoff(),
            request_timeout: config.request_timeout(),
            abandon_after_deferrals: config.abandon_after_deferrals,
            active,
            state: Mutex::new(PumpState::default()),
        }
    }

    /// Check if the owning connection is still live.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Upload the oldest pending transaction.
    ///
    /// # Errors
    /// - The queue could not be read or updated
    /// - An operation's row data is malformed; the transaction stays queued
    pub async fn upload_pending(&self, queue: &dyn MutationQueue) -> Result<DrainOutcome> {
        let mut state = self.state.lock().await;

        if let Some(not_before) = state.not_before {
            let now = Instant::now();
            if now < not_before {
                let retry_after = not_before - now;
                debug!("Upload backing off for {:?}", retry_after);
                return Ok(DrainOutcome::BackingOff { retry_after });
            }
        }

        let Some(transaction) = queue.next_pending_transaction().await? else {
            state.reset();
            return Ok(DrainOutcome::Idle);
        };

        let tx_id = transaction.id();
        let start = state.start_index(tx_id);
        if start > 0 {
            debug!("Resuming {} at operation {}", tx_id, start);
        } else {
            debug!(
                "Uploading {} ({} operations) from {} queue",
                tx_id,
                transaction.len(),
                queue.name()
            );
        }

        let mut applied = 0;
        let mut rejected = Vec::new();

        for (index, op) in transaction.ops().iter().enumerate().skip(start) {
            if !self.is_active() {
                info!("Connection closed, stopping upload of {} at {}", tx_id, op);
                state.pause(tx_id, index);
                return Ok(DrainOutcome::Disconnected {
                    transaction: tx_id,
                    next_op: index,
                });
            }

            let payload = match MutationPayload::from_op(op) {
                Ok(payload) => payload,
                Err(e) => {
                    error!("Cannot upload {} in {}: {}", op, tx_id, e);
                    state.defer(tx_id, index, &self.backoff);
                    return Err(e);
                }
            };

            match self.dispatch(op, &payload).await {
                OpOutcome::Success => applied += 1,
                OpOutcome::Fatal(err) => {
                    error!(
                        code = err.remote_code().unwrap_or_default(),
                        "Backend rejected {} in {}, dropping it: {}", op, tx_id, err
                    );
                    rejected.push(RejectedOp::new(op, &err));
                }
                OpOutcome::Retryable(err) if !self.is_active() => {
                    info!(
                        "Connection closed while retrying {} in {}: {}",
                        op, tx_id, err
                    );
                    state.pause(tx_id, index);
                    return Ok(DrainOutcome::Disconnected {
                        transaction: tx_id,
                        next_op: index,
                    });
                }
                OpOutcome::Retryable(err) => {
                    let (deferrals, retry_after) = state.defer(tx_id, index, &self.backoff);

                    if self
                        .abandon_after_deferrals
                        .is_some_and(|limit| deferrals >= limit)
                    {
                        error!(
                            "Abandoning {} after {} failed uploads, last at {}: {}",
                            tx_id, deferrals, op, err
                        );
                        transaction.complete().await?;
                        state.reset();
                        return Ok(DrainOutcome::Abandoned {
                            transaction: tx_id,
                            deferrals,
                        });
                    }

                    warn!(
                        "Upload of {} failed at {}: {}. Retrying in {:?}",
                        tx_id, op, err, retry_after
                    );
                    return Ok(DrainOutcome::Deferred {
                        transaction: tx_id,
                        next_op: index,
                        retry_after,
                    });
                }
            }
        }

        transaction.complete().await?;
        state.reset();

        if rejected.is_empty() {
            debug!("Uploaded {} ({} operations)", tx_id, applied);
        } else {
            warn!(
                "Uploaded {} with {} rejected operations",
                tx_id,
                rejected.len()
            );
        }

        Ok(DrainOutcome::Completed {
            transaction: tx_id,
            applied,
            rejected,
        })
    }

    /// Send one operation, retrying transient failures in place.
    ///
    /// Retries stop as soon as the owning connection is torn down.
    async fn dispatch(&self, op: &MutationOp, payload: &MutationPayload) -> OpOutcome {
        let result = self
            .retry
            .execute_with_condition(
                || async {
                    if !self.is_active() {
                        return Err(Error::Engine(format!(
                            "Connection closed before sending {}",
                            op
                        )));
                    }
                    self.send(op, payload).await
                },
                |err| self.is_active() && classify::is_retryable(err),
            )
            .await;

        OpOutcome::from_result(result)
    }

    /// One remote call bounded by the request timeout.
    async fn send(&self, op: &MutationOp, payload: &MutationPayload) -> Result<()> {
        match tokio::time::timeout(self.request_timeout, self.transport.dispatch(op.kind, payload))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "{} did not finish within {:?}",
                op, self.request_timeout
            ))),
        }
    }
}
