//! Upload scheduling: periodic and on-demand.

use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use syncbridge_common::{Error, Result};

/// Upload request types.
#[derive(Debug)]
pub enum UploadRequest {
    /// Drain the queue now.
    Upload,
    /// Stop the scheduler.
    Shutdown,
}

type RequestMessage = (UploadRequest, Option<oneshot::Sender<Result<()>>>);

/// Client side of the upload scheduler.
#[derive(Clone)]
pub struct UploadScheduler {
    request_tx: mpsc::Sender<RequestMessage>,
}

impl UploadScheduler {
    /// Create a scheduler uploading every `period` and on request.
    pub fn new(period: Duration) -> (Self, UploadSchedulerHandle) {
        let (request_tx, request_rx) = mpsc::channel(16);

        (
            Self { request_tx },
            UploadSchedulerHandle { period, request_rx },
        )
    }

    /// Request an upload and wait for its result.
    ///
    /// # Errors
    /// - The scheduler is not running
    /// - The upload itself failed
    pub async fn request_upload(&self) -> Result<()> {
        let (response_tx, response_rx) = oneshot::channel();

        self.request_tx
            .send((UploadRequest::Upload, Some(response_tx)))
            .await
            .map_err(|_| Error::Engine("Upload scheduler not running".to_string()))?;

        response_rx
            .await
            .map_err(|_| Error::Engine("Upload scheduler dropped the request".to_string()))?
    }

    /// Ask for an upload without waiting.
    ///
    /// Dropped when a request is already queued.
    pub fn notify(&self) {
        if self.request_tx.try_send((UploadRequest::Upload, None)).is_err() {
            debug!("Upload already pending, notification dropped");
        }
    }

    /// Stop the scheduler after the current upload.
    pub async fn shutdown(&self) {
        let _ = self
            .request_tx
            .send((UploadRequest::Shutdown, None))
            .await;
    }
}

/// The scheduler's background task.
pub struct UploadSchedulerHandle {
    period: Duration,
    request_rx: mpsc::Receiver<RequestMessage>,
}

impl UploadSchedulerHandle {
    /// Run the scheduler until shutdown or until every [`UploadScheduler`]
    /// is dropped.
    ///
    /// Uploads run one at a time. This should be spawned in a tokio task.
    pub async fn run<F, Fut>(mut self, upload_fn: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send,
    {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Upload scheduler started ({:?} interval)", self.period);

        loop {
            tokio::select! {
                request = self.request_rx.recv() => {
                    match request {
                        Some((UploadRequest::Upload, response_tx)) => {
                            let result = upload_fn().await;
                            if let Err(e) = &result {
                                error!("Upload failed: {}", e);
                            }
                            if let Some(response_tx) = response_tx {
                                let _ = response_tx.send(result);
                            }
                        }
                        Some((UploadRequest::Shutdown, _)) => {
                            info!("Upload scheduler shutting down");
                            break;
                        }
                        None => {
                            debug!("All scheduler clients dropped");
                            break;
                        }
                    }
                }

                _ = ticker.tick() => {
                    debug!("Triggering periodic upload");
                    if let Err(e) = upload_fn().await {
                        error!("Periodic upload failed: {}", e);
                    }
                }
            }
        }
    }
}
