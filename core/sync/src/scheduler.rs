//! Sync scheduling: on request, and optionally at a fixed interval.

use std::future::Future;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use bundlesync_common::{Error, Result};

use crate::config::SyncMode;
use crate::pipeline::SyncReport;

/// Scheduler requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRequest {
    /// Run one sync.
    Sync,
    /// Stop the scheduler.
    Shutdown,
}

type Reply = oneshot::Sender<Result<SyncReport>>;

/// Front end of the scheduler, used to request syncs and change its mode.
#[derive(Clone)]
pub struct SyncScheduler {
    mode: watch::Sender<SyncMode>,
    request_tx: mpsc::Sender<(SyncRequest, Option<Reply>)>,
    shutdown: CancellationToken,
}

impl SyncScheduler {
    /// Create a new scheduler with the given mode.
    ///
    /// Nothing runs until [`SyncSchedulerHandle::run`] is driven.
    pub fn new(mode: SyncMode) -> (Self, SyncSchedulerHandle) {
        let (request_tx, request_rx) = mpsc::channel(16);
        let (mode_tx, mode_rx) = watch::channel(mode);
        let shutdown = CancellationToken::new();

        let scheduler = Self {
            mode: mode_tx,
            request_tx,
            shutdown: shutdown.clone(),
        };
        let handle = SyncSchedulerHandle {
            mode: mode_rx,
            request_rx,
            shutdown,
        };

        (scheduler, handle)
    }

    /// Request a sync and wait for its outcome.
    ///
    /// Requests queue behind any sync already running.
    ///
    /// # Errors
    /// - `Error::Cancelled` if the scheduler stopped before answering
    /// - Whatever the sync itself failed with
    pub async fn request_sync(&self) -> Result<SyncReport> {
        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send((SyncRequest::Sync, Some(response_tx)))
            .await
            .map_err(|_| Error::Cancelled)?;

        response_rx.await.map_err(|_| Error::Cancelled)?
    }

    /// Change the sync mode. Takes effect immediately.
    pub fn set_mode(&self, mode: SyncMode) {
        self.mode.send_replace(mode);
    }

    /// Current sync mode.
    pub fn mode(&self) -> SyncMode {
        self.mode.borrow().clone()
    }

    /// Stop the scheduler, cancelling a sync in flight.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let _ = self.request_tx.send((SyncRequest::Shutdown, None)).await;
    }
}

/// Back end of the scheduler, driving syncs one at a time.
pub struct SyncSchedulerHandle {
    mode: watch::Receiver<SyncMode>,
    request_rx: mpsc::Receiver<(SyncRequest, Option<Reply>)>,
    shutdown: CancellationToken,
}

impl SyncSchedulerHandle {
    /// Run the scheduler loop until shutdown.
    ///
    /// This should be spawned in a tokio task. `sync_fn` is called whenever
    /// a sync is due, with a token that fires on shutdown.
    pub async fn run<F, Fut>(mut self, sync_fn: F)
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<SyncReport>> + Send,
    {
        let mut ticker = periodic_interval(&self.mode.borrow_and_update());
        info!("Sync scheduler started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                request = self.request_rx.recv() => {
                    let Some((request, reply)) = request else {
                        debug!("All scheduler senders dropped");
                        break;
                    };
                    if request == SyncRequest::Shutdown {
                        break;
                    }

                    debug!("Processing sync request");
                    let result = sync_fn(self.shutdown.child_token()).await;
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                }

                changed = self.mode.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let mode = self.mode.borrow_and_update().clone();
                    info!("Sync mode changed to {:?}", mode);
                    ticker = periodic_interval(&mode);
                }

                _ = tick(&mut ticker) => {
                    debug!("Triggering periodic sync");
                    match sync_fn(self.shutdown.child_token()).await {
                        Ok(report) => info!(
                            "Periodic sync completed: {} fetched, {} unchanged",
                            report.fetched.len(),
                            report.unchanged
                        ),
                        Err(e) => error!("Periodic sync failed: {}", e),
                    }
                }
            }
        }

        info!("Sync scheduler stopped");
    }
}

fn periodic_interval(mode: &SyncMode) -> Option<Interval> {
    mode.interval().map(|period| {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    })
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
