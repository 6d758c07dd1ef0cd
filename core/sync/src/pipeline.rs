//! The sync pipeline: fetch manifests, diff, fetch changed resources, commit.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use bundlesync_common::{Error, ResourcePath, Result};
use bundlesync_manifest::{compute_changed, ManifestDiff};
use bundlesync_store::{ManifestStore, ResourceStore, SyncStore};
use bundlesync_transport::{ManifestSource, ResourceFetcher, Transport};

use crate::config::SyncConfig;
use crate::state::{FailureReason, PhaseTracker, SyncPhase};

/// Outcome of a successful sync run.
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// Identifier of the run, also attached to its log span.
    pub run_id: Uuid,
    /// Name of the committed manifest.
    pub manifest_name: Option<String>,
    /// Version of the committed manifest.
    pub manifest_version: Option<String>,
    /// Number of resources the committed manifest lists.
    pub resource_count: usize,
    /// Whether no manifest was stored before this run.
    pub first_install: bool,
    /// Paths downloaded and upserted, in manifest order.
    pub fetched: Vec<ResourcePath>,
    /// Paths new in this manifest.
    pub added: usize,
    /// Paths whose hash changed.
    pub modified: usize,
    /// Paths left as they were.
    pub unchanged: usize,
    /// Paths the previous manifest listed and this one does not.
    pub removed: usize,
    /// Total size of downloaded bodies.
    pub bytes_fetched: u64,
    /// Wall time of the run.
    pub duration: Duration,
}

impl SyncReport {
    /// Whether this run downloaded nothing.
    pub fn is_noop(&self) -> bool {
        self.fetched.is_empty()
    }
}

/// Race a stage against cancellation.
async fn cancellable<T>(
    cancel: &CancellationToken,
    stage: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = stage => result,
    }
}

/// Orchestrates one sync run at a time over a transport and a store.
///
/// Callers must not run the same pipeline concurrently; `SyncEngine`
/// serializes access.
pub struct SyncPipeline {
    source: ManifestSource,
    fetcher: ResourceFetcher,
    store: Arc<dyn SyncStore>,
    phase: PhaseTracker,
}

impl SyncPipeline {
    /// Create a pipeline.
    pub fn new(transport: Arc<dyn Transport>, store: Arc<dyn SyncStore>, config: &SyncConfig) -> Self {
        let source = ManifestSource::new(transport.clone()).with_timeout(config.fetch_timeout());
        let fetcher = ResourceFetcher::new(transport)
            .with_max_concurrent(config.max_concurrent_fetches)
            .with_timeout(config.fetch_timeout());

        Self {
            source,
            fetcher,
            store,
            phase: PhaseTracker::new(),
        }
    }

    /// Observe phase changes.
    pub fn subscribe(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    /// Current phase.
    pub fn phase(&self) -> SyncPhase {
        self.phase.current()
    }

    /// The store this pipeline commits to.
    pub fn store(&self) -> &Arc<dyn SyncStore> {
        &self.store
    }

    /// The source this pipeline reads manifests from.
    pub fn source(&self) -> &ManifestSource {
        &self.source
    }

    /// Execute one sync run against the manifest at `location`.
    ///
    /// Ends in `Complete` with a report, or in `Failed` with the error of
    /// the first stage that failed. Nothing is written unless the run
    /// reaches the commit, and the commit itself is atomic.
    pub async fn run(&self, location: &str, cancel: &CancellationToken) -> Result<SyncReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync", %run_id);

        async move {
            self.phase.reset();
            info!("Starting sync from {}", location);

            let result = self.execute(run_id, location, cancel).await;
            match &result {
                Ok(report) => {
                    self.phase.advance(SyncPhase::Complete);
                    info!(
                        "Sync completed in {:?}: {} fetched ({} bytes), {} unchanged, {} removed",
                        report.duration,
                        report.fetched.len(),
                        report.bytes_fetched,
                        report.unchanged,
                        report.removed
                    );
                }
                Err(err) => {
                    self.phase.advance(SyncPhase::Failed(FailureReason::from(err)));
                    error!("Sync failed: {}", err);
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        run_id: Uuid,
        location: &str,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let start = Instant::now();

        self.phase.advance(SyncPhase::FetchingManifests);
        let (incoming, current) = cancellable(cancel, async {
            tokio::try_join!(self.source.fetch(location), self.store.load_current())
        })
        .await?;

        self.phase.advance(SyncPhase::Diffing);
        let diff = ManifestDiff::between(current.as_ref(), &incoming);
        let changed = compute_changed(current.as_ref(), &incoming);
        debug!(
            "{} added, {} modified, {} unchanged, {} removed",
            diff.added.len(),
            diff.modified.len(),
            diff.unchanged.len(),
            diff.removed.len()
        );

        self.phase.advance(SyncPhase::FetchingResources);
        let fetched = cancellable(cancel, self.fetcher.fetch_all(location, changed)).await?;

        // Past this point the run either commits fully or not at all.
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        self.phase.advance(SyncPhase::Committing);
        let fetched_paths: Vec<ResourcePath> = fetched.iter().map(|r| r.path().clone()).collect();
        let bytes_fetched = fetched.iter().map(|r| r.content.len() as u64).sum();
        self.store.commit(fetched, &incoming).await?;

        Ok(SyncReport {
            run_id,
            manifest_name: incoming.name.clone(),
            manifest_version: incoming.version.clone(),
            resource_count: incoming.len(),
            first_install: current.is_none(),
            fetched: fetched_paths,
            added: diff.added.len(),
            modified: diff.modified.len(),
            unchanged: diff.unchanged.len(),
            removed: diff.removed.len(),
            bytes_fetched,
            duration: start.elapsed(),
        })
    }
}
