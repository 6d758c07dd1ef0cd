//! Sync engine: the caller-facing entry point.

use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use bundlesync_common::{Error, ResourcePath, Result};
use bundlesync_manifest::{FetchedResource, Manifest, ManifestDiff};
use bundlesync_store::{ManifestStore, ResourceStore, SyncStore};
use bundlesync_transport::Transport;

use crate::config::SyncConfig;
use crate::pipeline::{SyncPipeline, SyncReport};
use crate::retry::{RetryConfig, RetryExecutor};
use crate::state::SyncPhase;

/// Keeps a local store in sync with remote manifests.
///
/// Runs against the same engine are serialized, so at most one sync is in
/// flight against its store at any time.
pub struct SyncEngine {
    pipeline: SyncPipeline,
    config: SyncConfig,
    retry_executor: RetryExecutor,
    run_lock: Mutex<()>,
}

impl SyncEngine {
    /// Create a new sync engine.
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn SyncStore>,
        config: SyncConfig,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            "Creating sync engine over {} transport (max {} concurrent fetches)",
            transport.name(),
            config.max_concurrent_fetches
        );

        Ok(Self {
            pipeline: SyncPipeline::new(transport, store, &config),
            retry_executor: RetryExecutor::new(RetryConfig::from_sync_config(&config)),
            config,
            run_lock: Mutex::new(()),
        })
    }

    /// Engine configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Observe phase changes of the runs this engine executes.
    pub fn subscribe(&self) -> watch::Receiver<SyncPhase> {
        self.pipeline.subscribe()
    }

    /// Phase of the current or most recent run.
    pub fn phase(&self) -> SyncPhase {
        self.pipeline.phase()
    }

    /// Run one sync against the manifest at `location`.
    pub async fn run(&self, location: &str, cancel: &CancellationToken) -> Result<SyncReport> {
        let _guard = self.run_lock.lock().await;
        self.pipeline.run(location, cancel).await
    }

    /// Run one sync, re-running it from scratch after transient failures.
    ///
    /// Cancellation ends the retry loop, including while waiting out a
    /// backoff delay.
    pub async fn run_with_retry(
        &self,
        location: &str,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        self.retry_executor
            .execute_cancellable(cancel, || self.run(location, cancel))
            .await
    }

    /// Run one sync and hand its outcome to `on_complete`.
    ///
    /// `on_complete` is invoked exactly once, on success or failure.
    pub async fn sync<F>(&self, location: &str, on_complete: F)
    where
        F: FnOnce(Result<SyncReport>),
    {
        self.sync_cancellable(location, &CancellationToken::new(), on_complete)
            .await
    }

    /// Like [`SyncEngine::sync`], stoppable through `cancel`.
    pub async fn sync_cancellable<F>(&self, location: &str, cancel: &CancellationToken, on_complete: F)
    where
        F: FnOnce(Result<SyncReport>),
    {
        on_complete(self.run_with_retry(location, cancel).await);
    }

    /// Spawn a sync onto the runtime.
    ///
    /// The returned task can be cancelled and awaited.
    pub fn start(self: &Arc<Self>, location: impl Into<String>) -> SyncTask {
        let engine = self.clone();
        let location = location.into();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move { engine.run_with_retry(&location, &token).await });

        SyncTask { cancel, handle }
    }

    /// Compute what a sync would change, without fetching resources or
    /// writing anything.
    pub async fn preview(&self, location: &str) -> Result<ManifestDiff> {
        let store = self.pipeline.store();
        let (incoming, current) =
            tokio::try_join!(self.pipeline.source().fetch(location), store.load_current())?;
        let diff = ManifestDiff::between(current.as_ref(), &incoming);
        debug!("Preview of {}: {} changes", location, diff.changed_count());
        Ok(diff)
    }

    /// The manifest committed by the last successful sync.
    pub async fn current_manifest(&self) -> Result<Option<Manifest>> {
        self.pipeline.store().load_current().await
    }

    /// A stored resource.
    pub async fn resource(&self, path: &ResourcePath) -> Result<Option<FetchedResource>> {
        self.pipeline.store().resource(path).await
    }
}

/// A sync running in the background.
pub struct SyncTask {
    cancel: CancellationToken,
    handle: JoinHandle<Result<SyncReport>>,
}

impl SyncTask {
    /// Request cancellation. The run ends with [`Error::Cancelled`] unless
    /// its commit already started.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the run has ended.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the run to end.
    pub async fn join(self) -> Result<SyncReport> {
        match self.handle.await {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => Err(Error::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bundlesync_common::{FetchStage, StoreStage};
    use bundlesync_manifest::ResourceDescriptor;
    use bundlesync_store::{MemoryStore, SqliteStore};
    use bundlesync_transport::MemoryTransport;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    const ORIGIN: &str = "https://cdn.test/app/manifest.json";

    fn location(path: &str) -> String {
        format!("https://cdn.test/app/{}", path)
    }

    fn descriptor(path: &str, hash: &str) -> ResourceDescriptor {
        ResourceDescriptor::new(ResourcePath::parse(path).unwrap(), hash, "2024-01-01T00:00:00Z")
    }

    /// Publish a manifest and the listed bodies on `transport`.
    fn publish(transport: &MemoryTransport, version: &str, resources: &[(&str, &str, &str)]) -> Manifest {
        let manifest = Manifest::new(
            resources
                .iter()
                .map(|(path, hash, _)| descriptor(path, hash))
                .collect(),
        )
        .unwrap()
        .with_name("app")
        .with_version(version);

        transport.insert(ORIGIN, manifest.to_bytes().unwrap());
        for (path, _, body) in resources {
            transport.insert(location(path), body.as_bytes().to_vec());
        }
        manifest
    }

    fn engine_with(transport: &MemoryTransport, store: Arc<dyn SyncStore>, config: SyncConfig) -> SyncEngine {
        SyncEngine::new(Arc::new(transport.clone()), store, config).unwrap()
    }

    fn engine(transport: &MemoryTransport, store: &MemoryStore) -> SyncEngine {
        engine_with(transport, Arc::new(store.clone()), SyncConfig::default())
    }

    async fn body(store: &MemoryStore, path: &str) -> Vec<u8> {
        store
            .resource(&ResourcePath::parse(path).unwrap())
            .await
            .unwrap()
            .unwrap()
            .content
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SyncConfig {
            max_concurrent_fetches: 0,
            ..SyncConfig::default()
        };
        let result = SyncEngine::new(
            Arc::new(MemoryTransport::new()),
            Arc::new(MemoryStore::new()),
            config,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_first_install_fetches_everything() {
        let transport = MemoryTransport::new();
        let store = MemoryStore::new();
        let manifest = publish(&transport, "1", &[("a.js", "h1", "A"), ("b.js", "h2", "B")]);
        let engine = engine(&transport, &store);

        let report = engine.run(ORIGIN, &CancellationToken::new()).await.unwrap();

        assert!(report.first_install);
        assert_eq!(report.added, 2);
        assert_eq!(report.fetched.len(), 2);
        assert_eq!(report.bytes_fetched, 2);
        assert_eq!(report.manifest_version.as_deref(), Some("1"));
        assert_eq!(store.load_current().await.unwrap(), Some(manifest));
        assert_eq!(body(&store, "a.js").await, b"A");
        assert_eq!(body(&store, "b.js").await, b"B");
        assert_eq!(engine.phase(), SyncPhase::Complete);
    }

    #[tokio::test]
    async fn test_modified_resource_is_the_only_fetch() {
        let transport = MemoryTransport::new();
        let store = MemoryStore::new();
        let engine = engine(&transport, &store);
        publish(&transport, "1", &[("a.js", "h1", "A1"), ("b.js", "h2", "B")]);
        engine.run(ORIGIN, &CancellationToken::new()).await.unwrap();

        transport.reset_log();
        let manifest = publish(&transport, "2", &[("a.js", "h1x", "A2"), ("b.js", "h2", "B")]);
        let report = engine.run(ORIGIN, &CancellationToken::new()).await.unwrap();

        assert_eq!(transport.fetched(), vec![ORIGIN.to_string(), location("a.js")]);
        assert_eq!(report.modified, 1);
        assert_eq!(report.unchanged, 1);
        assert_eq!(body(&store, "a.js").await, b"A2");
        assert_eq!(body(&store, "b.js").await, b"B");
        assert_eq!(store.load_current().await.unwrap(), Some(manifest));
    }

    #[tokio::test]
    async fn test_identical_manifest_fetches_nothing() {
        let transport = MemoryTransport::new();
        let store = MemoryStore::new();
        let engine = engine(&transport, &store);
        publish(&transport, "1", &[("a.js", "h1", "A"), ("b.js", "h2", "B")]);
        engine.run(ORIGIN, &CancellationToken::new()).await.unwrap();
        let before = store.snapshot();

        transport.reset_log();
        let report = engine.run(ORIGIN, &CancellationToken::new()).await.unwrap();

        assert!(report.is_noop());
        assert_eq!(report.unchanged, 2);
        assert_eq!(transport.fetched(), vec![ORIGIN.to_string()]);
        assert_eq!(store.snapshot(), before);
    }

    #[tokio::test]
    async fn test_failed_resource_fetch_keeps_previous_state() {
        let transport = MemoryTransport::new();
        let store = MemoryStore::new();
        let engine = engine(&transport, &store);
        let first = publish(&transport, "1", &[("a.js", "h1", "A1"), ("b.js", "h2", "B1")]);
        engine.run(ORIGIN, &CancellationToken::new()).await.unwrap();
        let before = store.snapshot();

        publish(&transport, "2", &[("a.js", "h1x", "A2"), ("b.js", "h2x", "B2")]);
        transport.fail(location("b.js"));
        let err = engine.run(ORIGIN, &CancellationToken::new()).await.unwrap_err();

        match err {
            Error::Fetch { stage, path, .. } => {
                assert_eq!(stage, FetchStage::Resource);
                assert_eq!(path.as_deref(), Some("b.js"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.snapshot(), before);
        assert_eq!(store.load_current().await.unwrap(), Some(first));
        assert!(matches!(engine.phase(), SyncPhase::Failed(_)));
    }

    #[tokio::test]
    async fn test_manifest_fetch_failure() {
        let transport = MemoryTransport::new();
        let store = MemoryStore::new();
        let engine = engine(&transport, &store);

        let err = engine.run(ORIGIN, &CancellationToken::new()).await.unwrap_err();

        assert!(matches!(
            err,
            Error::Fetch {
                stage: FetchStage::Manifest,
                path: None,
                ..
            }
        ));
        assert_eq!(store.snapshot(), Default::default());
    }

    #[tokio::test]
    async fn test_corrupt_stored_manifest_is_store_error() {
        let transport = MemoryTransport::new();
        let store = MemoryStore::new();
        publish(&transport, "1", &[("a.js", "h1", "A")]);
        store.put_raw_manifest(b"not a manifest".to_vec());
        let engine = engine(&transport, &store);

        let err = engine.run(ORIGIN, &CancellationToken::new()).await.unwrap_err();

        assert!(matches!(
            err,
            Error::Store {
                stage: StoreStage::Load,
                ..
            }
        ));
        assert_eq!(transport.fetched(), vec![ORIGIN.to_string()]);
    }

    #[tokio::test]
    async fn test_commit_failure_is_atomic() {
        let transport = MemoryTransport::new();
        let store = MemoryStore::new();
        let engine = engine(&transport, &store);
        publish(&transport, "1", &[("a.js", "h1", "A1"), ("b.js", "h2", "B1")]);
        engine.run(ORIGIN, &CancellationToken::new()).await.unwrap();
        let before = store.snapshot();

        publish(&transport, "2", &[("a.js", "h1x", "A2"), ("b.js", "h2x", "B2")]);
        store.fail_after_upserts(Some(1));
        let err = engine.run(ORIGIN, &CancellationToken::new()).await.unwrap_err();

        assert!(matches!(
            err,
            Error::Store {
                stage: StoreStage::Commit,
                ..
            }
        ));
        assert_eq!(store.snapshot(), before);

        store.fail_after_upserts(None);
        let report = engine.run(ORIGIN, &CancellationToken::new()).await.unwrap();
        assert_eq!(report.modified, 2);
    }

    #[tokio::test]
    async fn test_metadata_only_change_is_committed() {
        let transport = MemoryTransport::new();
        let store = MemoryStore::new();
        let engine = engine(&transport, &store);
        publish(&transport, "1", &[("a.js", "h1", "A")]);
        engine.run(ORIGIN, &CancellationToken::new()).await.unwrap();

        let manifest = publish(&transport, "2", &[("a.js", "h1", "A")]);
        let report = engine.run(ORIGIN, &CancellationToken::new()).await.unwrap();

        assert!(report.is_noop());
        let stored = store.load_current().await.unwrap().unwrap();
        assert_eq!(stored.version.as_deref(), Some("2"));
        assert_eq!(stored, manifest);
    }

    #[tokio::test]
    async fn test_removed_resources_are_reported_not_deleted() {
        let transport = MemoryTransport::new();
        let store = MemoryStore::new();
        let engine = engine(&transport, &store);
        publish(&transport, "1", &[("a.js", "h1", "A"), ("old.js", "h9", "O")]);
        engine.run(ORIGIN, &CancellationToken::new()).await.unwrap();

        publish(&transport, "2", &[("a.js", "h1", "A")]);
        let report = engine.run(ORIGIN, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.removed, 1);
        assert_eq!(body(&store, "old.js").await, b"O");
        assert_eq!(store.load_current().await.unwrap().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_mid_fetch_leaves_store_untouched() {
        let transport = MemoryTransport::new();
        let store = MemoryStore::new();
        publish(&transport, "1", &[("a.js", "h1", "A"), ("b.js", "h2", "B")]);
        transport.set_delay(Some(Duration::from_millis(200)));
        let engine = Arc::new(engine(&transport, &store));
        let mut phases = engine.subscribe();

        let task = engine.start(ORIGIN);
        phases
            .wait_for(|phase| *phase == SyncPhase::FetchingResources)
            .await
            .unwrap();
        task.cancel();

        assert!(matches!(task.join().await, Err(Error::Cancelled)));
        assert_eq!(store.snapshot(), Default::default());
        assert_eq!(
            engine.phase(),
            SyncPhase::Failed(crate::state::FailureReason::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let transport = MemoryTransport::new();
        let store = MemoryStore::new();
        publish(&transport, "1", &[("a.js", "h1", "A")]);
        let engine = engine(&transport, &store);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(matches!(engine.run(ORIGIN, &cancel).await, Err(Error::Cancelled)));
        assert!(store.load_current().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_callback_invoked_exactly_once() {
        let transport = MemoryTransport::new();
        let store = MemoryStore::new();
        let engine = engine(&transport, &store);
        let calls = AtomicU32::new(0);

        engine
            .sync(ORIGIN, |result| {
                calls.fetch_add(1, Ordering::SeqCst);
                assert!(result.is_err());
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        publish(&transport, "1", &[("a.js", "h1", "A")]);
        engine
            .sync(ORIGIN, |result| {
                calls.fetch_add(1, Ordering::SeqCst);
                assert_eq!(result.unwrap().fetched.len(), 1);
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_run_with_retry_recovers_from_transient_failure() {
        let transport = MemoryTransport::new();
        let store = MemoryStore::new();
        publish(&transport, "1", &[("a.js", "h1", "A")]);
        transport.fail(location("a.js"));
        let config = SyncConfig {
            max_retries: 5,
            retry_initial_delay_ms: 20,
            ..SyncConfig::default()
        };
        let engine = Arc::new(engine_with(&transport, Arc::new(store.clone()), config));

        let task = engine.start(ORIGIN);
        tokio::time::sleep(Duration::from_millis(5)).await;
        transport.heal(&location("a.js"));

        let report = task.join().await.unwrap();
        assert_eq!(report.fetched.len(), 1);
        assert_eq!(body(&store, "a.js").await, b"A");
    }

    #[tokio::test]
    async fn test_preview_writes_nothing() {
        let transport = MemoryTransport::new();
        let store = MemoryStore::new();
        publish(&transport, "1", &[("a.js", "h1", "A"), ("b.js", "h2", "B")]);
        let engine = engine(&transport, &store);

        let diff = engine.preview(ORIGIN).await.unwrap();

        assert_eq!(diff.added.len(), 2);
        assert_eq!(transport.fetched(), vec![ORIGIN.to_string()]);
        assert!(engine.current_manifest().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_store_sync_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let db = temp.path().join("bundle.db");
        let transport = MemoryTransport::new();
        let manifest = publish(&transport, "1", &[("a.js", "h1", "A"), ("lib/b.js", "h2", "B")]);

        let store = Arc::new(SqliteStore::open(&db).unwrap());
        let engine = engine_with(&transport, store.clone(), SyncConfig::default());
        engine.run(ORIGIN, &CancellationToken::new()).await.unwrap();
        let before = store.resources().await.unwrap();

        let report = engine.run(ORIGIN, &CancellationToken::new()).await.unwrap();

        assert!(report.is_noop());
        assert_eq!(store.resources().await.unwrap(), before);
        assert_eq!(store.load_current().await.unwrap(), Some(manifest));
    }
}
