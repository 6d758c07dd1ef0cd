//! Store trait definitions.

use async_trait::async_trait;

use bundlesync_common::{ResourcePath, Result};
use bundlesync_manifest::{FetchedResource, Manifest};

/// Read access to the manifest committed by the last successful sync.
#[async_trait]
pub trait ManifestStore: Send + Sync {
    /// Load the current manifest.
    ///
    /// # Returns
    /// - `Ok(None)` if no manifest has ever been committed (first run)
    /// - `Ok(Some(_))` with the most recently committed manifest
    ///
    /// # Errors
    /// - `Error::Store` with stage `Load` if the stored record is corrupt or
    ///   references resources that are not stored
    async fn load_current(&self) -> Result<Option<Manifest>>;
}

/// Durable resource storage.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Upsert `resources` by path and make `manifest` current, atomically.
    ///
    /// # Postconditions
    /// - Every resource row is fully replaced, never merged
    /// - The next `load_current` returns `manifest`
    ///
    /// # Errors
    /// - `Error::Store` with stage `Commit`; nothing was written
    async fn commit(&self, resources: Vec<FetchedResource>, manifest: &Manifest) -> Result<()>;

    /// Get a stored resource by path.
    async fn resource(&self, path: &ResourcePath) -> Result<Option<FetchedResource>>;

    /// All stored resources, sorted by path.
    async fn resources(&self) -> Result<Vec<FetchedResource>>;
}

/// A store usable by the sync pipeline.
pub trait SyncStore: ManifestStore + ResourceStore {}

impl<T: ManifestStore + ResourceStore + ?Sized> SyncStore for T {}
