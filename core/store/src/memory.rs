//! In-memory store for testing.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

use bundlesync_common::{Error, ResourcePath, Result, StoreStage};
use bundlesync_manifest::{FetchedResource, Manifest};

use crate::store::{ManifestStore, ResourceStore};

/// Complete contents of a memory store, comparable for equality.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemorySnapshot {
    /// Encoded manifest record.
    pub manifest: Option<Vec<u8>>,
    /// Resource records by path.
    pub resources: BTreeMap<ResourcePath, FetchedResource>,
}

/// In-memory store.
///
/// A commit is applied to a private copy of the state and swapped in as a
/// whole, so readers never see it half done. Failures can be injected
/// part-way through a commit to exercise that guarantee.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemorySnapshot>>,
    fail_after_upserts: Arc<RwLock<Option<usize>>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next commits after `upserts` resources have been written.
    pub fn fail_after_upserts(&self, upserts: Option<usize>) {
        *self
            .fail_after_upserts
            .write()
            .unwrap_or_else(PoisonError::into_inner) = upserts;
    }

    /// Replace the stored manifest record with raw bytes.
    pub fn put_raw_manifest(&self, bytes: Vec<u8>) {
        self.write().manifest = Some(bytes);
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> MemorySnapshot {
        self.read().clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemorySnapshot> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemorySnapshot> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ManifestStore for MemoryStore {
    async fn load_current(&self) -> Result<Option<Manifest>> {
        let state = self.read();
        let Some(bytes) = &state.manifest else {
            return Ok(None);
        };

        let manifest =
            Manifest::from_bytes(bytes).map_err(|e| Error::store(StoreStage::Load, e))?;

        for descriptor in &manifest.resources {
            match state.resources.get(&descriptor.path) {
                Some(stored) if stored.descriptor.content_hash == descriptor.content_hash => {}
                _ => {
                    return Err(Error::store(
                        StoreStage::Load,
                        format!("manifest references missing resource {}", descriptor.path),
                    ))
                }
            }
        }

        Ok(Some(manifest))
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn commit(&self, resources: Vec<FetchedResource>, manifest: &Manifest) -> Result<()> {
        let encoded = manifest
            .to_bytes()
            .map_err(|e| Error::store(StoreStage::Commit, e))?;
        let fail_after = *self
            .fail_after_upserts
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let mut state = self.write();
        let mut next = state.clone();

        for (written, resource) in resources.into_iter().enumerate() {
            if fail_after == Some(written) {
                return Err(Error::store(
                    StoreStage::Commit,
                    format!("injected failure after {} upserts", written),
                ));
            }
            next.resources.insert(resource.path().clone(), resource);
        }
        next.manifest = Some(encoded);

        *state = next;
        debug!("Committed {} resources to memory store", state.resources.len());
        Ok(())
    }

    async fn resource(&self, path: &ResourcePath) -> Result<Option<FetchedResource>> {
        Ok(self.read().resources.get(path).cloned())
    }

    async fn resources(&self) -> Result<Vec<FetchedResource>> {
        Ok(self.read().resources.values().cloned().collect())
    }
}
