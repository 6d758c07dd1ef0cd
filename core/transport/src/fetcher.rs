//! Retrieval of resource bodies for a set of changed descriptors.

use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use bundlesync_common::{Error, FetchStage, Result};
use bundlesync_manifest::{FetchedResource, ResourceDescriptor};

use crate::transport::{fetch_with_timeout, resolve_location, Transport};

/// Default number of concurrent resource requests.
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Fetches resource bodies with bounded concurrency.
///
/// The result is all-or-nothing: the first failure (in input order) aborts
/// the outstanding requests and is returned alone.
pub struct ResourceFetcher {
    transport: Arc<dyn Transport>,
    max_concurrent: usize,
    timeout: Option<Duration>,
}

impl ResourceFetcher {
    /// Create a fetcher over a transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            timeout: None,
        }
    }

    /// Set the maximum number of requests in flight (at least 1).
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Bound each request with a deadline.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fetch the body of every descriptor.
    ///
    /// Resource locations are resolved relative to `manifest_location`. The
    /// output corresponds one-to-one, in order, to `descriptors`.
    ///
    /// # Errors
    /// - `Error::Fetch` with stage `Resource` naming the first path that
    ///   failed; no partial result is returned
    pub async fn fetch_all(
        &self,
        manifest_location: &str,
        descriptors: Vec<ResourceDescriptor>,
    ) -> Result<Vec<FetchedResource>> {
        if descriptors.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "Fetching {} resources ({} at a time)",
            descriptors.len(),
            self.max_concurrent
        );

        stream::iter(
            descriptors
                .into_iter()
                .map(|descriptor| self.fetch_one(manifest_location, descriptor)),
        )
        .buffered(self.max_concurrent)
        .try_collect()
        .await
    }

    async fn fetch_one(
        &self,
        manifest_location: &str,
        descriptor: ResourceDescriptor,
    ) -> Result<FetchedResource> {
        let path = descriptor.path.as_str();
        let location = resolve_location(manifest_location, &descriptor.path)
            .map_err(|e| Error::fetch(FetchStage::Resource, Some(path), e))?;

        let content = fetch_with_timeout(self.transport.as_ref(), &location, self.timeout)
            .await
            .map_err(|e| Error::fetch(FetchStage::Resource, Some(path), e))?;

        debug!("Fetched {} ({} bytes)", path, content.len());
        Ok(FetchedResource::new(descriptor, content))
    }
}
