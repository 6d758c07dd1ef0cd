//! Retrieval of the authoritative remote manifest.

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use bundlesync_common::{Error, FetchStage, Result};
use bundlesync_manifest::Manifest;

use crate::transport::{fetch_with_timeout, Transport};

/// Fetches and decodes the remote manifest.
pub struct ManifestSource {
    transport: Arc<dyn Transport>,
    timeout: Option<Duration>,
}

impl ManifestSource {
    /// Create a manifest source over a transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            timeout: None,
        }
    }

    /// Bound the request with a deadline.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fetch the manifest published at `location`.
    ///
    /// Performs a single request. Transport failures and payloads that do not
    /// decode into a valid manifest are both reported as a manifest-stage
    /// `Error::Fetch`.
    pub async fn fetch(&self, location: &str) -> Result<Manifest> {
        let bytes = fetch_with_timeout(self.transport.as_ref(), location, self.timeout)
            .await
            .map_err(|e| Error::fetch(FetchStage::Manifest, None, e))?;

        let manifest = Manifest::from_bytes(&bytes)
            .map_err(|e| Error::fetch(FetchStage::Manifest, None, e))?;

        debug!(
            "Fetched manifest from {} ({} resources, {} bytes)",
            location,
            manifest.len(),
            bytes.len()
        );
        Ok(manifest)
    }
}
