//! Transport trait definition.

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::time::Duration;
use url::Url;

use bundlesync_common::{Error, ResourcePath, Result};

/// Transport for retrieving raw bytes from an origin.
///
/// Implementations perform exactly one attempt per call and must be safe to
/// call concurrently.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Get the transport name (e.g., "http", "local", "memory").
    fn name(&self) -> &str;

    /// Retrieve the complete body stored at `location`.
    ///
    /// # Errors
    /// - `NotFound` if nothing exists at the location
    /// - `Network`/`Io` on transport failure
    /// - `InvalidInput` if the location cannot be interpreted
    async fn fetch(&self, location: &str) -> Result<Vec<u8>>;
}

/// Characters escaped inside a URL path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Resolve a resource path against the location of its manifest.
///
/// URLs are joined per RFC 3986, so `https://cdn/x/manifest.json` + `a.js`
/// yields `https://cdn/x/a.js`. Each path component is percent-encoded
/// first, so `#`, `?` and `%` in a file name address that file. Plain
/// locations use the manifest's directory as the base.
pub fn resolve_location(manifest_location: &str, path: &ResourcePath) -> Result<String> {
    if let Ok(base) = Url::parse(manifest_location) {
        if !base.cannot_be_a_base() {
            let encoded: Vec<String> = path
                .components()
                .map(|c| utf8_percent_encode(c, SEGMENT).to_string())
                .collect();
            // "./" keeps a path like "x:y.js" from parsing as a scheme.
            return base
                .join(&format!("./{}", encoded.join("/")))
                .map(String::from)
                .map_err(|e| Error::InvalidInput(format!("Cannot resolve {}: {}", path, e)));
        }
    }

    match manifest_location.rfind('/') {
        Some(idx) => Ok(format!("{}/{}", &manifest_location[..idx], path)),
        None => Ok(path.to_string()),
    }
}

/// Fetch with an optional deadline.
pub async fn fetch_with_timeout(
    transport: &dyn Transport,
    location: &str,
    timeout: Option<Duration>,
) -> Result<Vec<u8>> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, transport.fetch(location))
            .await
            .map_err(|_| Error::Network(format!("Timed out after {:?}: {}", limit, location)))?,
        None => transport.fetch(location).await,
    }
}
