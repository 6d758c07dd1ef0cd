//! In-memory transport for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bundlesync_common::{Error, Result};

use crate::transport::Transport;

#[derive(Default)]
struct Inner {
    objects: HashMap<String, Vec<u8>>,
    failing: HashSet<String>,
    fetched: Vec<String>,
    delay: Option<Duration>,
}

/// In-memory transport.
///
/// Useful for testing and demos. Locations are plain string keys. Fetches
/// can be made to fail or to stall, and every fetch is recorded so tests can
/// assert on what a sync actually downloaded.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Mutex<Inner>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MemoryTransport {
    /// Create a new empty memory transport.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish bytes at a location, replacing any previous body.
    pub fn insert(&self, location: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.lock().objects.insert(location.into(), data.into());
    }

    /// Make every fetch of `location` fail with a network error.
    pub fn fail(&self, location: impl Into<String>) {
        self.lock().failing.insert(location.into());
    }

    /// Stop failing fetches of `location`.
    pub fn heal(&self, location: &str) {
        self.lock().failing.remove(location);
    }

    /// Delay every fetch by `delay`.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.lock().delay = delay;
    }

    /// Number of fetches attempted so far.
    pub fn fetch_count(&self) -> usize {
        self.lock().fetched.len()
    }

    /// Locations fetched so far, in call order.
    pub fn fetched(&self) -> Vec<String> {
        self.lock().fetched.clone()
    }

    /// Forget recorded fetches.
    pub fn reset_log(&self) {
        self.lock().fetched.clear();
        self.max_in_flight.store(0, Ordering::SeqCst);
    }

    /// Highest number of fetches observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch(&self, location: &str) -> Result<Vec<u8>> {
        let delay = {
            let mut inner = self.lock();
            inner.fetched.push(location.to_string());
            inner.delay
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        match delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }

        let inner = self.lock();
        if inner.failing.contains(location) {
            return Err(Error::Network(format!("Injected failure: {}", location)));
        }
        inner
            .objects
            .get(location)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("No object at {}", location)))
    }
}
