//! Transport abstraction for bundlesync.
//!
//! This module provides a trait-based interface for retrieving bytes from an
//! origin (HTTP server, local directory, in-memory fixture) and, on top of
//! it, the two remote halves of a sync run: fetching the manifest and
//! fetching the bodies of changed resources.
//!
//! # Design Principles
//! - Transport isolation: no transport-specific logic in the pipeline
//! - Async operations: all I/O operations are async
//! - Single attempt: retries are the caller's policy, never this layer's

pub mod fetcher;
pub mod http;
pub mod local;
pub mod memory;
pub mod registry;
pub mod source;
pub mod transport;

pub use fetcher::ResourceFetcher;
pub use http::HttpTransport;
pub use local::LocalTransport;
pub use memory::MemoryTransport;
pub use registry::{create_default_registry, open_origin, Origin, TransportFactory, TransportRegistry};
pub use source::ManifestSource;
pub use transport::{fetch_with_timeout, resolve_location, Transport};
