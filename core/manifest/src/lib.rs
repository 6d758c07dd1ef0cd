//! Manifest model for bundlesync.
//!
//! This module provides:
//! - The `Manifest` / `ResourceDescriptor` data model and its JSON wire format
//! - `FetchedResource`, a descriptor paired with its downloaded body
//! - Change detection between a stored and an incoming manifest
//! - A builder that generates a manifest from a directory of assets

pub mod builder;
pub mod diff;
pub mod manifest;

pub use builder::{content_hash, ManifestBuilder};
pub use diff::{compute_changed, ManifestDiff};
pub use manifest::{FetchedResource, Manifest, ResourceDescriptor};
