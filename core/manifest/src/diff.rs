//! Change detection between the stored and the incoming manifest.

use std::collections::{HashMap, HashSet};

use bundlesync_common::ResourcePath;

use crate::manifest::{Manifest, ResourceDescriptor};

/// Compute the descriptors of `incoming` that must be (re)fetched.
///
/// A descriptor is changed when `current` has no entry with the same path
/// or the entry's content hash differs. With no current manifest every
/// incoming descriptor is changed. Output keeps `incoming` order.
pub fn compute_changed(
    current: Option<&Manifest>,
    incoming: &Manifest,
) -> Vec<ResourceDescriptor> {
    let Some(current) = current else {
        return incoming.resources.clone();
    };

    let known: HashMap<&ResourcePath, &str> = current
        .resources
        .iter()
        .map(|r| (&r.path, r.content_hash.as_str()))
        .collect();

    incoming
        .resources
        .iter()
        .filter(|r| match known.get(&r.path) {
            Some(hash) => *hash != r.content_hash,
            None => true,
        })
        .cloned()
        .collect()
}

/// Per-path classification of an incoming manifest against the stored one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestDiff {
    /// Paths only present in the incoming manifest.
    pub added: Vec<ResourcePath>,
    /// Paths present in both with different hashes.
    pub modified: Vec<ResourcePath>,
    /// Paths present in both with equal hashes.
    pub unchanged: Vec<ResourcePath>,
    /// Paths only present in the stored manifest.
    pub removed: Vec<ResourcePath>,
}

impl ManifestDiff {
    /// Classify every path of both manifests.
    ///
    /// `added`, `modified` and `unchanged` follow incoming order; `removed`
    /// follows stored order.
    pub fn between(current: Option<&Manifest>, incoming: &Manifest) -> Self {
        let mut diff = Self::default();

        let Some(current) = current else {
            diff.added = incoming.resources.iter().map(|r| r.path.clone()).collect();
            return diff;
        };

        let known: HashMap<&ResourcePath, &str> = current
            .resources
            .iter()
            .map(|r| (&r.path, r.content_hash.as_str()))
            .collect();

        for resource in &incoming.resources {
            match known.get(&resource.path) {
                None => diff.added.push(resource.path.clone()),
                Some(hash) if *hash != resource.content_hash => {
                    diff.modified.push(resource.path.clone())
                }
                Some(_) => diff.unchanged.push(resource.path.clone()),
            }
        }

        let incoming_paths: HashSet<&ResourcePath> =
            incoming.resources.iter().map(|r| &r.path).collect();
        diff.removed = current
            .resources
            .iter()
            .filter(|r| !incoming_paths.contains(&r.path))
            .map(|r| r.path.clone())
            .collect();

        diff
    }

    /// Number of resources that need fetching.
    pub fn changed_count(&self) -> usize {
        self.added.len() + self.modified.len()
    }

    /// Whether nothing needs fetching.
    pub fn is_empty(&self) -> bool {
        self.changed_count() == 0
    }
}
