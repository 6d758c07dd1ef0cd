//! Manifest and resource descriptor definitions.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use bundlesync_common::{Error, ResourcePath, Result};

/// One entry of a manifest: a fetchable resource and its change-detection hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    /// Remote location (relative to the manifest) and local storage key.
    pub path: ResourcePath,
    /// Opaque checksum, compared for equality only.
    pub content_hash: String,
    /// Opaque metadata carried through to storage.
    pub timestamp: String,
}

impl ResourceDescriptor {
    /// Create a new descriptor.
    pub fn new(
        path: ResourcePath,
        content_hash: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            path,
            content_hash: content_hash.into(),
            timestamp: timestamp.into(),
        }
    }
}

/// A descriptor whose body has been retrieved.
///
/// Only produced by a resource fetch; every value built during a sync run is
/// handed to the store before the run completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResource {
    pub descriptor: ResourceDescriptor,
    pub content: Vec<u8>,
}

impl FetchedResource {
    /// Pair a descriptor with its body.
    pub fn new(descriptor: ResourceDescriptor, content: Vec<u8>) -> Self {
        Self {
            descriptor,
            content,
        }
    }

    /// Storage key of this resource.
    pub fn path(&self) -> &ResourcePath {
        &self.descriptor.path
    }
}

/// A named, versioned set of resources.
///
/// Resource order is significant and preserved; paths are unique. A
/// manifest is never mutated after it is decoded, so a new one replaces
/// the stored one wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Manifest {
    /// Bundle name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Publisher-assigned version label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Resources in manifest order.
    pub resources: Vec<ResourceDescriptor>,
}

impl Manifest {
    /// Create a manifest from descriptors.
    ///
    /// # Errors
    /// - Two descriptors share a path
    pub fn new(resources: Vec<ResourceDescriptor>) -> Result<Self> {
        let manifest = Self {
            name: None,
            version: None,
            resources,
        };
        manifest.validate()?;
        Ok(manifest)
    }

    /// Set the bundle name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the version label.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Check that every path occurs once.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.resources.len());
        for resource in &self.resources {
            if !seen.insert(resource.path.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "Duplicate resource path in manifest: {}",
                    resource.path
                )));
            }
        }
        Ok(())
    }

    /// Look up a descriptor by path.
    pub fn get(&self, path: &ResourcePath) -> Option<&ResourceDescriptor> {
        self.resources.iter().find(|r| &r.path == path)
    }

    /// Number of resources.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether the manifest lists no resources.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from JSON and validate.
    pub fn from_json(json: &str) -> Result<Self> {
        let manifest: Self =
            serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Serialize to bytes for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from bytes and validate.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let manifest: Self =
            serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }
}
