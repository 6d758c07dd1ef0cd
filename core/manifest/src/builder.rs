//! Generate a manifest from a directory of assets.
//!
//! This is the publishing side of a sync: the origin serves the directory
//! together with the manifest written by the builder.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use bundlesync_common::{Error, ResourcePath, Result};

use crate::manifest::{Manifest, ResourceDescriptor};

/// Builder for manifests over a local directory tree.
pub struct ManifestBuilder {
    root: PathBuf,
    name: Option<String>,
    version: Option<String>,
    exclude: Vec<String>,
}

impl ManifestBuilder {
    /// Create a builder rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            name: None,
            version: None,
            exclude: Vec::new(),
        }
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

    /// Skip a relative path (typically the manifest file itself).
    pub fn exclude(mut self, path: impl Into<String>) -> Self {
        self.exclude.push(path.into());
        self
    }

    /// Walk the directory and build the manifest.
    ///
    /// Resources are sorted by path so the output is deterministic. Each
    /// content hash is the hex BLAKE2b-256 digest of the file body and each
    /// timestamp the file's RFC 3339 modification time.
    ///
    /// # Errors
    /// - Root is not a directory
    /// - A file name is not valid UTF-8 or not a valid resource path
    /// - I/O errors while reading files
    pub fn build(&self) -> Result<Manifest> {
        if !self.root.is_dir() {
            return Err(Error::InvalidInput(format!(
                "Not a directory: {}",
                self.root.display()
            )));
        }

        let mut files = Vec::new();
        collect_files(&self.root, &mut files)?;

        let mut resources = Vec::with_capacity(files.len());
        for file in files {
            let relative = relative_key(&self.root, &file)?;
            if self.exclude.iter().any(|e| e == &relative) {
                continue;
            }

            let data = fs::read(&file)?;
            let modified: DateTime<Utc> = fs::metadata(&file)?.modified()?.into();

            debug!("Adding {} ({} bytes)", relative, data.len());
            resources.push(ResourceDescriptor::new(
                ResourcePath::parse(relative)?,
                content_hash(&data),
                modified.to_rfc3339_opts(SecondsFormat::Secs, true),
            ));
        }

        resources.sort_by(|a, b| a.path.cmp(&b.path));

        let mut manifest = Manifest::new(resources)?;
        manifest.name = self.name.clone();
        manifest.version = self.version.clone();
        Ok(manifest)
    }
}

/// Hex BLAKE2b-256 digest of a resource body.
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(data);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else if path.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

fn relative_key(root: &Path, file: &Path) -> Result<String> {
    let relative = file
        .strip_prefix(root)
        .map_err(|_| Error::InvalidInput(format!("{} is outside root", file.display())))?;

    let mut parts = Vec::new();
    for comp in relative.components() {
        let part = comp.as_os_str().to_str().ok_or_else(|| {
            Error::InvalidInput(format!("Non UTF-8 file name: {}", file.display()))
        })?;
        parts.push(part);
    }
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_content_hash_is_stable() {
        let a = content_hash(b"hello");
        assert_eq!(a, content_hash(b"hello"));
        assert_ne!(a, content_hash(b"hello!"));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_build_from_directory() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("lib")).unwrap();
        fs::write(temp.path().join("b.js"), b"b").unwrap();
        fs::write(temp.path().join("lib/a.js"), b"a").unwrap();
        fs::write(temp.path().join("manifest.json"), b"{}").unwrap();

        let manifest = ManifestBuilder::new(temp.path())
            .with_name("bundle")
            .with_version("7")
            .exclude("manifest.json")
            .build()
            .unwrap();

        let paths: Vec<_> = manifest.resources.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["b.js", "lib/a.js"]);
        assert_eq!(manifest.resources[0].content_hash, content_hash(b"b"));
        assert!(!manifest.resources[0].timestamp.is_empty());
        assert_eq!(manifest.name.as_deref(), Some("bundle"));
        assert_eq!(manifest.version.as_deref(), Some("7"));
    }

    #[test]
    fn test_timestamps_follow_file_mtime() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.js"), b"a").unwrap();
        let mtime: DateTime<Utc> = fs::metadata(temp.path().join("a.js"))
            .unwrap()
            .modified()
            .unwrap()
            .into();

        let first = ManifestBuilder::new(temp.path()).build().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        let second = ManifestBuilder::new(temp.path()).build().unwrap();

        assert_eq!(first, second);
        assert_eq!(
            first.resources[0].timestamp,
            mtime.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
    }

    #[test]
    fn test_build_rejects_missing_root() {
        let temp = TempDir::new().unwrap();
        assert!(ManifestBuilder::new(temp.path().join("missing")).build().is_err());
    }
}
