//! Local filesystem transport.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

use bundlesync_common::{Error, Result};

use crate::transport::Transport;

/// Local filesystem transport.
///
/// Serves an origin laid out in a local directory, e.g. a mounted share or
/// the output directory of `bundlesync publish`.
pub struct LocalTransport {
    root: PathBuf,
}

impl LocalTransport {
    /// Create a new local transport with the given root directory.
    ///
    /// # Errors
    /// - Root does not exist or is not a directory
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(Error::NotFound(format!(
                "Origin directory not found: {}",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    /// Convert a location to a filesystem path below the root.
    fn to_fs_path(&self, location: &str) -> Result<PathBuf> {
        let relative = Path::new(location);
        let mut fs_path = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => fs_path.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(Error::InvalidInput(format!(
                        "Location escapes origin root: {}",
                        location
                    )))
                }
            }
        }
        Ok(fs_path)
    }
}

#[async_trait]
impl Transport for LocalTransport {
    fn name(&self) -> &str {
        "local"
    }

    async fn fetch(&self, location: &str) -> Result<Vec<u8>> {
        let fs_path = self.to_fs_path(location)?;

        if !fs_path.exists() {
            return Err(Error::NotFound(format!("File not found: {}", location)));
        }

        if fs_path.is_dir() {
            return Err(Error::InvalidInput(format!(
                "Cannot fetch directory: {}",
                location
            )));
        }

        Ok(fs::read(&fs_path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_fetch_file() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("lib")).unwrap();
        std::fs::write(temp.path().join("lib/a.js"), b"a").unwrap();

        let transport = LocalTransport::new(temp.path()).unwrap();
        assert_eq!(transport.fetch("lib/a.js").await.unwrap(), b"a");
        assert_eq!(transport.fetch("./lib/a.js").await.unwrap(), b"a");
    }

    #[tokio::test]
    async fn test_missing_file() {
        let temp = TempDir::new().unwrap();
        let transport = LocalTransport::new(temp.path()).unwrap();
        assert!(matches!(
            transport.fetch("missing.js").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_traversal() {
        let temp = TempDir::new().unwrap();
        let transport = LocalTransport::new(temp.path()).unwrap();
        assert!(matches!(
            transport.fetch("../secret").await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            transport.fetch("/etc/passwd").await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_directory_is_rejected() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("dir")).unwrap();
        let transport = LocalTransport::new(temp.path()).unwrap();
        assert!(matches!(
            transport.fetch("dir").await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_missing_root_fails() {
        let temp = TempDir::new().unwrap();
        assert!(LocalTransport::new(temp.path().join("nope")).is_err());
    }
}
