//! Common types used throughout bundlesync.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Relative path of a resource within a manifest.
///
/// The same value names the resource at the remote origin (resolved against
/// the manifest location) and keys it in local storage, so it is restricted
/// to forward-slash separated components that cannot escape either root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourcePath(String);

impl ResourcePath {
    /// Parse and validate a resource path.
    ///
    /// # Errors
    /// - Path is empty or absolute
    /// - Path contains backslashes, empty, `.` or `..` components
    pub fn parse(path: impl Into<String>) -> crate::Result<Self> {
        let path = path.into();
        if path.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Resource path cannot be empty".to_string(),
            ));
        }
        if path.starts_with('/') {
            return Err(crate::Error::InvalidInput(format!(
                "Resource path must be relative: {}",
                path
            )));
        }
        if path.contains('\\') {
            return Err(crate::Error::InvalidInput(format!(
                "Resource path cannot contain backslashes: {}",
                path
            )));
        }
        for comp in path.split('/') {
            if comp.is_empty() || comp == "." || comp == ".." {
                return Err(crate::Error::InvalidInput(format!(
                    "Invalid component in resource path: {}",
                    path
                )));
            }
        }
        Ok(Self(path))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the path components.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Get the file name (last component).
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl TryFrom<String> for ResourcePath {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(value)
    }
}

impl From<ResourcePath> for String {
    fn from(path: ResourcePath) -> Self {
        path.0
    }
}

impl AsRef<str> for ResourcePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_resource_path_parse() {
        let path = ResourcePath::parse("scripts/app/main.js").unwrap();
        assert_eq!(path.as_str(), "scripts/app/main.js");
        assert_eq!(
            path.components().collect::<Vec<_>>(),
            vec!["scripts", "app", "main.js"]
        );
        assert_eq!(path.name(), "main.js");
    }

    #[test]
    fn test_resource_path_rejects_invalid() {
        assert!(ResourcePath::parse("").is_err());
        assert!(ResourcePath::parse("/etc/passwd").is_err());
        assert!(ResourcePath::parse("../escape.js").is_err());
        assert!(ResourcePath::parse("a/./b.js").is_err());
        assert!(ResourcePath::parse("a//b.js").is_err());
        assert!(ResourcePath::parse("a\\b.js").is_err());
        assert!(ResourcePath::parse("trailing/").is_err());
    }

    #[test]
    fn test_resource_path_serde_validates() {
        let ok: ResourcePath = serde_json::from_str("\"a.js\"").unwrap();
        assert_eq!(ok.as_str(), "a.js");

        let bad: std::result::Result<ResourcePath, _> = serde_json::from_str("\"../a.js\"");
        assert!(bad.is_err());
    }

    proptest! {
        #[test]
        fn prop_valid_components_always_parse(parts in prop::collection::vec("[a-z0-9_-]{1,8}(\\.[a-z]{1,3})?", 1..5)) {
            let joined = parts.join("/");
            let path = ResourcePath::parse(joined.clone()).unwrap();
            prop_assert_eq!(path.as_str(), joined.as_str());
        }
    }
}
