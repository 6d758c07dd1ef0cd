//! Common error types for bundlesync.

use std::fmt;

use thiserror::Error;

/// Which retrieval stage a fetch failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchStage {
    /// Retrieving or decoding the remote manifest.
    Manifest,
    /// Retrieving a resource body.
    Resource,
}

impl fmt::Display for FetchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchStage::Manifest => write!(f, "manifest"),
            FetchStage::Resource => write!(f, "resource"),
        }
    }
}

/// Which local storage stage a store failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreStage {
    /// Loading the current manifest.
    Load,
    /// Committing resources and the new manifest.
    Commit,
}

impl fmt::Display for StoreStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreStage::Load => write!(f, "load"),
            StoreStage::Commit => write!(f, "commit"),
        }
    }
}

fn path_suffix(path: &Option<String>) -> String {
    path.as_deref()
        .map(|p| format!(" for '{}'", p))
        .unwrap_or_default()
}

/// Top-level error type for bundlesync operations.
///
/// `Fetch`, `Store` and `Cancelled` are the terminal failure reasons a sync
/// run reports. The remaining variants are raised below the pipeline (by
/// transports, codecs and stores) and are folded into one of the terminal
/// kinds before they reach a caller.
#[derive(Debug, Error)]
pub enum Error {
    /// Manifest or resource retrieval/decoding failed.
    #[error("{stage} fetch failed{}: {reason}", path_suffix(.path))]
    Fetch {
        stage: FetchStage,
        path: Option<String>,
        reason: String,
    },

    /// Local load or commit failed.
    #[error("store {stage} failed: {reason}")]
    Store { stage: StoreStage, reason: String },

    /// The sync run was cancelled by the caller.
    #[error("sync cancelled")]
    Cancelled,

    /// Network transport failed.
    #[error("Network error: {0}")]
    Network(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Wrap any lower-level error as a fetch failure.
    pub fn fetch(stage: FetchStage, path: Option<&str>, source: impl fmt::Display) -> Self {
        Error::Fetch {
            stage,
            path: path.map(str::to_string),
            reason: source.to_string(),
        }
    }

    /// Wrap any lower-level error as a store failure.
    pub fn store(stage: StoreStage, source: impl fmt::Display) -> Self {
        Error::Store {
            stage,
            reason: source.to_string(),
        }
    }

    /// Whether this error came from the network side and may succeed if the
    /// whole sync is attempted again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Fetch { .. } | Error::Network(_))
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
