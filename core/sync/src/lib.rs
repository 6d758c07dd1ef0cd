//! bundlesync sync engine
//!
//! This crate keeps a local store in step with a remote manifest:
//! - Concurrent remote manifest fetch and local manifest load
//! - Hash-based diff so only changed resources are downloaded
//! - Bounded, cancellable resource fetching
//! - Atomic commit of resources and manifest
//! - Caller-level retry and periodic scheduling

pub mod config;
pub mod engine;
pub mod pipeline;
pub mod retry;
pub mod scheduler;
pub mod state;

// Re-export main types
pub use config::{SyncConfig, SyncMode};
pub use engine::{SyncEngine, SyncTask};
pub use pipeline::{SyncPipeline, SyncReport};
pub use retry::{RetryConfig, RetryExecutor};
pub use scheduler::{SyncRequest, SyncScheduler, SyncSchedulerHandle};
pub use state::{FailureReason, PhaseTracker, SyncPhase};

// Re-exported so callers need not depend on tokio-util directly.
pub use tokio_util::sync::CancellationToken;
