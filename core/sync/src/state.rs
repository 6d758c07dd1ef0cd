//! Sync run state machine.

use std::fmt;
use tokio::sync::watch;
use tracing::{debug, warn};

use bundlesync_common::{Error, FetchStage, StoreStage};

/// Why a sync run failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Manifest or resource retrieval failed.
    Fetch {
        stage: FetchStage,
        path: Option<String>,
        message: String,
    },
    /// Local load or commit failed.
    Store { stage: StoreStage, message: String },
    /// The caller cancelled the run.
    Cancelled,
    /// Anything not raised by a pipeline stage.
    Other(String),
}

impl From<&Error> for FailureReason {
    fn from(err: &Error) -> Self {
        match err {
            Error::Fetch {
                stage,
                path,
                reason,
            } => FailureReason::Fetch {
                stage: *stage,
                path: path.clone(),
                message: reason.clone(),
            },
            Error::Store { stage, reason } => FailureReason::Store {
                stage: *stage,
                message: reason.clone(),
            },
            Error::Cancelled => FailureReason::Cancelled,
            other => FailureReason::Other(other.to_string()),
        }
    }
}

/// Phase of a sync run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncPhase {
    /// No run started yet.
    #[default]
    Idle,
    /// Remote manifest fetch and local manifest load in flight.
    FetchingManifests,
    /// Computing the changed set.
    Diffing,
    /// Retrieving changed resource bodies.
    FetchingResources,
    /// Writing resources and the new manifest.
    Committing,
    /// Run finished and committed.
    Complete,
    /// Run aborted; the store holds the previous sync's state.
    Failed(FailureReason),
}

impl SyncPhase {
    /// Whether the run has ended.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncPhase::Complete | SyncPhase::Failed(_))
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: &SyncPhase) -> bool {
        use SyncPhase::*;
        match (self, next) {
            (Idle, FetchingManifests)
            | (FetchingManifests, Diffing)
            | (Diffing, FetchingResources)
            | (FetchingResources, Committing)
            | (Committing, Complete) => true,
            (from, Failed(_)) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            SyncPhase::Idle => "idle",
            SyncPhase::FetchingManifests => "fetching-manifests",
            SyncPhase::Diffing => "diffing",
            SyncPhase::FetchingResources => "fetching-resources",
            SyncPhase::Committing => "committing",
            SyncPhase::Complete => "complete",
            SyncPhase::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Publishes phase changes of one pipeline to any number of observers.
pub struct PhaseTracker {
    tx: watch::Sender<SyncPhase>,
}

impl PhaseTracker {
    /// Create a tracker in the `Idle` phase.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SyncPhase::Idle);
        Self { tx }
    }

    /// Observe phase changes.
    pub fn subscribe(&self) -> watch::Receiver<SyncPhase> {
        self.tx.subscribe()
    }

    /// Current phase.
    pub fn current(&self) -> SyncPhase {
        self.tx.borrow().clone()
    }

    /// Return to `Idle` before a new run.
    pub fn reset(&self) {
        self.tx.send_replace(SyncPhase::Idle);
    }

    /// Move to `next`.
    ///
    /// Returns false, leaving the phase unchanged, if the transition is not
    /// legal from the current phase.
    pub fn advance(&self, next: SyncPhase) -> bool {
        let mut moved = false;
        self.tx.send_if_modified(|phase| {
            if phase.can_transition_to(&next) {
                debug!("Sync phase {} -> {}", phase, next);
                *phase = next.clone();
                moved = true;
            }
            moved
        });
        if !moved {
            warn!("Rejected sync phase transition {} -> {}", self.current(), next);
        }
        moved
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}
