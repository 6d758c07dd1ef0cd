//! Common utilities and types shared across bundlesync modules.
//!
//! This module provides the error type every stage of a sync run reports
//! through, and the validated resource path used as both remote location
//! and local storage key.

pub mod error;
pub mod types;

pub use error::{Error, FetchStage, Result, StoreStage};
pub use types::ResourcePath;
