//! Shared types used throughout postforge.
//!
//! This crate provides the unified error type, typed ID wrappers, the item and
//! asset status machines, and the progress-marker flags that record which
//! enrichment sub-steps an item has completed.

pub mod error;
pub mod ids;
pub mod progress;
pub mod status;

pub use error::{Error, Result};
pub use ids::{AssetId, ItemId};
pub use progress::Progress;
pub use status::{AssetStatus, ItemStatus};
