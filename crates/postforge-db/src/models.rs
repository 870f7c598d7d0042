//! Internal Rust models matching the database schema.
//!
//! This module provides strongly-typed structures that map to database tables.
//! All models use types from postforge-common where appropriate.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use postforge_common::{AssetId, AssetStatus, ItemId, ItemStatus, Progress};
use serde::{Deserialize, Serialize};

/// One unit of source content tracked end-to-end through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentItem {
    pub id: ItemId,
    /// Path of the originating file. Unique.
    pub source_location: String,
    /// SHA-256 hex digest of the source bytes; de-duplication key.
    pub content_hash: Option<String>,
    pub title: Option<String>,
    pub labels: Vec<String>,
    /// Mutable working copy of the markup, rewritten by enrichment stages.
    pub payload: String,
    pub status: ItemStatus,
    /// Completed enrichment sub-steps.
    pub progress: Progress,
    /// Identifier assigned by the downstream publishing target.
    pub external_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A media file associated with a content item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Asset {
    pub id: AssetId,
    pub parent_item_id: ItemId,
    pub source_location: String,
    /// Written by the transform stage; doubles as its progress marker.
    pub processed_location: Option<String>,
    pub status: AssetStatus,
    /// URL/handle assigned by the downstream publishing target.
    pub external_ref: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of registering a scanned source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// A new row was created.
    Inserted(ItemId),
    /// The location already existed with different content; the row was
    /// updated in place and reset for reprocessing.
    Updated(ItemId),
    /// The content matched a dead (`missing`/`error`) row, which was revived
    /// at the new location.
    Revived(ItemId),
    /// The content matched a live row; nothing was inserted.
    Duplicate {
        existing: ItemId,
        existing_location: String,
    },
}

impl RegisterOutcome {
    /// The item the scanned file now corresponds to, unless it was a
    /// duplicate of a live row.
    pub fn accepted_id(&self) -> Option<ItemId> {
        match self {
            RegisterOutcome::Inserted(id)
            | RegisterOutcome::Updated(id)
            | RegisterOutcome::Revived(id) => Some(*id),
            RegisterOutcome::Duplicate { .. } => None,
        }
    }
}

/// Counts per status per kind, for reporting and the stats command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Statistics {
    pub items: BTreeMap<String, i64>,
    pub assets: BTreeMap<String, i64>,
}

impl Statistics {
    pub fn item_count(&self, status: ItemStatus) -> i64 {
        self.items.get(status.as_str()).copied().unwrap_or(0)
    }

    pub fn asset_count(&self, status: AssetStatus) -> i64 {
        self.assets.get(status.as_str()).copied().unwrap_or(0)
    }
}
