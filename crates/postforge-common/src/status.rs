//! Item and asset status machines.
//!
//! Both kinds move monotonically forward through their pipeline statuses.
//! `error` is reachable from any non-terminal status and `missing` marks a
//! record whose backing source file disappeared. The only backward moves are
//! the dedicated retry (`error` -> best-guess prior status) and revive
//! (`missing`/`error` -> `new`) operations in the store, which deliberately
//! bypass [`ItemStatus::can_transition_to`].

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Pipeline status of a content item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Registered, not yet enriched.
    New,
    /// Keyword enrichment completed.
    KeywordsAdded,
    /// Location enrichment completed.
    LocationAdded,
    /// Accepted by the downstream publishing target.
    Published,
    /// Moved to cold storage. Terminal.
    Archived,
    /// Last processing attempt failed; see `error_message`.
    Error,
    /// Source file disappeared between scan and processing.
    Missing,
}

impl ItemStatus {
    /// Every status, in pipeline order with the siblings last.
    pub const ALL: [ItemStatus; 7] = [
        ItemStatus::New,
        ItemStatus::KeywordsAdded,
        ItemStatus::LocationAdded,
        ItemStatus::Published,
        ItemStatus::Archived,
        ItemStatus::Error,
        ItemStatus::Missing,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::New => "new",
            ItemStatus::KeywordsAdded => "keywords_added",
            ItemStatus::LocationAdded => "location_added",
            ItemStatus::Published => "published",
            ItemStatus::Archived => "archived",
            ItemStatus::Error => "error",
            ItemStatus::Missing => "missing",
        }
    }

    /// Position in the forward pipeline, `None` for the `error`/`missing`
    /// siblings.
    pub fn rank(self) -> Option<u8> {
        match self {
            ItemStatus::New => Some(0),
            ItemStatus::KeywordsAdded => Some(1),
            ItemStatus::LocationAdded => Some(2),
            ItemStatus::Published => Some(3),
            ItemStatus::Archived => Some(4),
            ItemStatus::Error | ItemStatus::Missing => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == ItemStatus::Archived
    }

    /// Whether an ordinary status update from `self` to `next` is permitted.
    ///
    /// Forward moves must strictly increase the pipeline rank. `error` and
    /// `missing` are reachable from anything that is not terminal. Leaving
    /// `error`/`missing` requires the store's retry or revive operation.
    pub fn can_transition_to(self, next: ItemStatus) -> bool {
        match next {
            ItemStatus::Error | ItemStatus::Missing => !self.is_terminal(),
            _ => match (self.rank(), next.rank()) {
                (Some(cur), Some(nxt)) => nxt > cur,
                _ => false,
            },
        }
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(ItemStatus::New),
            "keywords_added" => Ok(ItemStatus::KeywordsAdded),
            "location_added" => Ok(ItemStatus::LocationAdded),
            "published" => Ok(ItemStatus::Published),
            "archived" => Ok(ItemStatus::Archived),
            "error" => Ok(ItemStatus::Error),
            "missing" => Ok(ItemStatus::Missing),
            other => Err(Error::invalid_input(format!(
                "unknown item status: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline status of an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetStatus {
    /// Registered, not yet transformed.
    New,
    /// Transform stage wrote a processed copy.
    Processed,
    /// Accepted by the downstream publishing target.
    Published,
    /// Moved to cold storage. Terminal.
    Archived,
    /// Last processing attempt failed; see `error_message`.
    Error,
    /// Source file disappeared between scan and processing.
    Missing,
}

impl AssetStatus {
    /// Every status, in pipeline order with the siblings last.
    pub const ALL: [AssetStatus; 6] = [
        AssetStatus::New,
        AssetStatus::Processed,
        AssetStatus::Published,
        AssetStatus::Archived,
        AssetStatus::Error,
        AssetStatus::Missing,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AssetStatus::New => "new",
            AssetStatus::Processed => "processed",
            AssetStatus::Published => "published",
            AssetStatus::Archived => "archived",
            AssetStatus::Error => "error",
            AssetStatus::Missing => "missing",
        }
    }

    /// Position in the forward pipeline, `None` for the `error`/`missing`
    /// siblings.
    pub fn rank(self) -> Option<u8> {
        match self {
            AssetStatus::New => Some(0),
            AssetStatus::Processed => Some(1),
            AssetStatus::Published => Some(2),
            AssetStatus::Archived => Some(3),
            AssetStatus::Error | AssetStatus::Missing => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == AssetStatus::Archived
    }

    /// Same rules as [`ItemStatus::can_transition_to`].
    pub fn can_transition_to(self, next: AssetStatus) -> bool {
        match next {
            AssetStatus::Error | AssetStatus::Missing => !self.is_terminal(),
            _ => match (self.rank(), next.rank()) {
                (Some(cur), Some(nxt)) => nxt > cur,
                _ => false,
            },
        }
    }
}

impl std::str::FromStr for AssetStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(AssetStatus::New),
            "processed" => Ok(AssetStatus::Processed),
            "published" => Ok(AssetStatus::Published),
            "archived" => Ok(AssetStatus::Archived),
            "error" => Ok(AssetStatus::Error),
            "missing" => Ok(AssetStatus::Missing),
            other => Err(Error::invalid_input(format!(
                "unknown asset status: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_forward_transitions() {
        assert!(ItemStatus::New.can_transition_to(ItemStatus::KeywordsAdded));
        assert!(ItemStatus::KeywordsAdded.can_transition_to(ItemStatus::LocationAdded));
        assert!(ItemStatus::LocationAdded.can_transition_to(ItemStatus::Published));
        assert!(ItemStatus::Published.can_transition_to(ItemStatus::Archived));
        // Strictly-forward jumps are permitted.
        assert!(ItemStatus::New.can_transition_to(ItemStatus::Published));
    }

    #[test]
    fn test_item_backward_transitions_rejected() {
        assert!(!ItemStatus::Published.can_transition_to(ItemStatus::New));
        assert!(!ItemStatus::LocationAdded.can_transition_to(ItemStatus::KeywordsAdded));
        assert!(!ItemStatus::KeywordsAdded.can_transition_to(ItemStatus::KeywordsAdded));
        assert!(!ItemStatus::Archived.can_transition_to(ItemStatus::Published));
    }

    #[test]
    fn test_item_error_and_missing_reachability() {
        for status in ItemStatus::ALL {
            let expected = status != ItemStatus::Archived;
            assert_eq!(status.can_transition_to(ItemStatus::Error), expected);
            assert_eq!(status.can_transition_to(ItemStatus::Missing), expected);
        }
    }

    #[test]
    fn test_item_error_cannot_move_forward_directly() {
        // Leaving error/missing requires the retry or revive store operation.
        assert!(!ItemStatus::Error.can_transition_to(ItemStatus::New));
        assert!(!ItemStatus::Error.can_transition_to(ItemStatus::Published));
        assert!(!ItemStatus::Missing.can_transition_to(ItemStatus::New));
    }

    #[test]
    fn test_asset_transitions() {
        assert!(AssetStatus::New.can_transition_to(AssetStatus::Processed));
        assert!(AssetStatus::Processed.can_transition_to(AssetStatus::Published));
        assert!(!AssetStatus::Published.can_transition_to(AssetStatus::Processed));
        assert!(!AssetStatus::Archived.can_transition_to(AssetStatus::Error));
    }

    #[test]
    fn test_str_roundtrip() {
        for status in ItemStatus::ALL {
            assert_eq!(status.as_str().parse::<ItemStatus>().unwrap(), status);
        }
        for status in AssetStatus::ALL {
            assert_eq!(status.as_str().parse::<AssetStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<ItemStatus>().is_err());
    }
}
