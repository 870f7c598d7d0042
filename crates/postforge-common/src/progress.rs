//! Typed progress markers for content items.
//!
//! Each flag records that an enrichment sub-step completed and its result is
//! already durable in the item's payload. The retry classifier reads these to
//! decide where an errored item should resume, instead of re-deriving the
//! answer from payload content.

use serde::{Deserialize, Serialize};

/// Bitset of completed enrichment sub-steps, stored as an INTEGER column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Progress(u32);

impl Progress {
    /// No sub-step completed yet.
    pub const NONE: Progress = Progress(0);
    /// Keyword enrichment has rewritten the payload.
    pub const KEYWORDS: Progress = Progress(1);
    /// Location enrichment has rewritten the payload.
    pub const LOCATION: Progress = Progress(1 << 1);

    /// Reconstruct from a stored integer, dropping unknown bits.
    #[must_use]
    pub fn from_bits(bits: u32) -> Self {
        Progress(bits & (Self::KEYWORDS.0 | Self::LOCATION.0))
    }

    /// Raw value for storage.
    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Whether every flag in `other` is set.
    #[must_use]
    pub fn contains(self, other: Progress) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union with `other`.
    #[must_use]
    pub fn with(self, other: Progress) -> Self {
        Progress(self.0 | other.0)
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}
