/// Catalog entry status definitions
///
/// An entry moves forward along Discovered → Resolved → Downloading →
/// Downloaded, or diverts to Failed or Skipped from any non-terminal status.
use serde::Serialize;
use std::fmt;

/// Represents the current processing status of a catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    // ===== Main Chain =====
    /// Post has been crawled; its hosting link (if any) is recorded
    Discovered,

    /// Hosting link has been resolved to a content-network identifier
    Resolved,

    /// The daemon accepted the download and is working on it
    Downloading,

    /// The daemon reported the file as complete
    Downloaded,

    // ===== Diversions =====
    /// Processing failed after the retry budget was exhausted
    Failed,

    /// Entry cannot be processed (no link, removed content, robots.txt)
    Skipped,
}

impl EntryStatus {
    /// Position on the main chain, or None for the diversion statuses
    fn chain_rank(&self) -> Option<u8> {
        match self {
            Self::Discovered => Some(0),
            Self::Resolved => Some(1),
            Self::Downloading => Some(2),
            Self::Downloaded => Some(3),
            Self::Failed | Self::Skipped => None,
        }
    }

    /// Returns true if no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Downloaded | Self::Failed | Self::Skipped)
    }

    /// Returns true if an entry in this status must carry a resolved identifier
    pub fn requires_resolved_id(&self) -> bool {
        matches!(self, Self::Resolved | Self::Downloading | Self::Downloaded)
    }

    /// Returns true if `self` lies strictly further along the main chain than `other`
    pub fn is_forward_of(&self, other: EntryStatus) -> bool {
        match (self.chain_rank(), other.chain_rank()) {
            (Some(a), Some(b)) => a > b,
            _ => false,
        }
    }

    /// Checks whether a compare-and-set move from `self` to `to` is permitted
    ///
    /// Allowed moves are exactly one step forward on the main chain, or a
    /// diversion from any non-terminal status.
    pub fn can_transition_to(&self, to: EntryStatus) -> bool {
        if self.is_terminal() {
            return false;
        }

        match (self.chain_rank(), to.chain_rank()) {
            (_, None) => true,
            (Some(from), Some(next)) => next == from + 1,
            (None, Some(_)) => false,
        }
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Resolved => "resolved",
            Self::Downloading => "downloading",
            Self::Downloaded => "downloaded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Parses a status from its database string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "discovered" => Some(Self::Discovered),
            "resolved" => Some(Self::Resolved),
            "downloading" => Some(Self::Downloading),
            "downloaded" => Some(Self::Downloaded),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    /// Returns all statuses in chain order followed by the diversions
    pub fn all_states() -> [Self; 6] {
        [
            Self::Discovered,
            Self::Resolved,
            Self::Downloading,
            Self::Downloaded,
            Self::Failed,
            Self::Skipped,
        ]
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
