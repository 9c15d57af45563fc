/// Batch status definitions for tracking ingestion runs
///
/// A batch is one run of one adapter against one credential bundle.
use std::fmt;

/// Represents the lifecycle state of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchStatus {
    /// Submitted and waiting for a handler to pick it up
    Queued,

    /// A scrape runner owns the batch and is working through it
    Started,

    /// The list page was retrieved and every order was attempted
    Completed,

    /// The session could not be opened or the list page could not be retrieved
    Failed,
}

impl BatchStatus {
    /// Returns true if no further mutation is allowed
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true if `next` is a legal successor of this status
    ///
    /// `Started -> Started` is allowed so a half-finished batch can be
    /// picked up again.
    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        match self {
            Self::Queued => matches!(next, Self::Started | Self::Failed),
            Self::Started => !matches!(next, Self::Queued),
            Self::Completed | Self::Failed => false,
        }
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parses a status from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "started" => Some(Self::Started),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all batch statuses in lifecycle order
    pub fn all() -> [Self; 4] {
        [Self::Queued, Self::Started, Self::Completed, Self::Failed]
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
