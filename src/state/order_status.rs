/// Staged order status definitions
use std::fmt;

/// Represents the state of a single staged order within a batch
///
/// Orders move `Started -> Completed` or `Started -> Failed` independently of
/// their siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    /// Row exists, detail page not yet parsed
    Started,

    /// Detail page parsed and mapped onto the order
    Completed,

    /// Template resolution, fetch or parse failed for this order
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Started)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "started" => Some(Self::Started),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn all() -> [Self; 3] {
        [Self::Started, Self::Completed, Self::Failed]
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
