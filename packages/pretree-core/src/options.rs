#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Knobs for one update batch.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct UpdateOptions {
    /// Merge text siblings that end up adjacent after the node-level phase.
    pub merge_texts: bool,
    /// Flush every database touched by node-level primitives before the
    /// database-level phase.
    pub autoflush: bool,
    /// Validate the structure of every touched store after applying.
    pub check_invariants: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            merge_texts: true,
            autoflush: false,
            check_invariants: cfg!(debug_assertions),
        }
    }
}

impl UpdateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge_texts(mut self, enabled: bool) -> Self {
        self.merge_texts = enabled;
        self
    }

    pub fn autoflush(mut self, enabled: bool) -> Self {
        self.autoflush = enabled;
        self
    }

    pub fn check_invariants(mut self, enabled: bool) -> Self {
        self.check_invariants = enabled;
        self
    }

    /// Parses options from JSON; missing fields keep their defaults.
    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> crate::error::Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            crate::error::Error::InvalidOperation(format!("invalid update options: {}", e))
        })
    }
}
