use serde::{Deserialize, Serialize};

use crate::{DEFAULT_HARD_LIMIT_BYTES, DEFAULT_SOFT_LIMIT_BYTES};

/// Outcome of checking a file size before opening it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeDecision {
    Accept,
    /// Larger than the soft limit; ask the user first.
    Confirm,
    /// Larger than the hard limit; never opened.
    Reject,
}

/// Soft and hard size limits for opening files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizePolicy {
    pub soft_limit_bytes: u64,
    pub hard_limit_bytes: u64,
}

impl Default for SizePolicy {
    fn default() -> Self {
        Self {
            soft_limit_bytes: DEFAULT_SOFT_LIMIT_BYTES,
            hard_limit_bytes: DEFAULT_HARD_LIMIT_BYTES,
        }
    }
}

impl SizePolicy {
    pub fn new(soft_limit_bytes: u64, hard_limit_bytes: u64) -> Self {
        Self {
            soft_limit_bytes,
            hard_limit_bytes,
        }
    }

    /// Classifies `size`. Reaching a limit counts as exceeding it.
    pub fn evaluate(&self, size: u64) -> SizeDecision {
        if size >= self.hard_limit_bytes {
            SizeDecision::Reject
        } else if size >= self.soft_limit_bytes {
            SizeDecision::Confirm
        } else {
            SizeDecision::Accept
        }
    }
}
