//! Shared primitive types used across the whole reconciliation run.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The canonical run identifier (uuid v4, one per reporting run).
pub type RunId = String;

/// Stable identifier of a configured program, e.g. "kikoff".
pub type ProgramId = String;

/// Normalized agency name: trimmed and lower-cased.
pub type Agency = String;

/// Agency value used whenever the source field is absent or empty.
pub const UNKNOWN_AGENCY: &str = "unknown";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Ios,
    Android,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ios     => "ios",
            Self::Android => "android",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which table an event set belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Delivered,
    Fraud,
    Flagged,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Fraud     => "fraud",
            Self::Flagged   => "flagged",
        }
    }
}
