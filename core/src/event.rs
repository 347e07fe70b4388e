//! Stage events, the audit trail of one reconciliation run.
//!
//! RULE: Every stage of every program emits exactly one event.
//! Events are written to the run's event log and never read back by a stage.

use crate::types::{ProgramId, RunId};
use serde::{Deserialize, Serialize};

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pull,
    Normalize,
    Flag,
    Dedupe,
    Aggregate,
    Summarize,
}

impl Stage {
    pub const ORDER: [Stage; 6] = [
        Stage::Pull,
        Stage::Normalize,
        Stage::Flag,
        Stage::Dedupe,
        Stage::Aggregate,
        Stage::Summarize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pull      => "pull",
            Self::Normalize => "normalize",
            Self::Flag      => "flag",
            Self::Dedupe    => "dedupe",
            Self::Aggregate => "aggregate",
            Self::Summarize => "summarize",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageEvent {
    // ── Run events ─────────────────────────────────
    RunInitialized {
        run_id: RunId,
        period_from: String,
        period_to: String,
    },

    // ── Program stages ─────────────────────────────
    Pulled {
        program_id: ProgramId,
        delivered: usize,
        fraud: usize,
    },
    Normalized {
        program_id: ProgramId,
        delivered: usize,
        fraud: usize,
    },
    Flagged {
        program_id: ProgramId,
        rule: String,
        flagged: usize,
        total: usize,
    },
    Deduped {
        program_id: ProgramId,
        before: usize,
        after: usize,
        skipped: bool,
    },
    Aggregated {
        program_id: ProgramId,
        delivered_agencies: usize,
        fraud_agencies: usize,
        flagged_agencies: usize,
        excluded_removed: usize,
    },
    Summarized {
        program_id: ProgramId,
        rows: usize,
        net_valid: i64,
    },
}

impl StageEvent {
    /// Stable name for the event_type column in event_log.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::RunInitialized { .. } => "run_initialized",
            Self::Pulled { .. }         => "pulled",
            Self::Normalized { .. }     => "normalized",
            Self::Flagged { .. }        => "flagged",
            Self::Deduped { .. }        => "deduped",
            Self::Aggregated { .. }     => "aggregated",
            Self::Summarized { .. }     => "summarized",
        }
    }

    /// The stage that emitted this event; `None` for run-level events.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::RunInitialized { .. } => None,
            Self::Pulled { .. }         => Some(Stage::Pull),
            Self::Normalized { .. }     => Some(Stage::Normalize),
            Self::Flagged { .. }        => Some(Stage::Flag),
            Self::Deduped { .. }        => Some(Stage::Dedupe),
            Self::Aggregated { .. }     => Some(Stage::Aggregate),
            Self::Summarized { .. }     => Some(Stage::Summarize),
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id:         Option<i64>,
    pub run_id:     RunId,
    pub program_id: Option<ProgramId>,
    pub stage:      Option<String>,
    pub event_type: String,
    pub payload:    String, // JSON-serialized StageEvent
}
