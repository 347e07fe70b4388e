//! Per-program reconciliation: NORMALIZE → FLAG → DEDUPE → AGGREGATE → SUMMARIZE.
//!
//! RULES:
//!   - A Reconciler sees only its own program's config and sets.
//!   - Every stage accepts an empty set and returns an empty set of the
//!     right shape.
//!   - Every stage emits exactly one StageEvent.
//!   - Excluded agencies leave the raw tables only after DEDUPE, so the
//!     fraud feed used for matching is the one that was pulled.

use crate::{
    aggregate::{AgencyAggregate, SummaryTable},
    config::ProgramConfig,
    dedupe::dedupe_with_outcome,
    event::StageEvent,
    normalize::normalize,
    record::EventSet,
    rules::FlagEvaluator,
    source::ProgramSets,
    types::ProgramId,
};

pub const DELIVERED_COLUMN: &str = "delivered";
pub const FRAUD_COLUMN: &str = "fraud";
pub const FRAUD_RATE_COLUMN: &str = "fraud_rate_%";
pub const NET_VALID_COLUMN: &str = "net_valid";

/// Everything one program produces: the summary plus its three raw tables.
#[derive(Debug, Clone)]
pub struct ProgramReport {
    pub program_id: ProgramId,
    pub label:      String,
    pub summary:    SummaryTable,
    pub delivered:  EventSet,
    pub fraud:      EventSet,
    pub flagged:    EventSet,
}

pub struct Reconciler {
    program:   ProgramConfig,
    evaluator: FlagEvaluator,
}

impl Reconciler {
    pub fn new(program: ProgramConfig) -> Self {
        let evaluator = FlagEvaluator::from_config(&program.rule);
        Self { program, evaluator }
    }

    pub fn program(&self) -> &ProgramConfig {
        &self.program
    }

    /// Run every stage after PULL. Returns the report and the stage events
    /// in emission order.
    pub fn reconcile(&self, sets: ProgramSets) -> (ProgramReport, Vec<StageEvent>) {
        let program_id = self.program.id.clone();
        let excluded = &self.program.excluded_agencies;
        let mut events = Vec::with_capacity(5);
        let ProgramSets { mut delivered, mut fraud } = sets;

        // NORMALIZE
        normalize(&mut delivered);
        normalize(&mut fraud);
        log::info!(
            "{program_id}: normalized {} delivered, {} fraud",
            delivered.len(),
            fraud.len()
        );
        events.push(StageEvent::Normalized {
            program_id: program_id.clone(),
            delivered: delivered.len(),
            fraud: fraud.len(),
        });

        // FLAG
        let candidates = self.evaluator.apply(&mut delivered);
        events.push(StageEvent::Flagged {
            program_id: program_id.clone(),
            rule: self.evaluator.rule_name().to_string(),
            flagged: candidates.len(),
            total: delivered.len(),
        });

        // DEDUPE (against the full fraud feed, before any exclusion)
        let (mut flagged, outcome) = dedupe_with_outcome(&candidates, &fraud);
        events.push(StageEvent::Deduped {
            program_id: program_id.clone(),
            before: outcome.before,
            after: outcome.after,
            skipped: outcome.skipped,
        });

        // AGGREGATE
        let excluded_removed = remove_excluded(&mut delivered, excluded)
            + remove_excluded(&mut fraud, excluded)
            + remove_excluded(&mut flagged, excluded);
        if excluded_removed > 0 {
            log::info!("{program_id}: {excluded_removed} excluded-agency events removed");
        }
        let delivered_agg = AgencyAggregate::build(&delivered, DELIVERED_COLUMN, excluded);
        let fraud_agg = AgencyAggregate::build(&fraud, FRAUD_COLUMN, excluded);
        let flagged_agg = AgencyAggregate::build(&flagged, &self.program.flagged.column, excluded);
        events.push(StageEvent::Aggregated {
            program_id: program_id.clone(),
            delivered_agencies: delivered_agg.rows.len(),
            fraud_agencies: fraud_agg.rows.len(),
            flagged_agencies: flagged_agg.rows.len(),
            excluded_removed,
        });

        // SUMMARIZE
        let summary = SummaryTable::assemble(
            &delivered_agg,
            &fraud_agg,
            &flagged_agg,
            &self.program.flagged.rate_column,
        );
        let totals = summary.totals();
        log::info!(
            "{program_id}: {} agencies, delivered={} fraud={} {}={} net_valid={}",
            summary.rows.len(),
            totals.delivered,
            totals.fraud,
            self.program.flagged.column,
            totals.flagged,
            totals.net_valid
        );
        events.push(StageEvent::Summarized {
            program_id: program_id.clone(),
            rows: summary.rows.len(),
            net_valid: totals.net_valid,
        });

        let report = ProgramReport {
            program_id,
            label: self.program.label.clone(),
            summary,
            delivered,
            fraud,
            flagged,
        };
        (report, events)
    }
}

/// Drop records whose normalized agency is on the exclusion list.
fn remove_excluded(set: &mut EventSet, excluded: &[String]) -> usize {
    if excluded.is_empty() {
        return 0;
    }
    let excluded: Vec<String> = excluded.iter().map(|e| e.trim().to_lowercase()).collect();
    let before = set.len();
    set.retain(|r| !excluded.contains(&r.derived.agency));
    before - set.len()
}
