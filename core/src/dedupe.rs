//! DEDUPE stage: drop candidates the fraud feed already reports.
//!
//! Match key = customer id + "_" + vendor (AppsFlyer) id, exact string
//! equality. If either identifier cannot be resolved in either set, the
//! candidates pass through unchanged.

use crate::{
    record::{EventRecord, EventSet},
    schema::{resolve, LogicalField},
};
use std::collections::HashSet;

/// Columns that make up the match key for one set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyColumns {
    pub customer_id: String,
    pub vendor_id:   String,
}

impl KeyColumns {
    pub fn for_set(set: &EventSet) -> Option<Self> {
        Some(Self {
            customer_id: resolve(set, LogicalField::CustomerId)?,
            vendor_id:   resolve(set, LogicalField::VendorId)?,
        })
    }

    pub fn match_key(&self, record: &EventRecord) -> String {
        format!(
            "{}_{}",
            record.get_or_empty(&self.customer_id),
            record.get_or_empty(&self.vendor_id)
        )
    }
}

/// Outcome of a dedupe pass, for the stage log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupeOutcome {
    pub before:  usize,
    pub after:   usize,
    pub skipped: bool,
}

/// Remove every candidate whose match key appears in `fraud`.
pub fn dedupe(candidates: &EventSet, fraud: &EventSet) -> EventSet {
    dedupe_with_outcome(candidates, fraud).0
}

pub fn dedupe_with_outcome(candidates: &EventSet, fraud: &EventSet) -> (EventSet, DedupeOutcome) {
    let before = candidates.len();
    let passthrough = |skipped| {
        (
            candidates.clone(),
            DedupeOutcome { before, after: before, skipped },
        )
    };

    if candidates.is_empty() || fraud.is_empty() {
        return passthrough(false);
    }

    let (Some(cand_cols), Some(fraud_cols)) = (KeyColumns::for_set(candidates), KeyColumns::for_set(fraud))
    else {
        log::warn!("dedupe: customer/vendor id columns not resolvable in both sets; skipping");
        return passthrough(true);
    };

    let fraud_keys: HashSet<String> = fraud.iter().map(|r| fraud_cols.match_key(r)).collect();
    let kept = candidates.subset(candidates.category, |r| {
        !fraud_keys.contains(&cand_cols.match_key(r))
    });

    let after = kept.len();
    log::info!("dedupe: {before} candidates, {} already in fraud feed, {after} kept", before - after);
    (kept, DedupeOutcome { before, after, skipped: false })
}
