//! AGGREGATE and SUMMARIZE stages.
//!
//! Design:
//!   - Counts are grouped by normalized agency; "unknown" and excluded
//!     agencies never appear in any aggregate.
//!   - Summary = delivered aggregate LEFT JOIN fraud, flagged (missing → 0)
//!   - net_valid = delivered - fraud - flagged, never clamped
//!   - rates = part / delivered * 100, one decimal, 0 when delivered is 0

use crate::{
    normalize::normalize_agency,
    record::EventSet,
    schema::{resolve, LogicalField},
    types::{Agency, UNKNOWN_AGENCY},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgencyCount {
    pub agency: Agency,
    pub count:  u64,
}

/// One aggregate, named after the summary column it feeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgencyAggregate {
    pub count_field: String,
    pub rows:        Vec<AgencyCount>,
}

impl AgencyAggregate {
    pub fn build(set: &EventSet, count_field: &str, excluded: &[String]) -> Self {
        Self {
            count_field: count_field.to_string(),
            rows: aggregate(set, excluded),
        }
    }

    pub fn total(&self) -> u64 {
        self.rows.iter().map(|r| r.count).sum()
    }

    fn lookup(&self) -> HashMap<&str, u64> {
        self.rows.iter().map(|r| (r.agency.as_str(), r.count)).collect()
    }
}

/// True if the agency belongs in aggregates: known and not excluded.
pub fn is_reportable(agency: &str, excluded: &[String]) -> bool {
    !agency.is_empty()
        && agency != UNKNOWN_AGENCY
        && !excluded.iter().any(|e| e.trim().to_lowercase() == agency)
}

/// Count records per normalized agency, sorted by count descending
/// (ties by agency name). Records never normalized are normalized here
/// from the set's agency column.
pub fn aggregate(set: &EventSet, excluded: &[String]) -> Vec<AgencyCount> {
    if set.is_empty() {
        return Vec::new();
    }

    let agency_col = resolve(set, LogicalField::Agency);
    let mut counts: BTreeMap<Agency, u64> = BTreeMap::new();

    for record in set.iter() {
        let agency = if record.derived.is_normalized() {
            record.derived.agency.clone()
        } else {
            normalize_agency(agency_col.as_deref().and_then(|c| record.get(c)))
        };
        if is_reportable(&agency, excluded) {
            *counts.entry(agency).or_insert(0) += 1;
        }
    }

    let mut rows: Vec<AgencyCount> = counts
        .into_iter()
        .map(|(agency, count)| AgencyCount { agency, count })
        .collect();
    // BTreeMap order is alphabetical; a stable sort keeps it for ties.
    rows.sort_by(|a, b| b.count.cmp(&a.count));
    rows
}

/// part / whole * 100, rounded to one decimal; 0 when whole is 0.
///
/// Ties go to the even tenth (6.25 gives 6.2, 18.75 gives 18.8), judged on
/// the exact binary value of the percentage.
pub fn rate_pct(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round_tenths_half_even(part as f64 / whole as f64 * 100.0)
}

/// Round a finite, non-negative value to one decimal, half to even.
fn round_tenths_half_even(value: f64) -> f64 {
    if !value.is_finite() || value <= 0.0 {
        return 0.0;
    }
    // value == mantissa * 2^exp exactly.
    let bits = value.to_bits();
    let exp_bits = ((bits >> 52) & 0x7ff) as i32;
    let fraction = bits & ((1u64 << 52) - 1);
    let (mantissa, exp) = if exp_bits == 0 {
        (fraction, -1074)
    } else {
        (fraction | (1u64 << 52), exp_bits - 1075)
    };
    if exp >= 0 {
        return value;
    }

    let shift = (-exp) as u32;
    if shift >= 128 {
        return 0.0;
    }
    let tenths = mantissa as u128 * 10;
    let mut quotient = tenths >> shift;
    let remainder = tenths & ((1u128 << shift) - 1);
    let half = 1u128 << (shift - 1);
    if remainder > half || (remainder == half && quotient % 2 == 1) {
        quotient += 1;
    }
    quotient as f64 / 10.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub agency:         Agency,
    pub delivered:      u64,
    pub fraud:          u64,
    pub flagged:        u64,
    pub net_valid:      i64,
    pub fraud_rate_pct: f64,
    pub flag_rate_pct:  f64,
}

impl SummaryRow {
    pub fn new(agency: Agency, delivered: u64, fraud: u64, flagged: u64) -> Self {
        Self {
            net_valid: delivered as i64 - fraud as i64 - flagged as i64,
            fraud_rate_pct: rate_pct(fraud, delivered),
            flag_rate_pct: rate_pct(flagged, delivered),
            agency,
            delivered,
            fraud,
            flagged,
        }
    }
}

/// Sums across every agency in a summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgramTotals {
    pub delivered:      u64,
    pub fraud:          u64,
    pub flagged:        u64,
    pub net_valid:      i64,
    pub fraud_rate_pct: f64,
    pub flag_rate_pct:  f64,
}

impl ProgramTotals {
    pub fn new(delivered: u64, fraud: u64, flagged: u64, net_valid: i64) -> Self {
        Self {
            delivered,
            fraud,
            flagged,
            net_valid,
            fraud_rate_pct: rate_pct(fraud, delivered),
            flag_rate_pct: rate_pct(flagged, delivered),
        }
    }
}

/// The per-program summary table, sorted by delivered descending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryTable {
    /// Program-specific name of the flagged count, e.g. "outside_attribution".
    pub flagged_column:      String,
    /// Program-specific name of the flagged rate, e.g. "outside_attr_rate_%".
    pub flagged_rate_column: String,
    pub rows:                Vec<SummaryRow>,
}

impl SummaryTable {
    /// Left-join fraud and flagged counts onto the delivered aggregate.
    pub fn assemble(
        delivered: &AgencyAggregate,
        fraud: &AgencyAggregate,
        flagged: &AgencyAggregate,
        flagged_rate_column: &str,
    ) -> Self {
        let fraud_by_agency = fraud.lookup();
        let flagged_by_agency = flagged.lookup();

        let mut rows: Vec<SummaryRow> = delivered
            .rows
            .iter()
            .map(|d| {
                let agency = d.agency.as_str();
                SummaryRow::new(
                    d.agency.clone(),
                    d.count,
                    fraud_by_agency.get(agency).copied().unwrap_or(0),
                    flagged_by_agency.get(agency).copied().unwrap_or(0),
                )
            })
            .collect();
        rows.sort_by(|a, b| b.delivered.cmp(&a.delivered));

        Self {
            flagged_column: flagged.count_field.clone(),
            flagged_rate_column: flagged_rate_column.to_string(),
            rows,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn totals(&self) -> ProgramTotals {
        let sum = |f: fn(&SummaryRow) -> u64| self.rows.iter().map(f).sum::<u64>();
        ProgramTotals::new(
            sum(|r| r.delivered),
            sum(|r| r.fraud),
            sum(|r| r.flagged),
            self.rows.iter().map(|r| r.net_valid).sum(),
        )
    }

    /// Top `n` agencies by net valid (ties by delivered, then agency).
    pub fn top_by_net_valid(&self, n: usize) -> Vec<&SummaryRow> {
        let mut rows: Vec<&SummaryRow> = self.rows.iter().collect();
        rows.sort_by(|a, b| {
            b.net_valid
                .cmp(&a.net_valid)
                .then(b.delivered.cmp(&a.delivered))
                .then(a.agency.cmp(&b.agency))
        });
        rows.truncate(n);
        rows
    }
}
