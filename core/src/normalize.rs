//! NORMALIZE stage: fills each record's `Derived` values from its raw fields.

use crate::{
    duration::parse_lookback,
    record::{Derived, EventRecord, EventSet},
    schema::ResolvedFields,
    types::{Agency, UNKNOWN_AGENCY},
};

/// Trimmed, lower-cased agency; "unknown" when absent or blank.
pub fn normalize_agency(raw: Option<&str>) -> Agency {
    match raw.map(|v| v.trim().to_lowercase()) {
        Some(v) if !v.is_empty() => v,
        _ => UNKNOWN_AGENCY.to_string(),
    }
}

/// Trimmed, lower-cased touch type; "" when absent.
pub fn normalize_touch_type(raw: Option<&str>) -> String {
    raw.map(|v| v.trim().to_lowercase()).unwrap_or_default()
}

/// Derived values for one record, given the set's resolved columns.
pub fn derive(record: &EventRecord, fields: &ResolvedFields) -> Derived {
    Derived::new(
        normalize_agency(raw(record, &fields.agency)),
        normalize_touch_type(raw(record, &fields.touch_type)),
        parse_lookback(raw(record, &fields.lookback)),
    )
}

fn raw<'r>(record: &'r EventRecord, column: &Option<String>) -> Option<&'r str> {
    column.as_deref().and_then(|c| record.get(c))
}

/// Normalize every record in the set. Missing columns fall back to their
/// defaults; nothing here can fail.
pub fn normalize(set: &mut EventSet) {
    let fields = ResolvedFields::for_set(set);
    if fields.agency.is_none() && !set.is_empty() {
        log::warn!(
            "normalize: no agency column in {} export; all {} events count as '{UNKNOWN_AGENCY}'",
            set.category.as_str(),
            set.len()
        );
    }
    set.update_derived(|r| derive(r, &fields));
}
