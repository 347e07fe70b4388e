//! Schema resolver: maps logical fields onto whatever column names a given
//! vendor export happens to use.
//!
//! Each logical field has an ordered list of exact candidates and, for the
//! identifier fields, a token fallback. First match wins. A miss is never an
//! error; callers apply the field's documented default.

use crate::record::EventSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalField {
    Agency,
    TouchType,
    Lookback,
    CustomerId,
    VendorId,
    MonetaryValue,
    /// Attribution source, used only to drop organic installs.
    Source,
}

impl LogicalField {
    /// Exact column names, in priority order.
    pub fn candidates(&self) -> &'static [&'static str] {
        match self {
            Self::Agency        => &["agency", "partner", "af_prt", "media_source"],
            Self::TouchType     => &["attributed_touch_type", "touch_type"],
            Self::Lookback      => &["attribution_lookback", "lookback", "time_to_install"],
            Self::CustomerId    => &["customer_user_id", "customer_id"],
            Self::VendorId      => &["appsflyer_id", "vendor_id"],
            Self::MonetaryValue => &["event_value", "event_revenue", "revenue"],
            Self::Source        => &["media_source"],
        }
    }

    /// Tokens that must all appear in a column name for it to match when no
    /// exact candidate is present.
    pub fn fallback_tokens(&self) -> &'static [&'static str] {
        match self {
            Self::CustomerId => &["customer", "id"],
            Self::VendorId   => &["appsflyer", "id"],
            _                => &[],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Agency        => "agency",
            Self::TouchType     => "touch_type",
            Self::Lookback      => "lookback",
            Self::CustomerId    => "customer_id",
            Self::VendorId      => "vendor_id",
            Self::MonetaryValue => "monetary_value",
            Self::Source        => "source",
        }
    }
}

/// Trim, lower-case and replace spaces with underscores.
pub fn normalize_field_name(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

/// Resolve a logical field against a list of column names.
pub fn resolve_columns(columns: &[String], field: LogicalField) -> Option<String> {
    let normalized: Vec<String> = columns.iter().map(|c| normalize_field_name(c)).collect();

    for candidate in field.candidates() {
        if let Some(pos) = normalized.iter().position(|c| c == candidate) {
            return Some(columns[pos].clone());
        }
    }

    let tokens = field.fallback_tokens();
    if tokens.is_empty() {
        return None;
    }
    normalized
        .iter()
        .position(|c| tokens.iter().all(|t| c.contains(t)))
        .map(|pos| columns[pos].clone())
}

/// Resolve a logical field against an event set's schema.
pub fn resolve(set: &EventSet, field: LogicalField) -> Option<String> {
    resolve_columns(set.columns(), field)
}

/// The columns a set resolves to, looked up once per stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedFields {
    pub agency:         Option<String>,
    pub touch_type:     Option<String>,
    pub lookback:       Option<String>,
    pub customer_id:    Option<String>,
    pub vendor_id:      Option<String>,
    pub monetary_value: Option<String>,
}

impl ResolvedFields {
    pub fn for_set(set: &EventSet) -> Self {
        Self {
            agency:         resolve(set, LogicalField::Agency),
            touch_type:     resolve(set, LogicalField::TouchType),
            lookback:       resolve(set, LogicalField::Lookback),
            customer_id:    resolve(set, LogicalField::CustomerId),
            vendor_id:      resolve(set, LogicalField::VendorId),
            monetary_value: resolve(set, LogicalField::MonetaryValue),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn first_candidate_in_priority_order_wins() {
        let c = cols(&["media_source", "partner", "event_time"]);
        assert_eq!(resolve_columns(&c, LogicalField::Agency), Some("partner".into()));
    }

    #[test]
    fn header_normalization_is_applied_before_matching() {
        let c = cols(&["  Attributed Touch Type ", "Media Source"]);
        assert_eq!(
            resolve_columns(&c, LogicalField::TouchType),
            Some("  Attributed Touch Type ".into())
        );
        assert_eq!(normalize_field_name("  Attributed Touch Type "), "attributed_touch_type");
    }

    #[test]
    fn missing_field_resolves_to_none() {
        let c = cols(&["event_time", "event_name"]);
        assert_eq!(resolve_columns(&c, LogicalField::Lookback), None);
        assert_eq!(resolve_columns(&c, LogicalField::MonetaryValue), None);
    }

    #[test]
    fn identifier_fields_fall_back_to_token_match() {
        let c = cols(&["event_time", "af_customer_uid", "appsflyer_device_id"]);
        assert_eq!(resolve_columns(&c, LogicalField::CustomerId), Some("af_customer_uid".into()));
        assert_eq!(resolve_columns(&c, LogicalField::VendorId), Some("appsflyer_device_id".into()));
    }

    #[test]
    fn token_fallback_is_not_used_for_other_fields() {
        let c = cols(&["agency_name_raw"]);
        assert_eq!(resolve_columns(&c, LogicalField::Agency), None);
    }
}
