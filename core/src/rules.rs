//! Flag rules: per-program policy checks over normalized events.
//!
//! RULE: A rule is a pure function of one record plus the configuration it
//! was built with. Rules never read another record or another program.
//!
//! Two variants ship today:
//!   - WindowRule:       view/click attribution windows and VTA authorization
//!   - ValuePatternRule: event-value marker check ("additional fraud")

use crate::{
    config::FlagRuleConfig,
    record::{Derived, EventRecord, EventSet},
    schema::ResolvedFields,
    types::EventCategory,
};
use std::fmt;

pub const TOUCH_IMPRESSION: &str = "impression";
pub const TOUCH_CLICK: &str = "click";

/// Why a record was flagged.
#[derive(Debug, Clone, PartialEq)]
pub enum FlagReason {
    UnauthorizedVta,
    VtaWindowExceeded { hours: f64 },
    CtaWindowExceeded { days: f64 },
    AdditionalFraud,
}

impl fmt::Display for FlagReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnauthorizedVta             => write!(f, "Unauthorized VTA"),
            Self::VtaWindowExceeded { hours } => write!(f, "VTA Window Exceeded (>{}h)", threshold(*hours)),
            Self::CtaWindowExceeded { days }  => write!(f, "CTA Window Exceeded (>{}d)", threshold(*days)),
            Self::AdditionalFraud             => write!(f, "Add'l Fraud"),
        }
    }
}

fn threshold(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{v:.0}")
    } else {
        v.to_string()
    }
}

/// The contract every flag rule fulfills.
pub trait FlagRule: Send {
    /// Stable name, used in stage events and logs.
    fn name(&self) -> &'static str;

    /// Whether the rule can run against a set with these resolved columns.
    /// A rule that cannot run flags nothing.
    fn applicable(&self, _fields: &ResolvedFields) -> bool {
        true
    }

    /// Classify one record. Returns the first (and only) matching reason.
    fn evaluate(&self, record: &EventRecord, fields: &ResolvedFields) -> Option<FlagReason>;
}

// ── Variant A: attribution windows ───────────────────────────────────────────

pub struct WindowRule {
    authorized_agencies: Vec<String>,
    vta_window_hours:    f64,
    cta_window_days:     f64,
}

impl WindowRule {
    pub fn new(authorized_agencies: &[String], vta_window_hours: f64, cta_window_days: f64) -> Self {
        Self {
            authorized_agencies: authorized_agencies
                .iter()
                .map(|a| a.trim().to_lowercase())
                .collect(),
            vta_window_hours,
            cta_window_days,
        }
    }

    fn is_authorized(&self, agency: &str) -> bool {
        self.authorized_agencies.iter().any(|a| a == agency)
    }

    pub fn unauthorized_vta(&self, d: &Derived) -> bool {
        d.touch_type == TOUCH_IMPRESSION && !self.is_authorized(&d.agency)
    }

    pub fn vta_window_exceeded(&self, d: &Derived) -> bool {
        d.touch_type == TOUCH_IMPRESSION
            && self.is_authorized(&d.agency)
            && d.lookback_hours > self.vta_window_hours
    }

    pub fn cta_window_exceeded(&self, d: &Derived) -> bool {
        d.touch_type == TOUCH_CLICK && d.lookback_hours > self.cta_window_days * 24.0
    }
}

impl FlagRule for WindowRule {
    fn name(&self) -> &'static str {
        "attribution_window"
    }

    fn evaluate(&self, record: &EventRecord, _fields: &ResolvedFields) -> Option<FlagReason> {
        let d = &record.derived;
        if self.unauthorized_vta(d) {
            Some(FlagReason::UnauthorizedVta)
        } else if self.vta_window_exceeded(d) {
            Some(FlagReason::VtaWindowExceeded { hours: self.vta_window_hours })
        } else if self.cta_window_exceeded(d) {
            Some(FlagReason::CtaWindowExceeded { days: self.cta_window_days })
        } else {
            None
        }
    }
}

// ── Variant B: event-value marker ────────────────────────────────────────────

/// Flags a record when its raw monetary value does NOT contain `marker`.
/// The check is a literal substring test on the vendor's raw encoding,
/// not a numeric comparison.
pub struct ValuePatternRule {
    marker: String,
}

impl ValuePatternRule {
    pub fn new(marker: impl Into<String>) -> Self {
        Self { marker: marker.into() }
    }

    pub fn is_candidate(&self, raw_value: &str) -> bool {
        !raw_value.contains(self.marker.as_str())
    }
}

impl FlagRule for ValuePatternRule {
    fn name(&self) -> &'static str {
        "value_pattern"
    }

    fn applicable(&self, fields: &ResolvedFields) -> bool {
        fields.monetary_value.is_some()
    }

    fn evaluate(&self, record: &EventRecord, fields: &ResolvedFields) -> Option<FlagReason> {
        let column = fields.monetary_value.as_deref()?;
        self.is_candidate(record.get_or_empty(column))
            .then_some(FlagReason::AdditionalFraud)
    }
}

// ── Evaluator ────────────────────────────────────────────────────────────────

pub struct FlagEvaluator {
    rule: Box<dyn FlagRule>,
}

impl FlagEvaluator {
    pub fn new(rule: Box<dyn FlagRule>) -> Self {
        Self { rule }
    }

    pub fn from_config(config: &FlagRuleConfig) -> Self {
        match config {
            FlagRuleConfig::AttributionWindow {
                authorized_agencies,
                vta_window_hours,
                cta_window_days,
            } => Self::new(Box::new(WindowRule::new(
                authorized_agencies,
                *vta_window_hours,
                *cta_window_days,
            ))),
            FlagRuleConfig::ValuePattern { marker } => {
                Self::new(Box::new(ValuePatternRule::new(marker.clone())))
            }
        }
    }

    pub fn rule_name(&self) -> &'static str {
        self.rule.name()
    }

    /// Classify a single record against a set's resolved columns.
    pub fn classify(&self, record: &EventRecord, fields: &ResolvedFields) -> Option<FlagReason> {
        self.rule.evaluate(record, fields)
    }

    /// Record the classification on every delivered event and return the
    /// flagged subset. Expects NORMALIZE to have run.
    pub fn apply(&self, delivered: &mut EventSet) -> EventSet {
        if delivered.is_empty() {
            return EventSet::new(EventCategory::Flagged);
        }

        let fields = ResolvedFields::for_set(delivered);
        if !self.rule.applicable(&fields) {
            log::warn!(
                "flag: rule '{}' cannot run against this export (missing columns); nothing flagged",
                self.rule.name()
            );
            return delivered.subset(EventCategory::Flagged, |_| false);
        }

        delivered.update_derived(|r| {
            let mut d = r.derived.clone();
            d.flag = self.classify(r, &fields);
            d
        });

        let flagged = delivered.subset(EventCategory::Flagged, |r| r.derived.is_flagged());
        log::info!(
            "flag: rule '{}' flagged {} of {} events",
            self.rule.name(),
            flagged.len(),
            delivered.len()
        );
        flagged
    }
}
