//! Event records and event sets.
//!
//! RULE: Raw vendor fields are never mutated after a record is built.
//! Every computed value lives in `Derived` and is recomputed each run.

use crate::{
    error::ReportResult,
    rules::FlagReason,
    schema::normalize_field_name,
    types::{Agency, EventCategory, Platform, UNKNOWN_AGENCY},
};
use std::collections::HashMap;

/// Column added to every pulled record so per-platform exports can be merged.
pub const PLATFORM_COLUMN: &str = "platform";

/// Values computed from the raw fields. Never vendor-supplied.
#[derive(Debug, Clone, PartialEq)]
pub struct Derived {
    pub agency:         Agency,
    pub touch_type:     String,
    pub lookback_hours: f64,
    pub flag:           Option<FlagReason>,
    normalized:         bool,
}

impl Default for Derived {
    fn default() -> Self {
        Self {
            agency:         UNKNOWN_AGENCY.to_string(),
            touch_type:     String::new(),
            lookback_hours: 0.0,
            flag:           None,
            normalized:     false,
        }
    }
}

impl Derived {
    pub fn new(agency: Agency, touch_type: String, lookback_hours: f64) -> Self {
        Self {
            agency,
            touch_type,
            lookback_hours,
            flag: None,
            normalized: true,
        }
    }

    pub fn is_normalized(&self) -> bool {
        self.normalized
    }

    pub fn is_flagged(&self) -> bool {
        self.flag.is_some()
    }

    /// Human-readable reason, empty when unflagged.
    pub fn flag_reason(&self) -> String {
        self.flag.as_ref().map(|r| r.to_string()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub platform: Option<Platform>,
    fields:       HashMap<String, String>,
    pub derived:  Derived,
}

impl EventRecord {
    /// Build a record from (column, value) pairs. Column names are normalized;
    /// empty cells are treated as missing.
    pub fn new<K, V>(platform: Option<Platform>, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut map = HashMap::new();
        for (k, v) in fields {
            let v: String = v.into();
            if !v.is_empty() {
                map.insert(normalize_field_name(k.as_ref()), v);
            }
        }
        if let Some(p) = platform {
            map.insert(PLATFORM_COLUMN.to_string(), p.as_str().to_string());
        }
        Self {
            platform,
            fields: map,
            derived: Derived::default(),
        }
    }

    /// Raw value of a (normalized) column, `None` if absent or empty.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }

    /// Raw value as a string, missing cells rendered as "".
    pub fn get_or_empty(&self, column: &str) -> &str {
        self.get(column).unwrap_or("")
    }

    fn field_names(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }
}

/// An ordered collection of records of one category, plus the ordered
/// column list of the raw export(s) they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct EventSet {
    pub category: EventCategory,
    columns:      Vec<String>,
    records:      Vec<EventRecord>,
}

impl EventSet {
    pub fn new(category: EventCategory) -> Self {
        Self {
            category,
            columns: Vec::new(),
            records: Vec::new(),
        }
    }

    /// Parse a raw CSV export. Header names are normalized
    /// (trimmed, lower-cased, spaces to underscores).
    pub fn from_csv(
        category: EventCategory,
        text: &str,
        platform: Option<Platform>,
    ) -> ReportResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::None)
            .from_reader(text.as_bytes());

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(normalize_field_name)
            .collect();

        let mut set = Self::new(category);
        for h in &headers {
            set.add_column(h);
        }
        if platform.is_some() {
            set.add_column(PLATFORM_COLUMN);
        }

        for row in reader.records() {
            let row = row?;
            let pairs = headers
                .iter()
                .zip(row.iter())
                .map(|(h, v)| (h.as_str(), v.to_string()));
            set.records.push(EventRecord::new(platform, pairs));
        }
        Ok(set)
    }

    /// Build a set from already-constructed records. Columns are collected in
    /// first-seen order (sorted within a record for determinism).
    pub fn from_records(category: EventCategory, records: Vec<EventRecord>) -> Self {
        let mut set = Self::new(category);
        for r in records {
            set.push(r);
        }
        set
    }

    pub fn push(&mut self, record: EventRecord) {
        let mut names: Vec<&String> = record.field_names().collect();
        names.sort();
        let missing: Vec<String> = names
            .into_iter()
            .filter(|n| !self.columns.contains(n))
            .cloned()
            .collect();
        self.columns.extend(missing);
        self.records.push(record);
    }

    /// Append another set (e.g. the other platform's export).
    pub fn extend(&mut self, other: EventSet) {
        for c in &other.columns {
            self.add_column(c);
        }
        self.records.extend(other.records);
    }

    fn add_column(&mut self, name: &str) {
        if !self.columns.iter().any(|c| c == name) {
            self.columns.push(name.to_string());
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EventRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn retain<F: FnMut(&EventRecord) -> bool>(&mut self, f: F) {
        self.records.retain(f);
    }

    /// Recompute derived values for every record. Raw fields are untouched.
    pub fn update_derived<F: FnMut(&EventRecord) -> Derived>(&mut self, mut f: F) {
        for r in &mut self.records {
            r.derived = f(r);
        }
    }

    /// Copy the matching records into a new set of another category,
    /// keeping this set's column layout.
    pub fn subset<F: FnMut(&EventRecord) -> bool>(&self, category: EventCategory, mut f: F) -> Self {
        Self {
            category,
            columns: self.columns.clone(),
            records: self.records.iter().filter(|r| f(r)).cloned().collect(),
        }
    }
}
