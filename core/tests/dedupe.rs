//! Integration tests for the DEDUPE stage.
//!
//! Tests verify:
//! 1. Candidates already in the fraud feed are removed by customer/vendor key
//! 2. Identifier columns are resolved per set, including the token fallback
//! 3. Unresolvable identifiers skip the stage instead of failing
//! 4. Dedupe is idempotent

use attribution_core::{
    dedupe::{dedupe, dedupe_with_outcome, KeyColumns},
    record::{EventRecord, EventSet},
    types::EventCategory,
};

fn set(category: EventCategory, csv: &str) -> EventSet {
    EventSet::from_csv(category, csv, None).expect("fixture parses")
}

fn candidates() -> EventSet {
    set(
        EventCategory::Flagged,
        "agency,customer_user_id,appsflyer_id\n\
         alpha,c1,af1\n\
         alpha,c2,af2\n\
         beta,c3,af3\n\
         beta,,af4\n",
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 1: key matching
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn candidates_in_fraud_feed_are_removed() {
    let fraud = set(EventCategory::Fraud, "customer_user_id,appsflyer_id\nc2,af2\nc9,af9\n");
    let (kept, outcome) = dedupe_with_outcome(&candidates(), &fraud);

    assert_eq!(outcome.before, 4);
    assert_eq!(outcome.after, 3);
    assert!(!outcome.skipped);
    let ids: Vec<&str> = kept.iter().map(|r| r.get_or_empty("customer_user_id")).collect();
    assert_eq!(ids, vec!["c1", "c3", ""], "order of survivors is preserved");
    assert_eq!(kept.category, EventCategory::Flagged);
}

#[test]
fn both_identifiers_must_match() {
    let fraud = set(EventCategory::Fraud, "customer_user_id,appsflyer_id\nc1,af999\nc999,af3\n");
    let kept = dedupe(&candidates(), &fraud);
    assert_eq!(kept.len(), 4, "a partial key match removes nothing");
}

#[test]
fn missing_customer_id_matches_as_empty_string() {
    let fraud = set(EventCategory::Fraud, "customer_user_id,appsflyer_id\n,af4\n");
    let kept = dedupe(&candidates(), &fraud);
    assert_eq!(kept.len(), 3, "key '_af4' matches the candidate with no customer id");
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 2: per-set resolution
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn fraud_set_may_use_different_identifier_columns() {
    let fraud = set(EventCategory::Fraud, "Customer ID,Vendor ID\nc1,af1\n");
    let kept = dedupe(&candidates(), &fraud);
    assert_eq!(kept.len(), 3);
}

#[test]
fn token_fallback_finds_identifier_columns() {
    let fraud = set(EventCategory::Fraud, "af_customer_uid,appsflyer_device_id\nc3,af3\n");
    let cols = KeyColumns::for_set(&fraud).expect("token fallback resolves both ids");
    assert_eq!(cols.customer_id, "af_customer_uid");
    assert_eq!(cols.vendor_id, "appsflyer_device_id");

    let kept = dedupe(&candidates(), &fraud);
    assert_eq!(kept.len(), 3);
}

#[test]
fn match_key_joins_with_underscore() {
    let record = EventRecord::new(None, [("customer_user_id", "c1"), ("appsflyer_id", "af1")]);
    let cols = KeyColumns {
        customer_id: "customer_user_id".into(),
        vendor_id:   "appsflyer_id".into(),
    };
    assert_eq!(cols.match_key(&record), "c1_af1");
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 3: degrade to no-op
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn unresolvable_identifiers_skip_dedupe() {
    let fraud = set(EventCategory::Fraud, "agency,event_time\nalpha,2026-09-01\n");
    let (kept, outcome) = dedupe_with_outcome(&candidates(), &fraud);
    assert!(outcome.skipped);
    assert_eq!(kept, candidates(), "candidates pass through unchanged");
}

#[test]
fn empty_fraud_set_passes_candidates_through() {
    let (kept, outcome) = dedupe_with_outcome(&candidates(), &EventSet::new(EventCategory::Fraud));
    assert!(!outcome.skipped);
    assert_eq!(kept.len(), 4);
}

#[test]
fn empty_candidates_stay_empty() {
    let fraud = set(EventCategory::Fraud, "customer_user_id,appsflyer_id\nc1,af1\n");
    let kept = dedupe(&EventSet::new(EventCategory::Flagged), &fraud);
    assert!(kept.is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Test 4: idempotence
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn dedupe_is_idempotent() {
    let fraud = set(EventCategory::Fraud, "customer_user_id,appsflyer_id\nc1,af1\nc3,af3\n");
    let once = dedupe(&candidates(), &fraud);
    let twice = dedupe(&once, &fraud);
    assert_eq!(once, twice);
    assert_eq!(once.len(), 2);
}
