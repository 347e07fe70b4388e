//! Integration tests for the CSV workbook renderer.

use attribution_core::{
    aggregate::{AgencyAggregate, SummaryTable},
    config::ReportConfig,
    normalize::normalize,
    period::ReportPeriod,
    reconcile::ProgramReport,
    record::EventSet,
    render::{title_case, CsvWorkbookRenderer, ReportRenderer, NO_DATA},
    types::EventCategory,
};
use chrono::NaiveDate;
use std::path::PathBuf;

fn period() -> ReportPeriod {
    ReportPeriod::previous_month(NaiveDate::from_ymd_opt(2026, 10, 16).expect("valid date"))
}

fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("attribution-render-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

fn empty_report(program_id: &str, flagged_column: &str, rate_column: &str) -> ProgramReport {
    let empty = AgencyAggregate::build(&EventSet::new(EventCategory::Delivered), "delivered", &[]);
    let flagged = AgencyAggregate::build(&EventSet::new(EventCategory::Flagged), flagged_column, &[]);
    ProgramReport {
        program_id: program_id.into(),
        label:      program_id.into(),
        summary:    SummaryTable::assemble(&empty, &empty, &flagged, rate_column),
        delivered:  EventSet::new(EventCategory::Delivered),
        fraud:      EventSet::new(EventCategory::Fraud),
        flagged:    EventSet::new(EventCategory::Flagged),
    }
}

#[test]
fn headers_are_title_cased() {
    assert_eq!(title_case("outside_attr_rate_%"), "Outside Attr Rate %");
    assert_eq!(title_case("net_valid"), "Net Valid");
    assert_eq!(title_case("customer_user_id"), "Customer User Id");
}

#[test]
fn workbook_is_named_after_program_and_month() {
    let config = ReportConfig::default_test();
    let renderer = CsvWorkbookRenderer::new("/out");
    let grant = config.program("grant").expect("grant configured");
    assert_eq!(
        renderer.workbook_dir(grant, &period()),
        PathBuf::from("/out/Appsflyer_Grant_202609")
    );
}

#[test]
fn empty_report_renders_no_data_sheets() {
    let config = ReportConfig::default_test();
    let program = config.program("kikoff").expect("kikoff configured");
    let report = empty_report("kikoff", "outside_attribution", "outside_attr_rate_%");

    let dir = scratch_dir();
    let wb = CsvWorkbookRenderer::new(&dir)
        .render(program, &report, &period())
        .expect("render");

    assert_eq!(wb.sheets.len(), 4);
    let summary = std::fs::read_to_string(wb.summary_path().expect("summary sheet")).expect("read summary");
    let lines: Vec<&str> = summary.lines().collect();
    assert_eq!(lines[0], "Kikoff Attribution Report - September 2026");
    assert_eq!(lines.last().copied(), Some(NO_DATA));

    let flagged_sheet = wb.dir.join("Outside Attribution Events.csv");
    assert!(flagged_sheet.exists(), "flagged sheet is named from config");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn summary_sheet_uses_fixed_column_order() {
    let config = ReportConfig::default_test();
    let program = config.program("grant").expect("grant configured");

    let mut delivered = EventSet::from_csv(
        EventCategory::Delivered,
        "Partner,Customer User ID,AppsFlyer ID,Event Value\nalpha,c1,a1,{v:1.00}\nalpha,c2,a2,{v:1.50}\n",
        None,
    )
    .expect("fixture parses");
    normalize(&mut delivered);

    let mut report = empty_report("grant", "addl_fraud", "addl_fraud_rate_%");
    report.label = program.label.clone();
    report.summary = SummaryTable::assemble(
        &AgencyAggregate::build(&delivered, "delivered", &[]),
        &AgencyAggregate::build(&EventSet::new(EventCategory::Fraud), "fraud", &[]),
        &AgencyAggregate::build(&delivered.subset(EventCategory::Flagged, |_| false), "addl_fraud", &[]),
        "addl_fraud_rate_%",
    );
    report.delivered = delivered;

    let dir = scratch_dir();
    let wb = CsvWorkbookRenderer::new(&dir)
        .render(program, &report, &period())
        .expect("render");

    let summary = std::fs::read_to_string(wb.summary_path().expect("summary sheet")).expect("read summary");
    let lines: Vec<&str> = summary.lines().collect();
    assert_eq!(lines[0], "Grant Cash Advance Attribution Report - September 2026");
    assert_eq!(
        lines[2],
        "Agency,Delivered,Fraud,Fraud Rate %,Addl Fraud,Addl Fraud Rate %,Net Valid"
    );
    assert_eq!(lines[3], "alpha,2,0,0.0,0,0.0,2");

    let raw = std::fs::read_to_string(wb.dir.join("Delivered Events.csv")).expect("read delivered");
    let header = raw.lines().next().unwrap_or_default();
    assert!(header.starts_with("Partner,Customer User Id,Appsflyer Id,Event Value"), "header: {header}");
    assert!(header.ends_with("Agency Normalized,Touch Type Normalized,Lookback Hours,Is Flagged,Flag Reason"), "header: {header}");

    let _ = std::fs::remove_dir_all(&dir);
}
