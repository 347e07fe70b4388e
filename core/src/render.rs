//! Workbook rendering.
//!
//! A workbook is a directory `Appsflyer_{Label}_{YYYYMM}/` holding one CSV per
//! sheet: Summary, Delivered Events, Fraud Events and the program's flagged
//! sheet. Sheet layout is fixed per program; rendering makes no decisions.

use crate::{
    config::ProgramConfig,
    error::ReportResult,
    period::ReportPeriod,
    record::{EventRecord, EventSet},
    reconcile::{ProgramReport, DELIVERED_COLUMN, FRAUD_COLUMN, FRAUD_RATE_COLUMN, NET_VALID_COLUMN},
    types::EventCategory,
};
use std::path::{Path, PathBuf};

pub const SUMMARY_SHEET: &str = "Summary";
pub const DELIVERED_SHEET: &str = "Delivered Events";
pub const FRAUD_SHEET: &str = "Fraud Events";
pub const NO_DATA: &str = "No data";

/// The contract every renderer fulfills.
pub trait ReportRenderer {
    fn render(
        &self,
        program: &ProgramConfig,
        report: &ProgramReport,
        period: &ReportPeriod,
    ) -> ReportResult<RenderedWorkbook>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedWorkbook {
    pub dir:    PathBuf,
    pub sheets: Vec<PathBuf>,
}

impl RenderedWorkbook {
    pub fn summary_path(&self) -> Option<&Path> {
        self.sheets.first().map(PathBuf::as_path)
    }
}

/// One sheet, ready to write.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name:   String,
    pub title:  Option<String>,
    pub header: Vec<String>,
    pub rows:   Vec<Vec<String>>,
}

// ── Sheet builders ───────────────────────────────────────────────────────────

/// Summary sheet with the fixed column order:
/// agency, delivered, fraud, fraud_rate_%, <flagged>, <flagged rate>, net_valid.
pub fn summary_sheet(program: &ProgramConfig, report: &ProgramReport, period: &ReportPeriod) -> Sheet {
    let columns = [
        "agency",
        DELIVERED_COLUMN,
        FRAUD_COLUMN,
        FRAUD_RATE_COLUMN,
        report.summary.flagged_column.as_str(),
        report.summary.flagged_rate_column.as_str(),
        NET_VALID_COLUMN,
    ];
    let rows = report
        .summary
        .rows
        .iter()
        .map(|r| {
            vec![
                r.agency.clone(),
                r.delivered.to_string(),
                r.fraud.to_string(),
                format!("{:.1}", r.fraud_rate_pct),
                r.flagged.to_string(),
                format!("{:.1}", r.flag_rate_pct),
                r.net_valid.to_string(),
            ]
        })
        .collect();

    Sheet {
        name:   SUMMARY_SHEET.into(),
        title:  Some(format!("{} Attribution Report - {}", program.label, period.month_name())),
        header: columns.iter().map(|c| title_case(c)).collect(),
        rows,
    }
}

/// Derived columns appended to a raw sheet, per category.
fn derived_columns(category: EventCategory) -> &'static [&'static str] {
    match category {
        EventCategory::Fraud => &["agency_normalized"],
        EventCategory::Delivered | EventCategory::Flagged => &[
            "agency_normalized",
            "touch_type_normalized",
            "lookback_hours",
            "is_flagged",
            "flag_reason",
        ],
    }
}

fn derived_value(record: &EventRecord, column: &str) -> String {
    let d = &record.derived;
    match column {
        "agency_normalized"     => d.agency.clone(),
        "touch_type_normalized" => d.touch_type.clone(),
        "lookback_hours"        => d.lookback_hours.to_string(),
        "is_flagged"            => d.is_flagged().to_string(),
        "flag_reason"           => d.flag_reason(),
        _                       => String::new(),
    }
}

/// Raw-record sheet: the export's columns followed by derived columns.
pub fn event_sheet(name: &str, set: &EventSet) -> Sheet {
    let derived = derived_columns(set.category);
    let header: Vec<String> = set
        .columns()
        .iter()
        .map(|c| title_case(c))
        .chain(derived.iter().map(|c| title_case(c)))
        .collect();

    let rows: Vec<Vec<String>> = set
        .iter()
        .map(|r| {
            set.columns()
                .iter()
                .map(|c| r.get_or_empty(c).to_string())
                .chain(derived.iter().map(|c| derived_value(r, c)))
                .collect::<Vec<String>>()
        })
        .collect();

    Sheet {
        name: name.into(),
        title: None,
        header,
        rows,
    }
}

/// "outside_attr_rate_%" → "Outside Attr Rate %"
pub fn title_case(column: &str) -> String {
    let mut out = String::with_capacity(column.len());
    let mut prev_alpha = false;
    for ch in column.replace('_', " ").chars() {
        if ch.is_alphabetic() {
            if prev_alpha {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(ch);
            prev_alpha = false;
        }
    }
    out
}

// ── CSV workbook ─────────────────────────────────────────────────────────────

pub struct CsvWorkbookRenderer {
    output_dir: PathBuf,
}

impl CsvWorkbookRenderer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self { output_dir: output_dir.into() }
    }

    pub fn workbook_dir(&self, program: &ProgramConfig, period: &ReportPeriod) -> PathBuf {
        self.output_dir
            .join(format!("Appsflyer_{}_{}", program.file_label(), period.yyyymm()))
    }
}

impl ReportRenderer for CsvWorkbookRenderer {
    fn render(
        &self,
        program: &ProgramConfig,
        report: &ProgramReport,
        period: &ReportPeriod,
    ) -> ReportResult<RenderedWorkbook> {
        let dir = self.workbook_dir(program, period);
        std::fs::create_dir_all(&dir)?;

        let sheets = [
            summary_sheet(program, report, period),
            event_sheet(DELIVERED_SHEET, &report.delivered),
            event_sheet(FRAUD_SHEET, &report.fraud),
            event_sheet(&program.flagged.sheet_name, &report.flagged),
        ];

        let mut paths = Vec::with_capacity(sheets.len());
        for sheet in &sheets {
            let path = dir.join(format!("{}.csv", sheet.name.replace('/', "-")));
            write_sheet(&path, sheet)?;
            paths.push(path);
        }
        log::info!("render: {} workbook saved to {}", program.label, dir.display());

        Ok(RenderedWorkbook { dir, sheets: paths })
    }
}

/// Write one sheet. An empty table is written as a single "No data" cell.
pub fn write_sheet(path: &Path, sheet: &Sheet) -> ReportResult<()> {
    let mut writer = csv::WriterBuilder::new().flexible(true).from_path(path)?;

    if let Some(title) = &sheet.title {
        writer.write_record([title.as_str()])?;
        writer.write_record([""])?;
    }

    if sheet.rows.is_empty() {
        writer.write_record([NO_DATA])?;
    } else {
        writer.write_record(&sheet.header)?;
        for row in &sheet.rows {
            writer.write_record(row)?;
        }
    }
    writer.flush()?;
    Ok(())
}
