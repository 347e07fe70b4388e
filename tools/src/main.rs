//! report-runner: monthly attribution reconciliation for every configured program.
//!
//! Usage:
//!   report-runner --config data/programs.json --out /tmp
//!   report-runner --today 2026-10-01 --no-notify --top 10
//!   report-runner --json

use anyhow::{Context, Result};
use attribution_core::{
    config::ReportConfig,
    engine::ReportEngine,
    notify::{Attachment, NotifyOutcome, SlackNotifier},
    period::ReportPeriod,
    reconcile::ProgramReport,
    render::{CsvWorkbookRenderer, RenderedWorkbook, ReportRenderer},
    source::HttpReportSource,
};
use chrono::NaiveDate;
use std::env;
use std::path::PathBuf;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let config_path = parse_str_arg(&args, "--config").unwrap_or("data/programs.json");
    let no_notify = args.iter().any(|a| a == "--no-notify");
    let as_json = args.iter().any(|a| a == "--json");

    let mut config = ReportConfig::load(&PathBuf::from(config_path))?;
    if let Some(out) = parse_str_arg(&args, "--out") {
        config.output_dir = PathBuf::from(out);
    }
    config.top_n = parse_arg(&args, "--top", config.top_n);

    let today = match parse_str_arg(&args, "--today") {
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .with_context(|| format!("--today expects YYYY-MM-DD, got '{s}'"))?,
        None => chrono::Local::now().date_naive(),
    };
    let period = ReportPeriod::previous_month(today);

    if !as_json {
        println!("Attribution report runner");
        println!("  config:   {config_path}");
        println!("  period:   {} to {}", period.from_param(), period.to_param());
        println!("  out:      {}", config.output_dir.display());
        println!("  programs: {}", config.programs.len());
        println!();
    }

    let source = HttpReportSource::new(&config.api)?;
    let engine = ReportEngine::build(&config, period, Box::new(source))?;
    let reports = engine.run()?;

    let renderer = CsvWorkbookRenderer::new(&config.output_dir);
    let mut workbooks: Vec<(String, RenderedWorkbook)> = Vec::with_capacity(reports.len());
    for report in &reports {
        let program = config.program(&report.program_id)?;
        match renderer.render(program, report, &period) {
            Ok(wb) => workbooks.push((report.program_id.clone(), wb)),
            Err(e) => log::error!("{}: workbook not written: {e}", report.program_id),
        }
    }

    let digests = config
        .programs
        .iter()
        .map(|p| engine.digest(p, config.top_n))
        .collect::<Result<Vec<_>, _>>()?;

    let outcome = if no_notify {
        log::info!("notify: disabled by --no-notify");
        NotifyOutcome::Skipped
    } else {
        let attachments: Vec<Attachment> = workbooks
            .iter()
            .flat_map(|(id, wb)| Attachment::for_workbook(id, wb))
            .collect();
        SlackNotifier::new(&config.slack)?.notify(&period, digests, &attachments)
    };

    if as_json {
        let tables: Vec<_> = reports
            .iter()
            .map(|r| serde_json::json!({ "program_id": r.program_id, "summary": r.summary }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&tables)?);
    } else {
        print_summary(&engine, &reports, &workbooks, outcome)?;
    }
    Ok(())
}

fn print_summary(
    engine: &ReportEngine,
    reports: &[ProgramReport],
    workbooks: &[(String, RenderedWorkbook)],
    outcome: NotifyOutcome,
) -> Result<()> {
    println!("=== RUN SUMMARY ===");
    println!("  run_id:   {}", engine.run_id);
    println!("  month:    {}", engine.period.month_name());
    for report in reports {
        let t = engine.store.program_totals(&engine.run_id, &report.program_id)?;
        println!();
        println!("  {} ({} agencies)", report.label, report.summary.rows.len());
        println!("    delivered:  {}", t.delivered);
        println!("    fraud:      {} ({:.1}%)", t.fraud, t.fraud_rate_pct);
        println!(
            "    {:<11} {} ({:.1}%)",
            format!("{}:", report.summary.flagged_column),
            t.flagged,
            t.flag_rate_pct
        );
        println!("    net valid:  {}", t.net_valid);
        if let Some((_, wb)) = workbooks.iter().find(|(id, _)| *id == report.program_id) {
            println!("    workbook:   {}", wb.dir.display());
        }
    }
    println!();
    println!("  notification: {outcome:?}");
    Ok(())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn parse_str_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}
