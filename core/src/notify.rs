//! Run notification: one Slack message covering every program.
//!
//! RULES:
//!   - Notification never fails a run. Every transport error is logged and
//!     reported as NotifyOutcome::Failed.
//!   - The message is built from stored totals only (see ReportEngine::digest).
//!   - Channel mode uploads every sheet of each program's workbook first and
//!     links the permalinks; webhook mode links the CI run page instead.

use crate::{
    aggregate::{ProgramTotals, SummaryRow},
    config::SlackConfig,
    error::{ReportError, ReportResult},
    period::ReportPeriod,
    render::RenderedWorkbook,
    types::ProgramId,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;

const FILES_UPLOAD_URL: &str = "https://slack.com/api/files.upload";
const POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";

/// Everything the message needs to know about one program's results.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramDigest {
    pub program_id:    ProgramId,
    pub label:         String,
    pub event_name:    String,
    pub flagged_label: String,
    pub totals:        ProgramTotals,
    pub top_agencies:  Vec<SummaryRow>,
    /// Download links for the program's sheets, once uploaded.
    pub report_links:  Vec<ReportLink>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportLink {
    pub title: String,
    pub url:   String,
}

/// A rendered file to attach to the message for one program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub program_id: ProgramId,
    /// Sheet name, used as the link text.
    pub title:      String,
    /// Upload name; unique across programs.
    pub file_name:  String,
    pub path:       PathBuf,
}

impl Attachment {
    /// One attachment per sheet, in workbook order.
    pub fn for_workbook(program_id: &str, workbook: &RenderedWorkbook) -> Vec<Self> {
        let prefix = workbook
            .dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        workbook
            .sheets
            .iter()
            .map(|path| {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                Self {
                    program_id: program_id.to_string(),
                    title:      path
                        .file_stem()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    file_name:  if prefix.is_empty() { name } else { format!("{prefix}_{name}") },
                    path:       path.clone(),
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyMode {
    Channel { bot_token: String, channel_id: String },
    Webhook { url: String },
    Disabled,
}

impl NotifyMode {
    /// Bot token + channel wins over a webhook; neither means disabled.
    pub fn from_config(slack: &SlackConfig) -> Self {
        match (&slack.bot_token, &slack.channel_id, &slack.webhook_url) {
            (Some(bot_token), Some(channel_id), _) => Self::Channel {
                bot_token:  bot_token.clone(),
                channel_id: channel_id.clone(),
            },
            (_, _, Some(url)) => Self::Webhook { url: url.clone() },
            _ => Self::Disabled,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Channel { .. } => "channel",
            Self::Webhook { .. } => "webhook",
            Self::Disabled       => "disabled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Sent,
    Skipped,
    Failed,
}

// ── Message ──────────────────────────────────────────────────────────────────

/// 1234567 → "1,234,567"
pub fn format_thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if n < 0 {
        out.insert(0, '-');
    }
    out
}

fn program_section(digest: &ProgramDigest) -> Value {
    let t = &digest.totals;
    let text = format!(
        "*{}* (`{}`)\n• Delivered: *{}*\n• Fraud (P360): *{}* ({:.1}%)\n• {}: *{}* ({:.1}%)\n• Net Valid: *{}*",
        digest.label.to_uppercase(),
        digest.event_name,
        format_thousands(t.delivered as i64),
        format_thousands(t.fraud as i64),
        t.fraud_rate_pct,
        digest.flagged_label,
        format_thousands(t.flagged as i64),
        t.flag_rate_pct,
        format_thousands(t.net_valid),
    );
    json!({ "type": "section", "text": { "type": "mrkdwn", "text": text } })
}

fn top_agencies_context(digest: &ProgramDigest) -> Option<Value> {
    if digest.top_agencies.is_empty() {
        return None;
    }
    let lines: Vec<String> = digest
        .top_agencies
        .iter()
        .enumerate()
        .map(|(i, row)| {
            format!(
                "{}. {}: {} net valid of {} delivered",
                i + 1,
                row.agency,
                format_thousands(row.net_valid),
                format_thousands(row.delivered as i64)
            )
        })
        .collect();
    Some(json!({
        "type": "context",
        "elements": [{
            "type": "mrkdwn",
            "text": format!("Top agencies by net valid\n{}", lines.join("\n")),
        }],
    }))
}

/// Slack Block Kit blocks for the whole run.
///
/// Download links come from each digest's `report_links`, one line per
/// program; when no digest has any and `artifact_url` is given, a single CI
/// link is added instead.
pub fn build_blocks(period: &ReportPeriod, digests: &[ProgramDigest], artifact_url: Option<&str>) -> Vec<Value> {
    let mut blocks = vec![json!({
        "type": "header",
        "text": {
            "type": "plain_text",
            "text": format!(":bar_chart: Monthly AppsFlyer Partner Report - {}", period.month_name()),
            "emoji": true,
        },
    })];

    for (i, digest) in digests.iter().enumerate() {
        if i > 0 {
            blocks.push(json!({ "type": "divider" }));
        }
        blocks.push(program_section(digest));
        if let Some(context) = top_agencies_context(digest) {
            blocks.push(context);
        }
    }

    let links: Vec<String> = digests
        .iter()
        .filter(|d| !d.report_links.is_empty())
        .map(|d| {
            let sheets: Vec<String> = d
                .report_links
                .iter()
                .map(|link| format!("<{}|{}>", link.url, link.title))
                .collect();
            format!("• *{}*: {}", d.label, sheets.join(" | "))
        })
        .collect();

    if !links.is_empty() {
        blocks.push(json!({ "type": "divider" }));
        blocks.push(json!({
            "type": "section",
            "text": { "type": "mrkdwn", "text": format!(":paperclip: *Download Reports:*\n{}", links.join("\n")) },
        }));
    } else if let Some(url) = artifact_url {
        blocks.push(json!({ "type": "divider" }));
        blocks.push(json!({
            "type": "section",
            "text": {
                "type": "mrkdwn",
                "text": format!(":paperclip: <{url}|Download Reports> (requires GitHub access)"),
            },
        }));
    }
    blocks
}

/// Plain-text fallback shown by clients that cannot render blocks.
pub fn fallback_text(period: &ReportPeriod) -> String {
    format!("Monthly AppsFlyer Partner Report - {}", period.month_name())
}

// ── Slack transport ──────────────────────────────────────────────────────────

pub struct SlackNotifier {
    client:       reqwest::blocking::Client,
    mode:         NotifyMode,
    artifact_url: Option<String>,
}

impl SlackNotifier {
    pub fn new(slack: &SlackConfig) -> ReportResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            mode: NotifyMode::from_config(slack),
            artifact_url: slack.artifact_url.clone(),
        })
    }

    pub fn mode(&self) -> &NotifyMode {
        &self.mode
    }

    /// Send the run message. Never returns an error; see NotifyOutcome.
    pub fn notify(
        &self,
        period: &ReportPeriod,
        mut digests: Vec<ProgramDigest>,
        attachments: &[Attachment],
    ) -> NotifyOutcome {
        let result = match &self.mode {
            NotifyMode::Disabled => {
                log::info!("notify: no Slack credentials configured, skipping notification");
                return NotifyOutcome::Skipped;
            }
            NotifyMode::Channel { bot_token, channel_id } => {
                log::info!("notify: posting to channel {channel_id}");
                for attachment in attachments {
                    let Some(url) = self.upload(bot_token, channel_id, attachment) else {
                        continue;
                    };
                    if let Some(d) = digests.iter_mut().find(|d| d.program_id == attachment.program_id) {
                        d.report_links.push(ReportLink { title: attachment.title.clone(), url });
                    }
                }
                let blocks = build_blocks(period, &digests, None);
                self.post_to_channel(bot_token, channel_id, period, blocks)
            }
            NotifyMode::Webhook { url } => {
                log::info!("notify: posting to webhook (files are not attached)");
                let blocks = build_blocks(period, &digests, self.artifact_url.as_deref());
                self.post_to_webhook(url, blocks)
            }
        };

        match result {
            Ok(()) => {
                log::info!("notify: Slack message sent ({})", self.mode.name());
                NotifyOutcome::Sent
            }
            Err(e) => {
                log::warn!("notify: Slack message failed ({}): {e}", self.mode.name());
                NotifyOutcome::Failed
            }
        }
    }

    /// Upload one file; returns its permalink. Failures are logged.
    fn upload(&self, bot_token: &str, channel_id: &str, attachment: &Attachment) -> Option<String> {
        let path = attachment.path.as_path();
        match self.try_upload(bot_token, channel_id, attachment) {
            Ok(link) => {
                log::info!("notify: uploaded {}", path.display());
                Some(link)
            }
            Err(e) => {
                log::warn!("notify: upload of {} failed: {e}", path.display());
                None
            }
        }
    }

    fn try_upload(&self, bot_token: &str, channel_id: &str, attachment: &Attachment) -> ReportResult<String> {
        let form = reqwest::blocking::multipart::Form::new()
            .text("channels", channel_id.to_string())
            .text("filename", attachment.file_name.clone())
            .text("title", attachment.file_name.clone())
            .file("file", &attachment.path)?;

        let body: Value = self
            .client
            .post(FILES_UPLOAD_URL)
            .bearer_auth(bot_token)
            .multipart(form)
            .send()?
            .error_for_status()?
            .json()?;
        slack_ok(&body)?;

        Ok(body["file"]["permalink"].as_str().unwrap_or_default().to_string())
    }

    fn post_to_channel(
        &self,
        bot_token: &str,
        channel_id: &str,
        period: &ReportPeriod,
        blocks: Vec<Value>,
    ) -> ReportResult<()> {
        let payload = json!({
            "channel": channel_id,
            "text": fallback_text(period),
            "blocks": blocks,
        });
        let body: Value = self
            .client
            .post(POST_MESSAGE_URL)
            .bearer_auth(bot_token)
            .json(&payload)
            .send()?
            .error_for_status()?
            .json()?;
        slack_ok(&body)
    }

    fn post_to_webhook(&self, url: &str, blocks: Vec<Value>) -> ReportResult<()> {
        let response = self.client.post(url).json(&json!({ "blocks": blocks })).send()?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(anyhow::anyhow!("webhook returned {status}: {text}").into());
        }
        Ok(())
    }
}

/// Slack Web API answers 200 with `"ok": false` on logical errors.
fn slack_ok(body: &Value) -> ReportResult<()> {
    if body["ok"].as_bool() == Some(true) {
        return Ok(());
    }
    let error = body["error"].as_str().unwrap_or("unknown error");
    Err(ReportError::Other(anyhow::anyhow!("Slack API error: {error}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn period() -> ReportPeriod {
        ReportPeriod::previous_month(NaiveDate::from_ymd_opt(2026, 10, 16).expect("valid date"))
    }

    fn digest(id: &str, label: &str) -> ProgramDigest {
        ProgramDigest {
            program_id:    id.into(),
            label:         label.into(),
            event_name:    "Signup".into(),
            flagged_label: "Outside Attribution".into(),
            totals:        ProgramTotals::new(12_345, 1_234, 100, 11_011),
            top_agencies:  vec![SummaryRow::new("alpha".into(), 10_000, 1_000, 50)],
            report_links:  Vec::new(),
        }
    }

    #[test]
    fn thousands_separators() {
        assert_eq!(format_thousands(0), "0");
        assert_eq!(format_thousands(999), "999");
        assert_eq!(format_thousands(1_000), "1,000");
        assert_eq!(format_thousands(1_234_567), "1,234,567");
        assert_eq!(format_thousands(-12_345), "-12,345");
    }

    #[test]
    fn mode_prefers_channel_over_webhook() {
        let slack = SlackConfig {
            bot_token:    Some("xoxb".into()),
            channel_id:   Some("C1".into()),
            webhook_url:  Some("https://hooks.example/1".into()),
            artifact_url: None,
        };
        assert_eq!(NotifyMode::from_config(&slack).name(), "channel");

        let webhook_only = SlackConfig { bot_token: None, ..slack.clone() };
        assert_eq!(NotifyMode::from_config(&webhook_only).name(), "webhook");

        assert_eq!(NotifyMode::from_config(&SlackConfig::default()), NotifyMode::Disabled);
    }

    #[test]
    fn blocks_carry_totals_with_rates_and_separators() {
        let blocks = build_blocks(&period(), &[digest("kikoff", "Kikoff")], None);
        let header = blocks[0]["text"]["text"].as_str().unwrap_or_default();
        assert!(header.contains("September 2026"), "header: {header}");

        let section = blocks[1]["text"]["text"].as_str().unwrap_or_default();
        assert!(section.contains("*KIKOFF*"), "section: {section}");
        assert!(section.contains("Delivered: *12,345*"), "section: {section}");
        assert!(section.contains("*1,234* (10.0%)"), "section: {section}");
        assert!(section.contains("Outside Attribution: *100* (0.8%)"), "section: {section}");
        assert!(section.contains("Net Valid: *11,011*"), "section: {section}");

        assert_eq!(blocks[2]["type"], "context", "top agencies follow the section");
    }

    fn link(title: &str, url: &str) -> ReportLink {
        ReportLink { title: title.into(), url: url.into() }
    }

    #[test]
    fn report_links_take_precedence_over_artifact_url() {
        let mut d = digest("kikoff", "Kikoff");
        d.report_links = vec![link("Summary", "https://files.example/k")];
        let blocks = build_blocks(&period(), &[d], Some("https://ci.example/run/1"));
        let last = blocks.last().map(|b| b["text"]["text"].to_string()).unwrap_or_default();
        assert!(last.contains("<https://files.example/k|Summary>"), "last: {last}");
        assert!(!last.contains("ci.example"));
    }

    #[test]
    fn every_uploaded_sheet_is_linked_on_its_program_line() {
        let mut kikoff = digest("kikoff", "Kikoff");
        kikoff.report_links = vec![
            link("Summary", "https://files.example/1"),
            link("Delivered Events", "https://files.example/2"),
            link("Fraud Events", "https://files.example/3"),
            link("Outside Attribution Events", "https://files.example/4"),
        ];
        let grant = digest("grant", "Grant");
        let blocks = build_blocks(&period(), &[kikoff, grant], None);
        let last = blocks.last().map(|b| b["text"]["text"].as_str().unwrap_or_default().to_string()).unwrap_or_default();

        let lines: Vec<&str> = last.lines().skip(1).collect();
        assert_eq!(lines.len(), 1, "programs without uploads get no line: {last}");
        assert!(lines[0].starts_with("• *Kikoff*: "), "line: {}", lines[0]);
        for n in 1..=4 {
            assert!(lines[0].contains(&format!("https://files.example/{n}")), "line: {}", lines[0]);
        }
        assert!(lines[0].contains("|Outside Attribution Events>"), "line: {}", lines[0]);
    }

    #[test]
    fn workbook_yields_one_attachment_per_sheet() {
        let workbook = RenderedWorkbook {
            dir:    PathBuf::from("/out/Appsflyer_Kikoff_202609"),
            sheets: ["Summary", "Delivered Events", "Fraud Events", "Outside Attribution Events"]
                .iter()
                .map(|s| PathBuf::from(format!("/out/Appsflyer_Kikoff_202609/{s}.csv")))
                .collect(),
        };
        let attachments = Attachment::for_workbook("kikoff", &workbook);

        assert_eq!(attachments.len(), 4);
        assert!(attachments.iter().all(|a| a.program_id == "kikoff"));
        let titles: Vec<&str> = attachments.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["Summary", "Delivered Events", "Fraud Events", "Outside Attribution Events"]);
        assert_eq!(attachments[1].file_name, "Appsflyer_Kikoff_202609_Delivered Events.csv");
        assert_eq!(attachments[3].path, workbook.sheets[3]);
    }

    #[test]
    fn artifact_url_used_when_nothing_uploaded() {
        let blocks = build_blocks(&period(), &[digest("grant", "Grant Cash Advance")], Some("https://ci.example/run/1"));
        let last = blocks.last().map(|b| b["text"]["text"].to_string()).unwrap_or_default();
        assert!(last.contains("https://ci.example/run/1"), "last: {last}");
    }

    #[test]
    fn programs_are_separated_by_dividers() {
        let blocks = build_blocks(&period(), &[digest("kikoff", "Kikoff"), digest("grant", "Grant")], None);
        let dividers = blocks.iter().filter(|b| b["type"] == "divider").count();
        assert_eq!(dividers, 1);
    }
}
