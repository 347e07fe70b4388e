//! PULL stage: raw report retrieval.
//!
//! The source only fetches CSV text. Parsing, per-platform merging and the
//! organic filter happen in `pull_program_sets`, so every source behaves the
//! same. A failed fetch is "no data", never a failed run.

use crate::{
    config::{ApiConfig, ProgramConfig},
    error::ReportResult,
    period::ReportPeriod,
    record::EventSet,
    schema::{resolve, LogicalField},
    types::{EventCategory, Platform},
};
use std::time::Duration;

const ORGANIC: &str = "organic";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    /// Attributed in-app events ("delivered").
    InAppEvents,
    /// Protect360 post-attribution in-app fraud.
    FraudInAppEvents,
}

impl ReportKind {
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::InAppEvents      => "in_app_events_report/v5",
            Self::FraudInAppEvents => "fraud-post-inapps/v5",
        }
    }

    pub fn category(&self) -> EventCategory {
        match self {
            Self::InAppEvents      => EventCategory::Delivered,
            Self::FraudInAppEvents => EventCategory::Fraud,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PullRequest<'a> {
    pub app_id:     &'a str,
    pub platform:   Platform,
    pub kind:       ReportKind,
    pub period:     &'a ReportPeriod,
    pub event_name: &'a str,
}

/// The contract every report source fulfills.
pub trait ReportSource {
    /// Raw CSV for one app and report kind. `Ok(None)` means no data.
    fn fetch(&self, request: &PullRequest<'_>) -> ReportResult<Option<String>>;
}

// ── HTTP source ──────────────────────────────────────────────────────────────

pub struct HttpReportSource {
    client:   reqwest::blocking::Client,
    base_url: String,
    token:    Option<String>,
}

impl HttpReportSource {
    pub fn new(api: &ApiConfig) -> ReportResult<Self> {
        if api.token.is_none() {
            log::warn!("pull: APPSFLYER_API_TOKEN is not set; requests will be unauthenticated");
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self {
            client,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            token: api.token.clone(),
        })
    }

    fn url(&self, request: &PullRequest<'_>) -> String {
        format!("{}/{}/{}", self.base_url, request.app_id, request.kind.endpoint())
    }
}

impl ReportSource for HttpReportSource {
    fn fetch(&self, request: &PullRequest<'_>) -> ReportResult<Option<String>> {
        let url = self.url(request);
        log::info!(
            "pull: {:?} for {} ({} to {})",
            request.kind,
            request.app_id,
            request.period.from_param(),
            request.period.to_param()
        );
        log::debug!("pull: GET {url}");

        let mut req = self
            .client
            .get(&url)
            .header("Accept", "text/csv")
            .query(&[
                ("from", request.period.from_param()),
                ("to", request.period.to_param()),
                ("event_name", request.event_name.to_string()),
            ]);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let response = req.send()?;
        let status = response.status();
        let body = response.text()?;

        if !status.is_success() {
            let excerpt: String = body.chars().take(500).collect();
            log::warn!("pull: {} returned {status}: {excerpt}", request.app_id);
            return Ok(None);
        }
        if body.trim().is_empty() {
            log::info!("pull: {} returned no data", request.app_id);
            return Ok(None);
        }
        Ok(Some(body))
    }
}

// ── Program-level pull ───────────────────────────────────────────────────────

/// Delivered and fraud sets for one program, merged across platforms.
#[derive(Debug, Clone)]
pub struct ProgramSets {
    pub delivered: EventSet,
    pub fraud:     EventSet,
}

impl ProgramSets {
    pub fn empty() -> Self {
        Self {
            delivered: EventSet::new(EventCategory::Delivered),
            fraud:     EventSet::new(EventCategory::Fraud),
        }
    }
}

/// Pull both reports for every app of a program. Any failure for one
/// app/report is logged and treated as an empty report.
pub fn pull_program_sets(
    source: &dyn ReportSource,
    program: &ProgramConfig,
    period: &ReportPeriod,
) -> ProgramSets {
    let mut sets = ProgramSets::empty();

    for app in &program.apps {
        for kind in [ReportKind::InAppEvents, ReportKind::FraudInAppEvents] {
            let request = PullRequest {
                app_id: &app.app_id,
                platform: app.platform,
                kind,
                period,
                event_name: &program.event_name,
            };
            let Some(set) = fetch_set(source, &request) else { continue };
            log::info!("pull: {} {:?} rows from {}", set.len(), kind, app.app_id);
            match kind {
                ReportKind::InAppEvents      => sets.delivered.extend(set),
                ReportKind::FraudInAppEvents => sets.fraud.extend(set),
            }
        }
    }

    for set in [&mut sets.delivered, &mut sets.fraud] {
        let removed = remove_organic(set);
        if removed > 0 {
            log::info!(
                "pull: removed {removed} organic {} events, {} remain",
                set.category.as_str(),
                set.len()
            );
        }
    }
    sets
}

fn fetch_set(source: &dyn ReportSource, request: &PullRequest<'_>) -> Option<EventSet> {
    let text = match source.fetch(request) {
        Ok(Some(text)) => text,
        Ok(None) => return None,
        Err(e) => {
            log::warn!("pull: {:?} for {} failed: {e}", request.kind, request.app_id);
            return None;
        }
    };
    match EventSet::from_csv(request.kind.category(), &text, Some(request.platform)) {
        Ok(set) => Some(set),
        Err(e) => {
            log::warn!("pull: unreadable CSV from {}: {e}", request.app_id);
            None
        }
    }
}

/// Drop records whose attribution source is "organic" (case-insensitive).
/// Returns the number removed; a set without a source column is untouched.
pub fn remove_organic(set: &mut EventSet) -> usize {
    let Some(col) = resolve(set, LogicalField::Source) else { return 0 };
    let before = set.len();
    set.retain(|r| {
        !r.get(&col)
            .map(|v| v.trim().eq_ignore_ascii_case(ORGANIC))
            .unwrap_or(false)
    });
    before - set.len()
}
