use crate::{
    error::{ReportError, ReportResult},
    types::{Platform, ProgramId},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_BASE_URL: &str = "https://hq1.appsflyer.com/api/raw-data/export/app";
pub const DEFAULT_VALUE_MARKER: &str = "00}";
pub const DEFAULT_TOP_N: usize = 5;

fn default_marker() -> String {
    DEFAULT_VALUE_MARKER.to_string()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

// ── Flag rules ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlagRuleConfig {
    AttributionWindow {
        authorized_agencies: Vec<String>,
        vta_window_hours:    f64,
        cta_window_days:     f64,
    },
    ValuePattern {
        #[serde(default = "default_marker")]
        marker: String,
    },
}

// ── Programs ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub platform: Platform,
    pub app_id:   String,
}

/// How the flagged category is named in the summary, workbook and message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlaggedCategoryConfig {
    /// Summary count column, e.g. "outside_attribution".
    pub column:      String,
    /// Summary rate column, e.g. "outside_attr_rate_%".
    pub rate_column: String,
    /// Workbook sheet holding the flagged raw events.
    pub sheet_name:  String,
    /// Label used in the notification.
    pub label:       String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgramConfig {
    pub id:         ProgramId,
    pub label:      String,
    pub event_name: String,
    pub apps:       Vec<AppConfig>,
    pub rule:       FlagRuleConfig,
    #[serde(default)]
    pub excluded_agencies: Vec<String>,
    pub flagged:    FlaggedCategoryConfig,
}

impl ProgramConfig {
    /// Short name used in file names, e.g. "Grant" for "Grant Cash Advance".
    pub fn file_label(&self) -> String {
        self.label
            .split_whitespace()
            .next()
            .unwrap_or(self.id.as_str())
            .to_string()
    }
}

// ── Collaborators ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    pub base_url: String,
    pub token:    Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlackConfig {
    pub bot_token:   Option<String>,
    pub channel_id:  Option<String>,
    pub webhook_url: Option<String>,
    /// CI run page linked from webhook messages, when known.
    pub artifact_url: Option<String>,
}

impl SlackConfig {
    pub fn from_env() -> Self {
        let artifact_url = match (env_var("GITHUB_REPOSITORY"), env_var("GITHUB_RUN_ID")) {
            (Some(repo), Some(run)) => Some(format!("https://github.com/{repo}/actions/runs/{run}")),
            _ => None,
        };
        Self {
            bot_token: env_var("SLACK_BOT_TOKEN"),
            channel_id: env_var("SLACK_CHANNEL_ID"),
            webhook_url: env_var("SLACK_WEBHOOK_URL"),
            artifact_url,
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

// ── Top-level config ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
struct ProgramCatalogFile {
    #[serde(default = "default_base_url")]
    base_url: String,
    programs: Vec<ProgramConfig>,
}

#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub api:        ApiConfig,
    pub slack:      SlackConfig,
    pub output_dir: PathBuf,
    pub top_n:      usize,
    pub programs:   Vec<ProgramConfig>,
}

impl ReportConfig {
    /// Load the program catalog from `path`; credentials come from the
    /// environment. In tests, use ReportConfig::default_test().
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {}: {e}", path.display()))?;
        let file: ProgramCatalogFile = serde_json::from_str(&content)?;
        if file.programs.is_empty() {
            anyhow::bail!("{} defines no programs", path.display());
        }

        Ok(Self {
            api: ApiConfig {
                base_url: file.base_url,
                token:    env_var("APPSFLYER_API_TOKEN"),
            },
            slack: SlackConfig::from_env(),
            output_dir: PathBuf::from("/tmp"),
            top_n: DEFAULT_TOP_N,
            programs: file.programs,
        })
    }

    pub fn program(&self, id: &str) -> ReportResult<&ProgramConfig> {
        self.programs
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| ReportError::ProgramNotFound { id: id.to_string() })
    }

    /// Config with hardcoded programs for use in tests.
    pub fn default_test() -> Self {
        Self {
            api: ApiConfig {
                base_url: DEFAULT_BASE_URL.into(),
                token:    None,
            },
            slack: SlackConfig::default(),
            output_dir: std::env::temp_dir(),
            top_n: DEFAULT_TOP_N,
            programs: vec![
                ProgramConfig {
                    id: "kikoff".into(),
                    label: "Kikoff".into(),
                    event_name: "CA Payment - Make Credit Line Success".into(),
                    apps: vec![
                        AppConfig { platform: Platform::Ios, app_id: "id1525159784".into() },
                        AppConfig { platform: Platform::Android, app_id: "com.kikoff".into() },
                    ],
                    rule: FlagRuleConfig::AttributionWindow {
                        authorized_agencies: vec!["adperiomedia".into(), "globalwidemedia".into()],
                        vta_window_hours: 6.0,
                        cta_window_days: 7.0,
                    },
                    excluded_agencies: vec![],
                    flagged: FlaggedCategoryConfig {
                        column:      "outside_attribution".into(),
                        rate_column: "outside_attr_rate_%".into(),
                        sheet_name:  "Outside Attribution Events".into(),
                        label:       "Outside Attribution".into(),
                    },
                },
                ProgramConfig {
                    id: "grant".into(),
                    label: "Grant Cash Advance".into(),
                    event_name: "First Time Offer Accepted".into(),
                    apps: vec![
                        AppConfig { platform: Platform::Ios, app_id: "id6472350114".into() },
                        AppConfig { platform: Platform::Android, app_id: "com.kikoff.theseus".into() },
                    ],
                    rule: FlagRuleConfig::ValuePattern {
                        marker: DEFAULT_VALUE_MARKER.into(),
                    },
                    excluded_agencies: vec!["mobiprobebd521".into(), "unknown".into()],
                    flagged: FlaggedCategoryConfig {
                        column:      "addl_fraud".into(),
                        rate_column: "addl_fraud_rate_%".into(),
                        sheet_name:  "Add'l Fraud Events".into(),
                        label:       "Add'l Fraud".into(),
                    },
                },
            ],
        }
    }
}
