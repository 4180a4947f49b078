//! Configuration types for the chore ledger daemon.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ChoreError, Result};
use crate::scheduler::tasks::{Weekday, parse_time_of_day};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChoreConfig {
    /// Ledger database settings.
    pub store: StoreConfig,
    /// Wall-clock boundaries for the background triggers.
    pub schedule: ScheduleConfig,
    /// Summary wording and allowance conversion.
    pub summary: SummaryConfig,
    /// Where composed summaries are delivered.
    pub notifier: NotifierConfig,
}

/// Ledger database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file.
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Default database location: `<data dir>/chorekeeper/chorekeeper.db`,
/// falling back to the working directory.
pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("chorekeeper").join("chorekeeper.db"))
        .unwrap_or_else(|| PathBuf::from("chorekeeper.db"))
}

/// Trigger boundaries. Times are local `HH:MM`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// When the next day's instances are materialized.
    pub rollover_at: String,
    /// When the daily summary is sent.
    pub daily_summary_at: String,
    /// Day of the weekly summary and the points reset that follows it.
    pub weekly_summary_day: Weekday,
    /// Time of the weekly summary.
    pub weekly_summary_at: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            rollover_at: "00:00".to_owned(),
            daily_summary_at: "23:59".to_owned(),
            weekly_summary_day: Weekday::Sunday,
            weekly_summary_at: "23:59".to_owned(),
        }
    }
}

/// Summary composition settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Monetary value of one point in the weekly allowance line.
    pub allowance_per_point: f64,
    /// Prefix for allowance amounts.
    pub currency_symbol: String,
    pub daily_subject: String,
    pub weekly_subject: String,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            allowance_per_point: 0.10,
            currency_symbol: "$".to_owned(),
            daily_subject: "Daily Chore Summary".to_owned(),
            weekly_subject: "Weekly Chore Summary".to_owned(),
        }
    }
}

/// Notification transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotifierConfig {
    /// Write summaries to the log only.
    #[default]
    Log,
    /// POST each summary as JSON to an HTTP endpoint (e.g. a mail relay).
    Webhook {
        url: String,
        #[serde(default)]
        bearer_token: Option<String>,
        #[serde(default = "default_webhook_timeout_secs")]
        timeout_secs: u64,
    },
}

fn default_webhook_timeout_secs() -> u64 {
    10
}

impl ChoreConfig {
    /// Load and validate configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ChoreError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: Self =
            toml::from_str(&content).map_err(|e| ChoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration as pretty TOML, creating parent directories.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ChoreError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject malformed times, a negative allowance rate, or an empty webhook URL.
    pub fn validate(&self) -> Result<()> {
        parse_time_of_day(&self.schedule.rollover_at)?;
        parse_time_of_day(&self.schedule.daily_summary_at)?;
        parse_time_of_day(&self.schedule.weekly_summary_at)?;

        let rate = self.summary.allowance_per_point;
        if !rate.is_finite() || rate < 0.0 {
            return Err(ChoreError::Validation(format!(
                "allowance_per_point must be a non-negative number, got {rate}"
            )));
        }

        if let NotifierConfig::Webhook { url, .. } = &self.notifier {
            if url.trim().is_empty() {
                return Err(ChoreError::Config("webhook notifier needs a url".to_owned()));
            }
        }
        Ok(())
    }
}
