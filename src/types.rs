use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Main configuration loaded from ~/.pontis/config.json
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Public export URL of the tracking sheet (CSV or XLSX)
    #[serde(default)]
    pub dataset_url: String,
    #[serde(default)]
    pub dataset_format: DatasetFormat,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default)]
    pub report: ReportPolicy,
    #[serde(default)]
    pub schedule: ScheduleEntry,
    #[serde(default)]
    pub columns: ColumnAliases,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

/// Upper bound for `cacheTtlSecs`: one day
pub const MAX_CACHE_TTL_SECS: u64 = 86_400;

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_fetch_timeout_secs() -> u64 {
    20
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dataset_url: String::new(),
            dataset_format: DatasetFormat::default(),
            cache_ttl_secs: default_cache_ttl_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            report: ReportPolicy::default(),
            schedule: ScheduleEntry::default(),
            columns: ColumnAliases::default(),
            telegram: TelegramConfig::default(),
        }
    }
}

impl Config {
    /// Apply environment overrides (BOT_TOKEN, PONTIS_DATASET_URL, PONTIS_TIMEZONE).
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup("BOT_TOKEN").filter(|v| !v.trim().is_empty()) {
            self.telegram.bot_token = Some(token.trim().to_string());
        }
        if let Some(url) = lookup("PONTIS_DATASET_URL").filter(|v| !v.trim().is_empty()) {
            self.dataset_url = url.trim().to_string();
        }
        if let Some(tz) = lookup("PONTIS_TIMEZONE").filter(|v| !v.trim().is_empty()) {
            self.schedule.timezone = tz.trim().to_string();
        }
    }

    /// Check the fields that cannot be defaulted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dataset_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "datasetUrl is empty. Set it in config.json or PONTIS_DATASET_URL".to_string(),
            ));
        }
        url::Url::parse(&self.dataset_url)
            .map_err(|e| ConfigError::Invalid(format!("datasetUrl '{}': {}", self.dataset_url, e)))?;
        self.schedule
            .timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| ConfigError::Invalid(format!("Invalid timezone: {}", self.schedule.timezone)))?;
        if self.cache_ttl_secs == 0 || self.cache_ttl_secs > MAX_CACHE_TTL_SECS {
            return Err(ConfigError::Invalid(format!(
                "cacheTtlSecs must be between 1 and {}, got {}",
                MAX_CACHE_TTL_SECS, self.cache_ttl_secs
            )));
        }
        crate::scheduler::parse_cron(&self.schedule.cron)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.report.max_block_chars < 200 {
            return Err(ConfigError::Invalid(format!(
                "report.maxBlockChars must be at least 200, got {}",
                self.report.max_block_chars
            )));
        }
        Ok(())
    }
}

/// Encoding of the exported dataset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetFormat {
    /// Sniff the payload: ZIP magic means XLSX, anything else CSV
    #[default]
    Auto,
    Csv,
    Xlsx,
}

/// What to do with records whose three milestones are all blank
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AllBlankPolicy {
    /// Classify like any other record
    #[default]
    Report,
    /// Leave the record out of the report
    Skip,
    /// Classify normally, and emit a "too early" line when nothing is due yet
    TooEarly,
}

/// Classification and packing rules for the pending-test report
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPolicy {
    #[serde(default = "default_max_block_chars")]
    pub max_block_chars: usize,
    /// Treat a literal `0` result as "not yet recorded"
    #[serde(default = "default_true")]
    pub zero_is_blank: bool,
    #[serde(default)]
    pub all_blank_policy: AllBlankPolicy,
}

fn default_max_block_chars() -> usize {
    crate::report::MAX_BLOCK
}

fn default_true() -> bool {
    true
}

impl Default for ReportPolicy {
    fn default() -> Self {
        Self {
            max_block_chars: default_max_block_chars(),
            zero_is_blank: true,
            all_blank_policy: AllBlankPolicy::default(),
        }
    }
}

/// Daily report schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub enabled: bool,
    pub cron: String,
    pub timezone: String,
}

impl Default for ScheduleEntry {
    /// 8 AM every day, central Mexico time
    fn default() -> Self {
        Self {
            enabled: true,
            cron: "0 8 * * *".to_string(),
            timezone: "America/Mexico_City".to_string(),
        }
    }
}

/// Column identifiers (already folded, see `normalize::column_id`) accepted
/// for each record field. The first alias present in the header wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnAliases {
    #[serde(default = "default_project")]
    pub project: Vec<String>,
    #[serde(default = "default_support")]
    pub support: Vec<String>,
    #[serde(default = "default_element_kind")]
    pub element_kind: Vec<String>,
    #[serde(default = "default_element_number")]
    pub element_number: Vec<String>,
    #[serde(default = "default_pour_date")]
    pub pour_date: Vec<String>,
    #[serde(default = "default_test_7d")]
    pub test_7d: Vec<String>,
    #[serde(default = "default_test_14d")]
    pub test_14d: Vec<String>,
    #[serde(default = "default_test_28d")]
    pub test_28d: Vec<String>,
    #[serde(default = "default_progress")]
    pub progress: Vec<String>,
}

fn aliases(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn default_project() -> Vec<String> {
    aliases(&["puente", "proyecto"])
}

fn default_support() -> Vec<String> {
    aliases(&["apoyo", "eje"])
}

fn default_element_kind() -> Vec<String> {
    aliases(&["elemento", "tipo_de_elemento", "tipo"])
}

fn default_element_number() -> Vec<String> {
    aliases(&["numero", "no", "no.", "num", "numero_de_elemento"])
}

fn default_pour_date() -> Vec<String> {
    aliases(&["fecha_de_vaciado", "fecha_vaciado", "fecha_de_colado", "fecha_colado", "fecha"])
}

fn default_test_7d() -> Vec<String> {
    aliases(&["7_dias", "7d", "ensayo_7_dias", "resistencia_7_dias"])
}

fn default_test_14d() -> Vec<String> {
    aliases(&["14_dias", "14d", "ensayo_14_dias", "resistencia_14_dias"])
}

fn default_test_28d() -> Vec<String> {
    aliases(&["28_dias", "28d", "ensayo_28_dias", "resistencia_28_dias"])
}

fn default_progress() -> Vec<String> {
    aliases(&["avance_(%)", "avance", "avance_%", "porcentaje_de_avance"])
}

impl Default for ColumnAliases {
    fn default() -> Self {
        Self {
            project: default_project(),
            support: default_support(),
            element_kind: default_element_kind(),
            element_number: default_element_number(),
            pour_date: default_pour_date(),
            test_7d: default_test_7d(),
            test_14d: default_test_14d(),
            test_28d: default_test_28d(),
            progress: default_progress(),
        }
    }
}

/// Telegram Bot API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,
    #[serde(default = "default_delivery_timeout_secs")]
    pub delivery_timeout_secs: u64,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    /// Chats subscribed at startup, before anyone sends /suscribir
    #[serde(default)]
    pub initial_recipients: Vec<String>,
}

fn default_delivery_timeout_secs() -> u64 {
    15
}

fn default_poll_timeout_secs() -> u64 {
    30
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            delivery_timeout_secs: default_delivery_timeout_secs(),
            poll_timeout_secs: default_poll_timeout_secs(),
            initial_recipients: Vec::new(),
        }
    }
}

/// How a report run was started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionTrigger {
    Scheduled,
    /// Fired late after a sleep/wake gap
    Missed,
}
