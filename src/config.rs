use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::models::enums::{PiiKind, SelectionPolicy};

/// Application-level constants
pub const APP_NAME: &str = "VaultMind";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Value shipped in sample `.env` files; treated as "not configured".
const PLACEHOLDER: &str = "placeholder";

pub const DEFAULT_VAULT_TABLE: &str = "persons";
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
pub const DEFAULT_MODEL_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_DETECT_URL: &str = "https://www.pii-mcp.dev/mcp";

/// Default tracing filter when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "vaultmind=info,vaultmind_lib=info,tower_http=warn"
}

/// Get the application data directory (platform data dir, falling back to the
/// working directory when none is known)
pub fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

pub fn default_database_path() -> PathBuf {
    app_data_dir().join("vaultmind.db")
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

/// Secret or endpoint whose absence is reported to users as a masked hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigField {
    VaultUrl,
    VaultId,
    VaultCredential,
    VaultFunction,
    ModelCredential,
}

#[derive(Debug, Clone)]
pub struct VaultSettings {
    pub vault_id: Option<String>,
    pub vault_url: Option<String>,
    pub bearer_token: Option<String>,
    pub function_id: Option<String>,
    pub table: String,
    pub use_detect: bool,
    pub detect_url: String,
    pub timeout: Duration,
    pub function_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub use_queue: bool,
    pub workers: usize,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct SelectionSettings {
    pub default_policy: SelectionPolicy,
    /// Ratings a template needs before it competes on average rating.
    pub min_ratings: i64,
    pub ab_seed: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
pub struct TrendWindows {
    pub recent: usize,
    pub baseline: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct EvolutionThresholds {
    pub promote_min_rating: f64,
    pub promote_min_usage: i64,
    pub min_rating_spread: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct InsightSettings {
    pub min_sample: usize,
    pub lookback: usize,
    pub cost_alert_usd: f64,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub vault: VaultSettings,
    pub model: ModelSettings,
    pub worker: WorkerSettings,
    pub selection: SelectionSettings,
    pub trend: TrendWindows,
    pub evolution: EvolutionThresholds,
    pub insights: InsightSettings,
    /// PII kinds a document must contain before it is tokenized.
    pub required_pii: Vec<PiiKind>,
    pub feedback_stats_days: i64,
    pub database_path: PathBuf,
    pub bind_addr: SocketAddr,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            vault: VaultSettings {
                vault_id: None,
                vault_url: None,
                bearer_token: None,
                function_id: None,
                table: DEFAULT_VAULT_TABLE.into(),
                use_detect: false,
                detect_url: DEFAULT_DETECT_URL.into(),
                timeout: Duration::from_secs(30),
                function_timeout: Duration::from_secs(60),
            },
            model: ModelSettings {
                api_key: None,
                model: DEFAULT_MODEL.into(),
                base_url: DEFAULT_MODEL_BASE_URL.into(),
                timeout: Duration::from_secs(60),
            },
            worker: WorkerSettings {
                use_queue: true,
                workers: 2,
                poll_interval: Duration::from_millis(500),
            },
            selection: SelectionSettings {
                default_policy: SelectionPolicy::BestPerforming,
                min_ratings: 1,
                ab_seed: None,
            },
            trend: TrendWindows {
                recent: 10,
                baseline: 10,
            },
            evolution: EvolutionThresholds {
                promote_min_rating: 4.0,
                promote_min_usage: 10,
                min_rating_spread: 0.5,
            },
            insights: InsightSettings {
                min_sample: 10,
                lookback: 100,
                cost_alert_usd: 0.005,
            },
            required_pii: vec![PiiKind::Name],
            feedback_stats_days: 7,
            database_path: default_database_path(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
        }
    }
}

impl Settings {
    /// Load from the process environment, reading `.env` first when present.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenv::dotenv() {
            tracing::debug!(path = %path.display(), "Loaded .env file");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup. Unset keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| configured(lookup(key));
        let mut settings = Settings::default();

        settings.vault.vault_id = get("SKYFLOW_VAULT_ID");
        settings.vault.vault_url = get("SKYFLOW_VAULT_URL").map(|u| u.trim_end_matches('/').to_string());
        settings.vault.bearer_token = get("SKYFLOW_BEARER_TOKEN");
        settings.vault.function_id = get("SKYFLOW_FUNCTION_ID");
        if let Some(table) = get("SKYFLOW_TABLE") {
            settings.vault.table = table;
        }
        if let Some(flag) = get("SKYFLOW_USE_DETECT").or_else(|| get("SKYFLOW_USE_MCP_SERVER")) {
            settings.vault.use_detect = parse_bool("SKYFLOW_USE_DETECT", &flag)?;
        }
        if let Some(url) = get("SKYFLOW_DETECT_URL") {
            settings.vault.detect_url = url;
        }
        if let Some(secs) = get("VAULT_TIMEOUT_SECS") {
            settings.vault.timeout = Duration::from_secs(parse_num("VAULT_TIMEOUT_SECS", &secs)?);
        }
        if let Some(secs) = get("VAULT_FUNCTION_TIMEOUT_SECS") {
            settings.vault.function_timeout =
                Duration::from_secs(parse_num("VAULT_FUNCTION_TIMEOUT_SECS", &secs)?);
        }

        settings.model.api_key = get("ANTHROPIC_API_KEY");
        if let Some(model) = get("ANTHROPIC_MODEL") {
            settings.model.model = model;
        }
        if let Some(url) = get("ANTHROPIC_BASE_URL") {
            settings.model.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(secs) = get("MODEL_TIMEOUT_SECS") {
            settings.model.timeout = Duration::from_secs(parse_num("MODEL_TIMEOUT_SECS", &secs)?);
        }

        if let Some(flag) = get("VAULTMIND_USE_QUEUE") {
            settings.worker.use_queue = parse_bool("VAULTMIND_USE_QUEUE", &flag)?;
        }
        if let Some(n) = get("VAULTMIND_WORKERS") {
            settings.worker.workers = parse_num("VAULTMIND_WORKERS", &n)?;
        }
        if let Some(ms) = get("VAULTMIND_POLL_INTERVAL_MS") {
            settings.worker.poll_interval = Duration::from_millis(parse_num("VAULTMIND_POLL_INTERVAL_MS", &ms)?);
        }

        if let Some(policy) = get("VAULTMIND_SELECTION_POLICY") {
            settings.selection.default_policy =
                SelectionPolicy::from_str(&policy).map_err(|e| ConfigError::InvalidValue {
                    key: "VAULTMIND_SELECTION_POLICY",
                    reason: e.to_string(),
                })?;
        }
        if let Some(n) = get("VAULTMIND_MIN_RATINGS") {
            settings.selection.min_ratings = parse_num("VAULTMIND_MIN_RATINGS", &n)?;
        }
        if let Some(seed) = get("VAULTMIND_AB_SEED") {
            settings.selection.ab_seed = Some(parse_num("VAULTMIND_AB_SEED", &seed)?);
        }

        if let Some(n) = get("VAULTMIND_TREND_RECENT") {
            settings.trend.recent = parse_num("VAULTMIND_TREND_RECENT", &n)?;
        }
        if let Some(n) = get("VAULTMIND_TREND_BASELINE") {
            settings.trend.baseline = parse_num("VAULTMIND_TREND_BASELINE", &n)?;
        }

        if let Some(v) = get("VAULTMIND_PROMOTE_MIN_RATING") {
            settings.evolution.promote_min_rating = parse_num("VAULTMIND_PROMOTE_MIN_RATING", &v)?;
        }
        if let Some(v) = get("VAULTMIND_PROMOTE_MIN_USAGE") {
            settings.evolution.promote_min_usage = parse_num("VAULTMIND_PROMOTE_MIN_USAGE", &v)?;
        }

        if let Some(kinds) = get("VAULTMIND_REQUIRED_PII") {
            settings.required_pii = kinds
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(|k| {
                    PiiKind::from_str(k).map_err(|e| ConfigError::InvalidValue {
                        key: "VAULTMIND_REQUIRED_PII",
                        reason: e.to_string(),
                    })
                })
                .collect::<Result<_, _>>()?;
        }

        if let Some(path) = get("VAULTMIND_DATABASE") {
            settings.database_path = PathBuf::from(path);
        }
        if let Some(addr) = get("VAULTMIND_BIND") {
            settings.bind_addr = addr.parse().map_err(|e: std::net::AddrParseError| ConfigError::InvalidValue {
                key: "VAULTMIND_BIND",
                reason: e.to_string(),
            })?;
        }

        Ok(settings)
    }

    pub fn vault_configured(&self) -> bool {
        self.vault.vault_id.is_some() && self.vault.vault_url.is_some() && self.vault.bearer_token.is_some()
    }

    /// Fields the vault client cannot run without.
    pub fn missing_vault_fields(&self) -> Vec<ConfigField> {
        let mut missing = Vec::new();
        if self.vault.vault_url.is_none() {
            missing.push(ConfigField::VaultUrl);
        }
        if self.vault.vault_id.is_none() {
            missing.push(ConfigField::VaultId);
        }
        if self.vault.bearer_token.is_none() {
            missing.push(ConfigField::VaultCredential);
        }
        missing
    }

    /// User-facing hint for a missing field. Never includes the value.
    pub fn missing_hint(field: ConfigField) -> &'static str {
        match field {
            ConfigField::VaultUrl => "vault URL missing",
            ConfigField::VaultId => "vault id missing",
            ConfigField::VaultCredential => "vault credential missing",
            ConfigField::VaultFunction => "vault function id missing",
            ConfigField::ModelCredential => "model credential missing",
        }
    }
}

fn configured(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case(PLACEHOLDER))
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key,
            reason: format!("expected a boolean, got {other:?}"),
        }),
    }
}

fn parse_num<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| ConfigError::InvalidValue {
        key,
        reason: e.to_string(),
    })
}
