//! Configuration management for Quillcast

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub api: Option<ApiConfig>,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    /// When true, candidates are audited and logged but never sent and no
    /// quota state changes.
    #[serde(default = "default_true")]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// File holding the OAuth bearer token for the publish API.
    pub bearer_token_file: String,
    /// Base URL override, mainly for tests against a local stub.
    #[serde(default = "default_api_base")]
    pub base_url: String,
}

/// Rolling-window ceilings. All windows slide; none are fixed buckets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_posts_per_day")]
    pub posts_per_day: u32,
    #[serde(default = "default_replies_per_day")]
    pub replies_per_day: u32,
    #[serde(default = "default_global_replies_per_hour")]
    pub global_replies_per_hour: u32,
    #[serde(default = "default_replies_per_user_per_hour")]
    pub replies_per_user_per_hour: u32,
    /// Total write budget over a rolling `write_budget_days` window.
    #[serde(default = "default_write_budget")]
    pub write_budget: u32,
    #[serde(default = "default_write_budget_days")]
    pub write_budget_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_seconds")]
    pub initial_seconds: u64,
    #[serde(default = "default_max_seconds")]
    pub max_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Hard character cap (not bytes).
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    /// Case-insensitive substrings that reject a candidate outright.
    #[serde(default = "default_forbidden_patterns")]
    pub forbidden_patterns: Vec<String>,
    /// Terms that mark a candidate as referencing investment outcomes.
    #[serde(default = "default_investment_terms")]
    pub investment_terms: Vec<String>,
    /// Required disclaimer when investment outcomes are referenced.
    #[serde(default = "default_disclaimer")]
    pub disclaimer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    #[serde(default = "default_post_interval_hours")]
    pub post_interval_hours: u64,
    #[serde(default = "default_post_jitter_seconds")]
    pub post_jitter_seconds: u64,
    #[serde(default = "default_mention_poll_minutes")]
    pub mention_poll_minutes: u64,
    #[serde(default = "default_mention_jitter_seconds")]
    pub mention_jitter_seconds: u64,
}

fn default_true() -> bool {
    true
}
fn default_api_base() -> String {
    "https://api.x.com".to_string()
}
fn default_posts_per_day() -> u32 {
    5
}
fn default_replies_per_day() -> u32 {
    10
}
fn default_global_replies_per_hour() -> u32 {
    5
}
fn default_replies_per_user_per_hour() -> u32 {
    2
}
fn default_write_budget() -> u32 {
    500
}
fn default_write_budget_days() -> u32 {
    30
}
fn default_max_retries() -> u32 {
    6
}
fn default_initial_seconds() -> u64 {
    1
}
fn default_max_seconds() -> u64 {
    300
}
fn default_max_length() -> usize {
    280
}
fn default_forbidden_patterns() -> Vec<String> {
    vec![
        "guaranteed profit".to_string(),
        "guaranteed returns".to_string(),
        "risk-free".to_string(),
        "can't lose".to_string(),
        "cannot lose".to_string(),
        "100x".to_string(),
        "1000x".to_string(),
    ]
}
fn default_investment_terms() -> Vec<String> {
    vec![
        "profit".to_string(),
        "returns".to_string(),
        "gains".to_string(),
        "buy".to_string(),
        "sell".to_string(),
        "invest".to_string(),
    ]
}
fn default_disclaimer() -> String {
    "Not financial advice".to_string()
}
fn default_post_interval_hours() -> u64 {
    3
}
fn default_post_jitter_seconds() -> u64 {
    900
}
fn default_mention_poll_minutes() -> u64 {
    1
}
fn default_mention_jitter_seconds() -> u64 {
    30
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            posts_per_day: default_posts_per_day(),
            replies_per_day: default_replies_per_day(),
            global_replies_per_hour: default_global_replies_per_hour(),
            replies_per_user_per_hour: default_replies_per_user_per_hour(),
            write_budget: default_write_budget(),
            write_budget_days: default_write_budget_days(),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_seconds: default_initial_seconds(),
            max_seconds: default_max_seconds(),
        }
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_length: default_max_length(),
            forbidden_patterns: default_forbidden_patterns(),
            investment_terms: default_investment_terms(),
            disclaimer: default_disclaimer(),
        }
    }
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            post_interval_hours: default_post_interval_hours(),
            post_jitter_seconds: default_post_jitter_seconds(),
            mention_poll_minutes: default_mention_poll_minutes(),
            mention_jitter_seconds: default_mention_jitter_seconds(),
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/quillcast/drafts.db".to_string(),
            },
            api: Some(ApiConfig {
                bearer_token_file: "~/.config/quillcast/bearer.token".to_string(),
                base_url: default_api_base(),
            }),
            quota: QuotaConfig::default(),
            backoff: BackoffConfig::default(),
            safety: SafetyConfig::default(),
            scheduling: SchedulingConfig::default(),
            dry_run: true,
        }
    }

    /// Validate the configuration. This is the only fatal failure at
    /// startup; everything later is recorded and survived.
    pub fn validate(&self) -> Result<()> {
        let q = &self.quota;
        for (name, value) in [
            ("quota.posts_per_day", q.posts_per_day),
            ("quota.replies_per_day", q.replies_per_day),
            ("quota.global_replies_per_hour", q.global_replies_per_hour),
            (
                "quota.replies_per_user_per_hour",
                q.replies_per_user_per_hour,
            ),
            ("quota.write_budget", q.write_budget),
            ("quota.write_budget_days", q.write_budget_days),
        ] {
            if value == 0 {
                return Err(
                    ConfigError::Invalid(format!("{} must be at least 1", name)).into(),
                );
            }
        }

        if self.backoff.initial_seconds == 0 {
            return Err(
                ConfigError::Invalid("backoff.initial_seconds must be at least 1".to_string())
                    .into(),
            );
        }
        if self.backoff.initial_seconds > self.backoff.max_seconds {
            return Err(ConfigError::Invalid(
                "backoff.initial_seconds must not exceed backoff.max_seconds".to_string(),
            )
            .into());
        }

        if self.safety.max_length == 0 {
            return Err(
                ConfigError::Invalid("safety.max_length must be at least 1".to_string()).into(),
            );
        }

        if !self.dry_run && self.api.is_none() {
            return Err(ConfigError::MissingField(
                "api.bearer_token_file (required unless dry_run = true)".to_string(),
            )
            .into());
        }

        Ok(())
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("QUILLCAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("quillcast").join("config.toml"))
}
