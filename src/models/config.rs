//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Search service connection settings
    #[serde(default)]
    pub github: GithubConfig,

    /// Window sizing and service limits
    #[serde(default)]
    pub partition: PartitionConfig,

    /// Rate-limit and transient failure handling
    #[serde(default)]
    pub retry: RetryConfig,

    /// Pipelined write settings
    #[serde(default)]
    pub writes: WriteConfig,

    /// Storage backend selection
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Apply overrides from environment variables.
    pub fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("GITHUB_TOKEN") {
            if !token.trim().is_empty() {
                self.github.token = Some(token);
            }
        }

        let database_url = std::env::var("PG_CONNECTION_STRING")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .ok();
        if let Some(url) = database_url {
            self.storage.database_url = Some(url);
        }

        if let Ok(level) = std::env::var("CRAWLER_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.github.user_agent.trim().is_empty() {
            return Err(AppError::validation("github.user_agent is empty"));
        }
        if self.github.timeout_secs == 0 {
            return Err(AppError::validation("github.timeout_secs must be > 0"));
        }
        self.partition.validate()?;
        if self.writes.max_in_flight == 0 {
            return Err(AppError::validation("writes.max_in_flight must be > 0"));
        }
        if self.storage.backend == StorageBackend::Postgres && self.storage.database_url.is_none()
        {
            return Err(AppError::validation(
                "storage.backend = \"postgres\" requires storage.database_url or PG_CONNECTION_STRING",
            ));
        }
        Ok(())
    }
}

/// Search service connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    /// GraphQL endpoint
    #[serde(default = "defaults::endpoint")]
    pub endpoint: String,

    /// Bearer token, usually supplied through `GITHUB_TOKEN`
    #[serde(default, skip_serializing)]
    pub token: Option<String>,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Search qualifiers prepended to every range query
    #[serde(default = "defaults::search_qualifiers")]
    pub search_qualifiers: String,

    /// Result ordering within a range
    #[serde(default = "defaults::sort")]
    pub sort: String,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            endpoint: defaults::endpoint(),
            token: None,
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            search_qualifiers: defaults::search_qualifiers(),
            sort: defaults::sort(),
        }
    }
}

/// Window sizing and service limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Earliest creation date in the domain
    #[serde(default = "defaults::domain_start")]
    pub domain_start: NaiveDate,

    /// Exclusive end of the domain; defaults to tomorrow (UTC)
    #[serde(default)]
    pub domain_end: Option<NaiveDate>,

    /// Width of the first window
    #[serde(default = "defaults::seed_window_days")]
    pub seed_window_days: u32,

    /// Narrowest window the service can be queried with
    #[serde(default = "defaults::min_window_days")]
    pub min_window_days: u32,

    /// Widest window growth may reach
    #[serde(default = "defaults::max_window_days")]
    pub max_window_days: u32,

    /// Maximum results reachable from one range query
    #[serde(default = "defaults::result_ceiling")]
    pub result_ceiling: usize,

    /// Maximum results per page
    #[serde(default = "defaults::page_size")]
    pub page_size: usize,

    /// Grow the window when a chunk is below this fraction of the ceiling
    #[serde(default = "defaults::growth_threshold")]
    pub growth_threshold: f64,

    /// Fraction of the ceiling a grown window should aim for
    #[serde(default = "defaults::target_fill")]
    pub target_fill: f64,

    /// Upper bound on a single growth step
    #[serde(default = "defaults::max_growth_factor")]
    pub max_growth_factor: f64,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            domain_start: defaults::domain_start(),
            domain_end: None,
            seed_window_days: defaults::seed_window_days(),
            min_window_days: defaults::min_window_days(),
            max_window_days: defaults::max_window_days(),
            result_ceiling: defaults::result_ceiling(),
            page_size: defaults::page_size(),
            growth_threshold: defaults::growth_threshold(),
            target_fill: defaults::target_fill(),
            max_growth_factor: defaults::max_growth_factor(),
        }
    }
}

impl PartitionConfig {
    /// Exclusive end of the domain.
    pub fn resolved_domain_end(&self) -> NaiveDate {
        self.domain_end.unwrap_or_else(|| {
            let today = Utc::now().date_naive();
            today.checked_add_days(Days::new(1)).unwrap_or(today)
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.result_ceiling == 0 {
            return Err(AppError::validation("partition.result_ceiling must be > 0"));
        }
        if self.page_size == 0 || self.page_size > self.result_ceiling {
            return Err(AppError::validation(
                "partition.page_size must be in 1..=result_ceiling",
            ));
        }
        if self.min_window_days == 0 {
            return Err(AppError::validation("partition.min_window_days must be > 0"));
        }
        if self.min_window_days > self.seed_window_days
            || self.seed_window_days > self.max_window_days
        {
            return Err(AppError::validation(
                "partition window sizes must satisfy min <= seed <= max",
            ));
        }
        if self.resolved_domain_end() <= self.domain_start {
            return Err(AppError::validation(
                "partition.domain_end must be after domain_start",
            ));
        }
        for (name, value) in [
            ("growth_threshold", self.growth_threshold),
            ("target_fill", self.target_fill),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(AppError::validation(format!(
                    "partition.{name} must be in (0, 1]"
                )));
            }
        }
        if self.max_growth_factor < 1.0 {
            return Err(AppError::validation(
                "partition.max_growth_factor must be >= 1",
            ));
        }
        Ok(())
    }
}

/// Rate-limit and transient failure handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries allowed for transient failures (attempts = retries + 1)
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// Fixed delay between transient retries
    #[serde(default = "defaults::retry_delay")]
    pub retry_delay_ms: u64,

    /// Wait used when a rate-limit reply carries no usable reset time
    #[serde(default = "defaults::rate_limit_default_wait")]
    pub rate_limit_default_wait_secs: u64,

    /// Added to the advertised reset time
    #[serde(default = "defaults::rate_limit_margin")]
    pub rate_limit_margin_secs: u64,

    /// Upper bound on any single rate-limit wait
    #[serde(default = "defaults::max_rate_limit_wait")]
    pub max_rate_limit_wait_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: defaults::max_retries(),
            retry_delay_ms: defaults::retry_delay(),
            rate_limit_default_wait_secs: defaults::rate_limit_default_wait(),
            rate_limit_margin_secs: defaults::rate_limit_margin(),
            max_rate_limit_wait_secs: defaults::max_rate_limit_wait(),
        }
    }
}

impl RetryConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Pipelined write settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteConfig {
    /// Maximum batches being written concurrently with fetching
    #[serde(default = "defaults::max_in_flight")]
    pub max_in_flight: usize,

    /// Bound on waiting for outstanding writes when the crawl ends
    #[serde(default = "defaults::drain_timeout")]
    pub drain_timeout_secs: u64,
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            max_in_flight: defaults::max_in_flight(),
            drain_timeout_secs: defaults::drain_timeout(),
        }
    }
}

impl WriteConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

/// Available storage backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Local,
    Memory,
    Postgres,
}

/// Storage backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Directory for the local backend
    #[serde(default = "defaults::storage_path")]
    pub path: PathBuf,

    /// Connection string for the postgres backend
    #[serde(default, skip_serializing)]
    pub database_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: defaults::storage_path(),
            database_url: None,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level when RUST_LOG is unset
    #[serde(default = "defaults::log_level")]
    pub level: String,

    /// Log each saved page, not just each window
    #[serde(default = "defaults::show_progress")]
    pub show_progress: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
            show_progress: defaults::show_progress(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    use chrono::NaiveDate;

    // GitHub defaults
    pub fn endpoint() -> String {
        "https://api.github.com/graphql".into()
    }
    pub fn user_agent() -> String {
        "star-crawler/0.1".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn search_qualifiers() -> String {
        "stars:>0".into()
    }
    pub fn sort() -> String {
        "stars-desc".into()
    }

    // Partition defaults
    pub fn domain_start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2008, 1, 1).unwrap_or_default()
    }
    pub fn seed_window_days() -> u32 {
        180
    }
    pub fn min_window_days() -> u32 {
        1
    }
    pub fn max_window_days() -> u32 {
        365
    }
    pub fn result_ceiling() -> usize {
        1000
    }
    pub fn page_size() -> usize {
        100
    }
    pub fn growth_threshold() -> f64 {
        0.5
    }
    pub fn target_fill() -> f64 {
        0.7
    }
    pub fn max_growth_factor() -> f64 {
        2.0
    }

    // Retry defaults
    pub fn max_retries() -> u32 {
        3
    }
    pub fn retry_delay() -> u64 {
        1000
    }
    pub fn rate_limit_default_wait() -> u64 {
        5
    }
    pub fn rate_limit_margin() -> u64 {
        1
    }
    pub fn max_rate_limit_wait() -> u64 {
        3600
    }

    // Write defaults
    pub fn max_in_flight() -> usize {
        4
    }
    pub fn drain_timeout() -> u64 {
        60
    }

    // Storage and logging defaults
    pub fn storage_path() -> PathBuf {
        PathBuf::from("storage")
    }
    pub fn log_level() -> String {
        "info".into()
    }
    pub fn show_progress() -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_user_agent() {
        let mut config = Config::default();
        config.github.user_agent = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_page_size_above_ceiling() {
        let mut config = Config::default();
        config.partition.page_size = 2000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_inverted_window_bounds() {
        let mut config = Config::default();
        config.partition.seed_window_days = 400;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_postgres_without_url() {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::Postgres;
        assert!(config.validate().is_err());
        config.storage.database_url = Some("postgres://localhost/github".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            [partition]
            seed_window_days = 30
            domain_end = "2020-01-01"

            [storage]
            backend = "memory"
            "#,
        )
        .unwrap();

        assert_eq!(config.partition.seed_window_days, 30);
        assert_eq!(config.partition.result_ceiling, 1000);
        assert_eq!(
            config.partition.resolved_domain_end(),
            NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()
        );
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.retry.max_retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_reports_missing_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let result = Config::load(tmp.path().join("missing.toml"));
        assert!(matches!(result, Err(AppError::Io(_))));
    }
}
