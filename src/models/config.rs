use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::AppError;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub finnhub_api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub storage_directory: Option<PathBuf>,
    #[serde(default = "default_safe_token_limit")]
    pub safe_token_limit: usize,
    #[serde(default = "default_rate_limit_rpm")]
    pub rate_limit_rpm: usize,
    #[serde(default = "default_rate_limit_period_secs")]
    pub rate_limit_period_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_factor")]
    pub retry_backoff_factor: f64,
    #[serde(default = "default_retry_jitter")]
    pub retry_jitter: f64,
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
    #[serde(default = "default_job_cleanup_after_secs")]
    pub job_cleanup_after_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_base_url() -> String {
    "https://finnhub.io/api/v1".to_string()
}

fn default_safe_token_limit() -> usize {
    75_000
}

fn default_rate_limit_rpm() -> usize {
    300
}

fn default_rate_limit_period_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_factor() -> f64 {
    1.5
}

fn default_retry_jitter() -> f64 {
    0.25
}

fn default_max_concurrent_jobs() -> usize {
    5
}

fn default_job_timeout_secs() -> u64 {
    3600
}

fn default_job_cleanup_after_secs() -> u64 {
    86_400
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8378
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            finnhub_api_key: String::new(),
            base_url: default_base_url(),
            storage_directory: None,
            safe_token_limit: default_safe_token_limit(),
            rate_limit_rpm: default_rate_limit_rpm(),
            rate_limit_period_secs: default_rate_limit_period_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_factor: default_retry_backoff_factor(),
            retry_jitter: default_retry_jitter(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            job_timeout_secs: default_job_timeout_secs(),
            job_cleanup_after_secs: default_job_cleanup_after_secs(),
            log_level: default_log_level(),
            log_file: None,
            host: default_host(),
            port: default_port(),
        }
    }
}

impl AppConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn rate_limit_period(&self) -> Duration {
        Duration::from_secs(self.rate_limit_period_secs)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn job_retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.job_cleanup_after_secs as i64)
    }

    /// Reject values the client, router and worker cannot operate with.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.safe_token_limit < 1000 {
            return Err(AppError::Validation(format!(
                "safe_token_limit must be at least 1000, got {}",
                self.safe_token_limit
            )));
        }
        if self.rate_limit_rpm == 0 {
            return Err(AppError::Validation(
                "rate_limit_rpm must be at least 1".to_string(),
            ));
        }
        if self.rate_limit_period_secs == 0 {
            return Err(AppError::Validation(
                "rate_limit_period_secs must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(AppError::Validation(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.retry_backoff_factor < 1.0 {
            return Err(AppError::Validation(format!(
                "retry_backoff_factor must be >= 1.0, got {}",
                self.retry_backoff_factor
            )));
        }
        if !(0.0..=1.0).contains(&self.retry_jitter) {
            return Err(AppError::Validation(format!(
                "retry_jitter must be within [0, 1], got {}",
                self.retry_jitter
            )));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(AppError::Validation(
                "max_concurrent_jobs must be at least 1".to_string(),
            ));
        }
        if self.job_timeout_secs == 0 || self.job_cleanup_after_secs == 0 {
            return Err(AppError::Validation(
                "job_timeout_secs and job_cleanup_after_secs must be at least 1".to_string(),
            ));
        }
        if !VALID_LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(AppError::Validation(format!(
                "log_level must be one of: {}",
                VALID_LOG_LEVELS.join(", ")
            )));
        }
        Ok(())
    }

    /// Apply `FINNHUB_*` environment overrides read through `lookup`.
    ///
    /// Numeric values that fail to parse are ignored with a warning so a typo
    /// in one variable does not prevent the server from starting.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("FINNHUB_API_KEY") {
            self.finnhub_api_key = key.trim().to_string();
        }
        if let Some(dir) = lookup("FINNHUB_STORAGE_DIR") {
            self.storage_directory = Some(PathBuf::from(dir));
        }
        if let Some(level) = lookup("FINNHUB_LOG_LEVEL") {
            self.log_level = level.to_lowercase();
        }
        if let Some(file) = lookup("FINNHUB_LOG_FILE") {
            self.log_file = Some(PathBuf::from(file));
        }

        override_number(&lookup, "FINNHUB_SAFE_TOKEN_LIMIT", &mut self.safe_token_limit);
        override_number(&lookup, "FINNHUB_RATE_LIMIT_RPM", &mut self.rate_limit_rpm);
        override_number(&lookup, "FINNHUB_REQUEST_TIMEOUT", &mut self.request_timeout_secs);
        override_number(&lookup, "FINNHUB_MAX_RETRIES", &mut self.max_retries);
        override_number(&lookup, "FINNHUB_MAX_CONCURRENT_JOBS", &mut self.max_concurrent_jobs);
        override_number(&lookup, "FINNHUB_JOB_TIMEOUT", &mut self.job_timeout_secs);
        override_number(&lookup, "FINNHUB_JOB_CLEANUP_AFTER", &mut self.job_cleanup_after_secs);
    }
}

fn override_number<F, T>(lookup: &F, name: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(name) {
        match raw.trim().parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!("Ignoring {}: '{}' is not a valid number", name, raw),
        }
    }
}
