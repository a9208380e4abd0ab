//! Runtime configuration loaded from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;
use crate::push::stale_key::DEFAULT_STALE_KEY_PATTERNS;
use crate::service::notification_service::DEFAULT_CONCURRENCY;
use crate::service::notification_service::DEFAULT_QUOTA_MAX_MESSAGES;
use crate::service::notification_service::DEFAULT_QUOTA_WINDOW;

/// Application configuration.
///
/// [`Config::new`] yields defaults only; call [`Config::load`] to read the
/// environment (and `.env`, when the binary loaded it).
#[derive(Clone, Debug)]
pub struct Config {
    /// Base URL of the hosted database project, e.g. `https://xyz.supabase.co`.
    pub supabase_url: String,
    /// Service key sent as both `apikey` and bearer token.
    pub supabase_key: String,
    /// Base URL of the push gateway function.
    pub push_gateway_url: String,
    pub logs_path: PathBuf,
    /// Upper bound of subscriptions delivered to concurrently.
    pub dispatch_concurrency: usize,
    /// Outbound gateway requests per second.
    pub push_rate_limit: u32,
    /// Case-insensitive substrings marking a stale delivery key.
    pub stale_key_patterns: Vec<String>,
    /// Messages a single sender may dispatch per quota window.
    pub quota_max_messages: u32,
    pub quota_window: Duration,
}

impl Config {
    pub fn new() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_key: String::new(),
            push_gateway_url: String::new(),
            logs_path: PathBuf::from("./logs"),
            dispatch_concurrency: DEFAULT_CONCURRENCY,
            push_rate_limit: 20,
            stale_key_patterns: DEFAULT_STALE_KEY_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            quota_max_messages: DEFAULT_QUOTA_MAX_MESSAGES,
            quota_window: DEFAULT_QUOTA_WINDOW,
        }
    }

    /// Overrides defaults with values from the environment.
    pub fn load(&mut self) -> Result<(), AppError> {
        self.supabase_url = required("SUPABASE_URL")?
            .trim_end_matches('/')
            .to_string();
        self.supabase_key = required("SUPABASE_SERVICE_KEY")?;
        self.push_gateway_url = match optional("PUSH_GATEWAY_URL") {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("{}/functions/v1/push", self.supabase_url),
        };

        if let Some(path) = optional("LOGS_PATH") {
            self.logs_path = PathBuf::from(path);
        }
        if let Some(concurrency) = parsed::<usize>("DISPATCH_CONCURRENCY")? {
            self.dispatch_concurrency = concurrency.max(1);
        }
        if let Some(rate) = parsed::<u32>("PUSH_RATE_LIMIT")? {
            self.push_rate_limit = rate.max(1);
        }
        if let Some(patterns) = optional("STALE_KEY_PATTERNS") {
            let patterns = split_patterns(&patterns);
            if patterns.is_empty() {
                return Err(AppError::InvalidConfig {
                    key: "STALE_KEY_PATTERNS".to_string(),
                    value: String::new(),
                });
            }
            self.stale_key_patterns = patterns;
        }
        if let Some(max) = parsed::<u32>("QUOTA_MAX_MESSAGES")? {
            self.quota_max_messages = max;
        }
        if let Some(hours) = parsed::<u64>("QUOTA_WINDOW_HOURS")? {
            self.quota_window = Duration::from_secs(hours.saturating_mul(60 * 60));
        }

        Ok(())
    }
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn required(key: &str) -> Result<String, AppError> {
    optional(key).ok_or_else(|| AppError::MissingConfig {
        key: key.to_string(),
    })
}

fn parsed<T: FromStr>(key: &str) -> Result<Option<T>, AppError> {
    match optional(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| AppError::InvalidConfig {
                key: key.to_string(),
                value,
            }),
    }
}

fn split_patterns(raw: &str) -> Vec<String> {
    raw.split('|')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}
