use std::env;
use std::time::Duration;

/// Hard floor for the polling interval. Checks hammer a browser session per
/// place; anything tighter multiplies bot-detection risk on the source site.
pub const MIN_INTERVAL_MINUTES: u32 = 5;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Store
    pub database_url: String,

    // Browser
    pub headless: bool,
    pub chrome_executable: Option<String>,

    // Extraction
    pub max_reviews_per_request: usize,
    pub max_scrolls: u32,
    pub job_timeout: Duration,

    // Monitoring
    pub monitor_interval_minutes: u32,

    // Webhook delivery
    pub webhook_timeout: Duration,
    pub webhook_max_retries: u32,
    pub webhook_retry_delay: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            headless: env_bool("HEADLESS", true),
            chrome_executable: env::var("CHROME_BIN").ok(),
            max_reviews_per_request: env_parse("MAX_REVIEWS_PER_REQUEST", 100),
            max_scrolls: env_parse("MAX_SCROLLS", 40),
            job_timeout: Duration::from_secs(env_parse("JOB_TIMEOUT_SECS", 600)),
            monitor_interval_minutes: env_parse("MONITOR_INTERVAL_MINUTES", 30)
                .max(MIN_INTERVAL_MINUTES),
            webhook_timeout: Duration::from_secs(env_parse("WEBHOOK_TIMEOUT_SECS", 30)),
            webhook_max_retries: env_parse("WEBHOOK_MAX_RETRIES", 3),
            webhook_retry_delay: Duration::from_secs(env_parse("WEBHOOK_RETRY_DELAY_SECS", 5)),
        }
    }

    /// Partial configuration for one-shot commands that never touch the
    /// store: same browser and webhook knobs, no DATABASE_URL required.
    pub fn browser_from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL").unwrap_or_default(),
            headless: env_bool("HEADLESS", true),
            chrome_executable: env::var("CHROME_BIN").ok(),
            max_reviews_per_request: env_parse("MAX_REVIEWS_PER_REQUEST", 100),
            max_scrolls: env_parse("MAX_SCROLLS", 40),
            job_timeout: Duration::from_secs(env_parse("JOB_TIMEOUT_SECS", 600)),
            monitor_interval_minutes: MIN_INTERVAL_MINUTES,
            webhook_timeout: Duration::from_secs(env_parse("WEBHOOK_TIMEOUT_SECS", 30)),
            webhook_max_retries: env_parse("WEBHOOK_MAX_RETRIES", 3),
            webhook_retry_delay: Duration::from_secs(env_parse("WEBHOOK_RETRY_DELAY_SECS", 5)),
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a number, got {raw:?}")),
        Err(_) => default,
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => matches!(raw.as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}
