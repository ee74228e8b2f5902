use std::env::var;
use std::time::Duration;

use dotenvy::dotenv;
use tracing::warn;

/// Application configuration with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port
    /// Env: PORT (default: 3000)
    pub port: u16,

    /// Storage backend selection, matched against the backend config names
    /// Env: DATABASE_TYPE (default: "sqlite")
    pub database_type: String,

    /// Database file path (sqlite only)
    /// Env: DATABASE_PATH (default: "vantage.db")
    pub database_path: String,

    /// Interval between periodic cache flushes
    /// Env: SAVE_INTERVAL_SECS (default: 300)
    pub save_interval: Duration,

    /// Storage attempts per record before a flush gives up until the next run
    /// Env: FLUSH_RETRY_ATTEMPTS (default: 3)
    pub flush_retry_attempts: u32,

    /// Delay before the first retry, doubled on each further attempt
    /// Env: FLUSH_RETRY_BACKOFF_MS (default: 250)
    pub flush_retry_backoff: Duration,

    /// Upper bound on the final save during shutdown
    /// Env: SHUTDOWN_SAVE_TIMEOUT_SECS (default: 10)
    pub shutdown_save_timeout: Duration,

    /// Run one analysis shortly after startup
    /// Env: ANALYSIS_REFRESH_ON_ENABLE (default: true)
    pub analysis_refresh_on_enable: bool,

    /// Delay before the boot analysis
    /// Env: BOOT_ANALYSIS_DELAY_SECS (default: 30)
    pub boot_analysis_delay: Duration,

    /// Minutes between periodic analysis runs, -1 disables them
    /// Env: ANALYSIS_REFRESH_MINUTES (default: -1)
    pub analysis_refresh_minutes: i64,

    /// A periodic run is skipped until the current snapshot is older than this
    /// Env: ANALYSIS_FRESHNESS_SECS (default: 60)
    pub analysis_freshness: Duration,

    /// How long an inspect report is served from cache
    /// Env: INSPECT_CACHE_TTL_SECS (default: 300)
    pub inspect_cache_ttl: Duration,

    /// Record location samples from move events
    /// Env: GATHER_LOCATIONS (default: true)
    pub gather_locations: bool,

    /// Location samples kept per player
    /// Env: MAX_LOCATION_SAMPLES (default: 100)
    pub max_location_samples: usize,

    /// Request body size limit in bytes
    /// Env: REQUEST_BODY_LIMIT (default: 1048576 = 1MB)
    pub request_body_limit: usize,

    /// Request timeout in seconds
    /// Env: REQUEST_TIMEOUT_SECS (default: 30)
    pub request_timeout: Duration,

    /// Shared secret for event delivery and admin routes
    /// Env: API_KEY (optional, routes are open when unset)
    pub api_key: Option<String>,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let _ = dotenv(); //for debugging mostly
        let defaults = Self::default();
        Self {
            port: env_or_default("PORT", defaults.port),
            database_type: env_or_default_string("DATABASE_TYPE", &defaults.database_type),
            database_path: env_or_default_string("DATABASE_PATH", &defaults.database_path),
            save_interval: env_period_secs("SAVE_INTERVAL_SECS", defaults.save_interval),
            flush_retry_attempts: env_or_default("FLUSH_RETRY_ATTEMPTS", defaults.flush_retry_attempts),
            flush_retry_backoff: Duration::from_millis(env_or_default("FLUSH_RETRY_BACKOFF_MS", 250)),
            shutdown_save_timeout: Duration::from_secs(env_or_default(
                "SHUTDOWN_SAVE_TIMEOUT_SECS",
                10,
            )),
            analysis_refresh_on_enable: env_or_default(
                "ANALYSIS_REFRESH_ON_ENABLE",
                defaults.analysis_refresh_on_enable,
            ),
            boot_analysis_delay: Duration::from_secs(env_or_default("BOOT_ANALYSIS_DELAY_SECS", 30)),
            analysis_refresh_minutes: env_or_default(
                "ANALYSIS_REFRESH_MINUTES",
                defaults.analysis_refresh_minutes,
            ),
            analysis_freshness: Duration::from_secs(env_or_default("ANALYSIS_FRESHNESS_SECS", 60)),
            inspect_cache_ttl: env_period_secs("INSPECT_CACHE_TTL_SECS", defaults.inspect_cache_ttl),
            gather_locations: env_or_default("GATHER_LOCATIONS", defaults.gather_locations),
            max_location_samples: env_or_default(
                "MAX_LOCATION_SAMPLES",
                defaults.max_location_samples,
            ),
            request_body_limit: env_or_default("REQUEST_BODY_LIMIT", defaults.request_body_limit),
            request_timeout: Duration::from_secs(env_or_default("REQUEST_TIMEOUT_SECS", 30)),
            api_key: var("API_KEY").ok().filter(|key| !key.is_empty()),
        }
    }

    /// Periodic analysis interval, `None` when disabled.
    pub fn analysis_refresh_interval(&self) -> Option<Duration> {
        let minutes = u64::try_from(self.analysis_refresh_minutes).ok()?;
        (minutes > 0).then(|| Duration::from_secs(minutes.saturating_mul(60)))
    }

    /// Location samples to keep per record, zero when gathering is off.
    pub fn location_limit(&self) -> usize {
        if self.gather_locations {
            self.max_location_samples
        } else {
            0
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            database_type: "sqlite".to_string(),
            database_path: "vantage.db".to_string(),
            save_interval: Duration::from_secs(300),
            flush_retry_attempts: 3,
            flush_retry_backoff: Duration::from_millis(250),
            shutdown_save_timeout: Duration::from_secs(10),
            analysis_refresh_on_enable: true,
            boot_analysis_delay: Duration::from_secs(30),
            analysis_refresh_minutes: -1,
            analysis_freshness: Duration::from_secs(60),
            inspect_cache_ttl: Duration::from_secs(300),
            gather_locations: true,
            max_location_samples: 100,
            request_body_limit: 1024 * 1024, // 1 MB
            request_timeout: Duration::from_secs(30),
            api_key: None,
        }
    }
}

/// Parse environment variable or return default value
fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(default)
}

/// Parse a period in seconds from the environment. Zero is rejected in favour
/// of the default, since the period drives a repeating task.
fn env_period_secs(key: &str, default: Duration) -> Duration {
    parse_period_secs(key, var(key).ok().as_deref(), default)
}

fn parse_period_secs(key: &str, raw: Option<&str>, default: Duration) -> Duration {
    match raw.map(str::parse::<u64>) {
        Some(Ok(0)) => {
            warn!(key, default_secs = default.as_secs(), "period must be positive, using default");
            default
        }
        Some(Ok(secs)) => Duration::from_secs(secs),
        _ => default,
    }
}

/// Parse environment variable string or return default value
fn env_or_default_string(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|_| default.to_string())
}
