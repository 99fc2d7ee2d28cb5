//! Service configuration.

use std::str::FromStr;

use chrono::Duration;

use entitle_core::catalog::PRO_FEATURE_ID;

/// Engine and service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to `RocksDB` data directory (default: "/data/entitle").
    pub data_dir: String,

    /// Service API key for the bot process.
    pub service_api_key: Option<String>,

    /// Admin API key for credit grants and manual sweeps.
    pub admin_api_key: Option<String>,

    /// Seconds between sweep ticks (default: 6 hours).
    pub sweep_interval_secs: u64,

    /// Days a failed renewal is tolerated before disablement.
    pub grace_period_days: u32,

    /// Days before the due date in which low-balance warnings are sent.
    pub warning_horizon_days: u32,

    /// Hours a sent warning suppresses repeats of the same warning.
    ///
    /// Never shorter than the warning horizon plus the grace period, so one cycle's
    /// warnings cannot repeat before renewal or disablement clears them.
    pub warning_ttl_hours: u32,

    /// Feature whose activation toggles gated command visibility.
    pub pro_feature_id: String,

    /// JSON feature catalog to load at start-up (built-in catalog when unset).
    pub feature_catalog_path: Option<String>,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,
}

impl EngineConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            data_dir: std::env::var("DATA_DIR").unwrap_or(defaults.data_dir),
            service_api_key: std::env::var("SERVICE_API_KEY").ok(),
            admin_api_key: std::env::var("ADMIN_API_KEY").ok(),
            sweep_interval_secs: env_or("SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs),
            grace_period_days: env_or("GRACE_PERIOD_DAYS", defaults.grace_period_days),
            warning_horizon_days: env_or("WARNING_HORIZON_DAYS", defaults.warning_horizon_days),
            warning_ttl_hours: env_or("WARNING_TTL_HOURS", defaults.warning_ttl_hours),
            pro_feature_id: std::env::var("PRO_FEATURE_ID").unwrap_or(defaults.pro_feature_id),
            feature_catalog_path: std::env::var("FEATURE_CATALOG_PATH").ok(),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_or("MAX_BODY_BYTES", defaults.max_body_bytes),
            request_timeout_seconds: env_or(
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            ),
        }
    }

    /// Grace period as a duration.
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::days(i64::from(self.grace_period_days))
    }

    /// Warning horizon as a duration.
    #[must_use]
    pub fn warning_horizon(&self) -> Duration {
        Duration::days(i64::from(self.warning_horizon_days))
    }

    /// Warning dedup window as a duration.
    #[must_use]
    pub fn warning_ttl(&self) -> Duration {
        let cycle_window = self.warning_horizon() + self.grace_period();
        Duration::hours(i64::from(self.warning_ttl_hours)).max(cycle_window)
    }

    /// Sweep interval as a std duration.
    #[must_use]
    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Parse an environment variable, falling back to `default` when unset or invalid.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(variable = %name, value = %raw, "Invalid value, using default");
            default
        }),
        Err(_) => default,
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/entitle".into(),
            service_api_key: None,
            admin_api_key: None,
            sweep_interval_secs: 6 * 60 * 60,
            grace_period_days: 3,
            warning_horizon_days: 3,
            warning_ttl_hours: (3 + 3) * 24,
            pro_feature_id: PRO_FEATURE_ID.into(),
            feature_catalog_path: None,
            cors_origins: vec!["*".into()],
            max_body_bytes: 64 * 1024,
            request_timeout_seconds: 30,
        }
    }
}
