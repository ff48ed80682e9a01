//! Client configuration from environment variables.

use std::fmt::Debug;
use std::str::FromStr;
use std::time::Duration;

use fva_shared::ws_endpoint;

/// How legacy short-form permission tokens are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// Short tokens are checked against the static button list only.
    Frontend,
    /// Short tokens go through the route-meta and suffix tiers.
    #[default]
    Backend,
}

impl AccessMode {
    fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "frontend" => AccessMode::Frontend,
            _ => AccessMode::Backend,
        }
    }
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Reconnect attempts before the connection is given up.
    pub max_attempts: u32,
    /// Delay before the first reconnect.
    pub initial_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(3000),
            backoff_multiplier: 1.5,
        }
    }
}

/// Ceiling for a single backoff delay.
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60 * 60);

impl ReconnectConfig {
    /// Delay before reconnect attempt `attempt` (0-based), or `None` once the
    /// attempt budget is spent. Overflowing delays saturate at
    /// [`MAX_RECONNECT_DELAY`]; a negative or NaN product falls back to
    /// `initial_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay = match Duration::try_from_secs_f64(secs) {
            Ok(delay) => delay.min(MAX_RECONNECT_DELAY),
            Err(_) if secs > 0.0 => MAX_RECONNECT_DELAY,
            Err(_) => self.initial_delay,
        };
        Some(delay)
    }

    /// Whether the last delay of the schedule is a finite number.
    fn schedule_is_finite(&self) -> bool {
        let exponent = i32::try_from(self.max_attempts).unwrap_or(i32::MAX);
        (self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent)).is_finite()
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST base URL, e.g. `https://admin.example.com`.
    pub base_url: String,
    pub access_mode: AccessMode,
    pub request_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub reconnect: ReconnectConfig,
    /// Window in which repeated unauthorized errors collapse into one logout.
    pub unauthorized_debounce: Duration,
    pub login_days: u32,
    pub persist_session: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9090".to_string(),
            access_mode: AccessMode::Backend,
            request_timeout: Duration::from_millis(10_000),
            heartbeat_interval: Duration::from_millis(30_000),
            reconnect: ReconnectConfig::default(),
            unauthorized_debounce: Duration::from_millis(3000),
            login_days: 7,
            persist_session: true,
        }
    }
}

fn env_parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                crate::log_warn!("Ignoring invalid {}={:?}, using default", key, raw);
                default
            }
        },
        None => default,
    }
}

/// Parse `key`, falling back to `default` when the value breaks `valid`.
fn env_checked<T: FromStr + Copy + Debug>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    requirement: &str,
    valid: impl Fn(T) -> bool,
) -> T {
    let value = env_parse(lookup, key, default);
    if valid(value) {
        value
    } else {
        crate::log_warn!("Ignoring {}={:?}: must be {}, using default", key, value, requirement);
        default
    }
}

fn env_millis(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Duration {
    Duration::from_millis(env_parse(lookup, key, default.as_millis() as u64))
}

fn env_positive_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    let default_ms = default.as_millis() as u64;
    let millis = env_checked(lookup, key, default_ms, "greater than 0", |ms| ms > 0);
    Duration::from_millis(millis)
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `FVA_BASE_URL`: REST base URL (default: "http://localhost:9090")
    /// - `FVA_ACCESS_MODE`: "frontend" | "backend" (default: "backend")
    /// - `FVA_REQUEST_TIMEOUT_MS`, `FVA_HEARTBEAT_INTERVAL_MS` (> 0)
    /// - `FVA_RECONNECT_BASE_MS` (> 0), `FVA_RECONNECT_FACTOR` (>= 1.0),
    ///   `FVA_RECONNECT_MAX_ATTEMPTS`
    /// - `FVA_UNAUTHORIZED_DEBOUNCE_MS`, `FVA_LOGIN_DAYS`, `FVA_PERSIST_SESSION`
    ///
    /// Unparseable or out-of-range values are logged and replaced by the
    /// default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// [`ClientConfig::from_env`] over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = &lookup;
        let defaults = Self::default();

        let mut reconnect = ReconnectConfig {
            max_attempts: env_parse(
                lookup,
                "FVA_RECONNECT_MAX_ATTEMPTS",
                defaults.reconnect.max_attempts,
            ),
            initial_delay: env_positive_millis(
                lookup,
                "FVA_RECONNECT_BASE_MS",
                defaults.reconnect.initial_delay,
            ),
            backoff_multiplier: env_checked(
                lookup,
                "FVA_RECONNECT_FACTOR",
                defaults.reconnect.backoff_multiplier,
                "a finite number >= 1.0",
                |f: f64| f.is_finite() && f >= 1.0,
            ),
        };
        if !reconnect.schedule_is_finite() {
            crate::log_warn!(
                "Reconnect schedule {:?} overflows, using the default schedule",
                reconnect
            );
            reconnect = defaults.reconnect.clone();
        }

        Self {
            base_url: lookup("FVA_BASE_URL").unwrap_or(defaults.base_url),
            access_mode: lookup("FVA_ACCESS_MODE")
                .map(|v| AccessMode::parse(&v))
                .unwrap_or_default(),
            request_timeout: env_positive_millis(
                lookup,
                "FVA_REQUEST_TIMEOUT_MS",
                defaults.request_timeout,
            ),
            heartbeat_interval: env_positive_millis(
                lookup,
                "FVA_HEARTBEAT_INTERVAL_MS",
                defaults.heartbeat_interval,
            ),
            reconnect,
            unauthorized_debounce: env_millis(
                lookup,
                "FVA_UNAUTHORIZED_DEBOUNCE_MS",
                defaults.unauthorized_debounce,
            ),
            login_days: env_parse(lookup, "FVA_LOGIN_DAYS", defaults.login_days),
            persist_session: env_parse(lookup, "FVA_PERSIST_SESSION", defaults.persist_session),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Construct an API URL from a path.
    pub fn api_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    /// Notification socket URL for a token.
    pub fn ws_url(&self, access_token: &str) -> String {
        http_to_ws(&self.api_url(&ws_endpoint(access_token)))
    }
}

/// Convert HTTP/HTTPS URL to WS/WSS
fn http_to_ws(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}
