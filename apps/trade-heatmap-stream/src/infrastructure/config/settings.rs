//! Feed Configuration Settings
//!
//! Configuration types for the trade heatmap stream, loaded from environment
//! variables. Values that are present but unparsable are errors, not
//! silently replaced by defaults.

use std::time::Duration;

use crate::domain::aggregation::DEFAULT_WINDOW_MS;
use crate::domain::sizing::DEFAULT_SCALE_FACTOR;

/// Path and query of the Engine.IO v4 WebSocket endpoint.
pub const SOCKET_IO_PATH: &str = "/socket.io/?EIO=4&transport=websocket";

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppEnvironment {
    /// Local development; diagnostic logging of rejected payloads.
    #[default]
    Development,
    /// Production; diagnostics off.
    Production,
}

impl AppEnvironment {
    /// Parse environment from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }

    /// Whether rejected payloads are logged.
    #[must_use]
    pub const fn diagnostics_enabled(&self) -> bool {
        matches!(self, Self::Development)
    }

    /// Get the environment name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

/// Trade gateway connection settings.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Gateway base URL (`ws`, `wss`, `http` or `https`).
    pub url: String,
    /// Name of the trade event.
    pub event: String,
    /// Socket.IO namespace.
    pub namespace: String,
    /// Symbols to subscribe to after every connect. Empty means none.
    pub subscribe_symbols: Vec<String>,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Jitter as a fraction of the delay.
    pub reconnect_jitter: f64,
    /// Timeout for a single connection attempt.
    pub connect_timeout: Duration,
}

impl GatewaySettings {
    /// Settings for `url` with every other field at its default.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            event: "trade_update".to_string(),
            namespace: "/".to_string(),
            subscribe_symbols: Vec::new(),
            reconnect_delay_initial: Duration::from_millis(1000),
            reconnect_delay_max: Duration::from_millis(5000),
            reconnect_delay_multiplier: 2.0,
            reconnect_jitter: 0.5,
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// WebSocket URL of the Engine.IO endpoint.
    ///
    /// `http`/`https` map to `ws`/`wss`; the Engine.IO path is appended
    /// unless the URL already points at `/socket.io`.
    #[must_use]
    pub fn socket_url(&self) -> String {
        let url = self.url.trim();
        let url = if let Some(rest) = url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            url.to_string()
        };

        if url.contains("/socket.io") {
            url
        } else {
            format!("{}{SOCKET_IO_PATH}", url.trim_end_matches('/'))
        }
    }
}

/// Aggregation and pipeline settings.
#[derive(Debug, Clone)]
pub struct AggregationSettings {
    /// Trailing window in milliseconds.
    pub window_ms: i64,
    /// Sizing scale factor.
    pub scale_factor: f64,
    /// Maximum frames folded into one batch.
    pub max_batch: usize,
    /// Window refresh interval when idle.
    pub refresh_interval: Duration,
    /// Capacity of the dispatch channel between connection and pipeline.
    pub dispatch_capacity: usize,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            window_ms: DEFAULT_WINDOW_MS,
            scale_factor: DEFAULT_SCALE_FACTOR,
            max_batch: 512,
            refresh_interval: Duration::from_millis(1000),
            dispatch_capacity: 10_000,
        }
    }
}

/// Broadcast channel settings.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastSettings {
    /// Capacity of the normalized trade broadcast channel.
    pub trades_capacity: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            trades_capacity: 10_000,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, Copy)]
pub struct ServerSettings {
    /// Health and snapshot HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete feed configuration.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Deployment environment.
    pub environment: AppEnvironment,
    /// Gateway connection settings.
    pub gateway: GatewaySettings,
    /// Aggregation settings.
    pub aggregation: AggregationSettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// Broadcast channel settings.
    pub broadcast: BroadcastSettings,
}

impl FeedConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or any value is
    /// invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or any value is
    /// invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let url = env
            .get("TRADE_GATEWAY_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("TRADE_GATEWAY_URL".to_string()))?;
        if url.trim().is_empty() {
            return Err(ConfigError::EmptyValue("TRADE_GATEWAY_URL".to_string()));
        }
        validate_url_scheme("TRADE_GATEWAY_URL", &url)?;

        let environment = env
            .get("APP_ENV")
            .map(|s| AppEnvironment::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let defaults = GatewaySettings::new(url.trim());
        let gateway = GatewaySettings {
            event: env.non_empty_or("TRADE_GATEWAY_EVENT", &defaults.event)?,
            namespace: normalize_namespace(
                &env.non_empty_or("TRADE_GATEWAY_NAMESPACE", &defaults.namespace)?,
            ),
            subscribe_symbols: env
                .get("TRADE_GATEWAY_SUBSCRIBE_SYMBOLS")
                .map(|s| parse_symbol_list(&s))
                .unwrap_or_default(),
            reconnect_delay_initial: env.parse_duration_millis(
                "TRADE_GATEWAY_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect_delay_initial,
            )?,
            reconnect_delay_max: env.parse_duration_millis(
                "TRADE_GATEWAY_RECONNECT_DELAY_MAX_MS",
                defaults.reconnect_delay_max,
            )?,
            reconnect_delay_multiplier: env.parse_f64(
                "TRADE_GATEWAY_RECONNECT_DELAY_MULTIPLIER",
                defaults.reconnect_delay_multiplier,
            )?,
            reconnect_jitter: env
                .parse_f64("TRADE_GATEWAY_RECONNECT_JITTER", defaults.reconnect_jitter)?,
            connect_timeout: env.parse_duration_secs(
                "TRADE_GATEWAY_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout,
            )?,
            url: defaults.url,
        };
        validate_gateway(&gateway)?;

        let aggregation_defaults = AggregationSettings::default();
        let aggregation = AggregationSettings {
            window_ms: env.parse("HEATMAP_WINDOW_MS", aggregation_defaults.window_ms)?,
            scale_factor: env.parse_f64("HEATMAP_SCALE_FACTOR", aggregation_defaults.scale_factor)?,
            max_batch: env.parse("HEATMAP_MAX_BATCH", aggregation_defaults.max_batch)?,
            refresh_interval: env.parse_duration_millis(
                "HEATMAP_REFRESH_INTERVAL_MS",
                aggregation_defaults.refresh_interval,
            )?,
            dispatch_capacity: env.parse(
                "HEATMAP_DISPATCH_CAPACITY",
                aggregation_defaults.dispatch_capacity,
            )?,
        };
        validate_aggregation(&aggregation)?;

        let broadcast = BroadcastSettings {
            trades_capacity: env.parse(
                "HEATMAP_TRADE_CHANNEL_CAPACITY",
                BroadcastSettings::default().trades_capacity,
            )?,
        };
        if broadcast.trades_capacity == 0 {
            return Err(ConfigError::invalid(
                "HEATMAP_TRADE_CHANNEL_CAPACITY",
                "0",
                "must be greater than zero",
            ));
        }

        let server = ServerSettings {
            health_port: env.parse("HEATMAP_HEALTH_PORT", ServerSettings::default().health_port)?,
        };

        Ok(Self {
            environment,
            gateway,
            aggregation,
            server,
            broadcast,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed or is out of range.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
        /// What is wrong with it.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
    }

    fn non_empty_or(&self, key: &str, default: &str) -> Result<String, ConfigError> {
        match self.get(key) {
            None => Ok(default.to_string()),
            Some(value) if value.trim().is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
            Some(value) => Ok(value.trim().to_string()),
        }
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key).map_or(Ok(default), |raw| {
            raw.trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::invalid(key, raw.clone(), e.to_string()))
        })
    }

    fn parse_f64(&self, key: &str, default: f64) -> Result<f64, ConfigError> {
        let value: f64 = self.parse(key, default)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(ConfigError::invalid(key, value.to_string(), "must be finite"))
        }
    }

    fn parse_duration_secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        Ok(self
            .get(key)
            .map(|_| self.parse::<u64>(key, 0))
            .transpose()?
            .map_or(default, Duration::from_secs))
    }

    fn parse_duration_millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        Ok(self
            .get(key)
            .map(|_| self.parse::<u64>(key, 0))
            .transpose()?
            .map_or(default, Duration::from_millis))
    }
}

fn validate_url_scheme(key: &str, url: &str) -> Result<(), ConfigError> {
    let url = url.trim();
    let valid = ["ws://", "wss://", "http://", "https://"]
        .iter()
        .any(|scheme| url.len() > scheme.len() && url.to_ascii_lowercase().starts_with(scheme));

    if valid {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            key,
            url,
            "expected a ws, wss, http or https URL with a host",
        ))
    }
}

fn validate_gateway(gateway: &GatewaySettings) -> Result<(), ConfigError> {
    if gateway.reconnect_delay_initial.is_zero() {
        return Err(ConfigError::invalid(
            "TRADE_GATEWAY_RECONNECT_DELAY_INITIAL_MS",
            "0",
            "must be greater than zero",
        ));
    }
    if gateway.reconnect_delay_max < gateway.reconnect_delay_initial {
        return Err(ConfigError::invalid(
            "TRADE_GATEWAY_RECONNECT_DELAY_MAX_MS",
            gateway.reconnect_delay_max.as_millis().to_string(),
            "must not be below the initial delay",
        ));
    }
    if gateway.reconnect_delay_multiplier < 1.0 {
        return Err(ConfigError::invalid(
            "TRADE_GATEWAY_RECONNECT_DELAY_MULTIPLIER",
            gateway.reconnect_delay_multiplier.to_string(),
            "must be at least 1.0",
        ));
    }
    if !(0.0..=1.0).contains(&gateway.reconnect_jitter) {
        return Err(ConfigError::invalid(
            "TRADE_GATEWAY_RECONNECT_JITTER",
            gateway.reconnect_jitter.to_string(),
            "must be between 0.0 and 1.0",
        ));
    }
    if gateway.connect_timeout.is_zero() {
        return Err(ConfigError::invalid(
            "TRADE_GATEWAY_CONNECT_TIMEOUT_SECS",
            "0",
            "must be greater than zero",
        ));
    }
    Ok(())
}

fn validate_aggregation(aggregation: &AggregationSettings) -> Result<(), ConfigError> {
    if aggregation.window_ms <= 0 {
        return Err(ConfigError::invalid(
            "HEATMAP_WINDOW_MS",
            aggregation.window_ms.to_string(),
            "must be greater than zero",
        ));
    }
    if aggregation.scale_factor <= 0.0 {
        return Err(ConfigError::invalid(
            "HEATMAP_SCALE_FACTOR",
            aggregation.scale_factor.to_string(),
            "must be greater than zero",
        ));
    }
    if aggregation.max_batch == 0 {
        return Err(ConfigError::invalid(
            "HEATMAP_MAX_BATCH",
            "0",
            "must be greater than zero",
        ));
    }
    if aggregation.refresh_interval.is_zero() {
        return Err(ConfigError::invalid(
            "HEATMAP_REFRESH_INTERVAL_MS",
            "0",
            "must be greater than zero",
        ));
    }
    if aggregation.dispatch_capacity == 0 {
        return Err(ConfigError::invalid(
            "HEATMAP_DISPATCH_CAPACITY",
            "0",
            "must be greater than zero",
        ));
    }
    Ok(())
}

fn normalize_namespace(namespace: &str) -> String {
    if namespace.starts_with('/') {
        namespace.to_string()
    } else {
        format!("/{namespace}")
    }
}

fn parse_symbol_list(raw: &str) -> Vec<String> {
    let mut symbols: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    symbols.dedup();
    symbols
}
