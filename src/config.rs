//! Configuration loader for the `sensorflow-ingest` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). Nothing here is global: the loaded [`Config`] is
//! handed to the router, which derives request-scoped pipeline inputs from it.
//!
use std::env;
use std::net::SocketAddr;

use anyhow::{anyhow, bail, Result};

use crate::analysis::{Threshold, Thresholds};
use crate::ingest::{IngestOptions, SentinelPolicy};
use crate::SensorField;

/// Parse an optional environment variable into `$ty` with a default value.
macro_rules! parse_env {
    ($get:expr, $var_name:expr, $ty:ty, $default:expr) => {
        parse_env_opt!($get, $var_name, $ty).unwrap_or($default)
    };
}

/// Parse an optional environment variable into `Option<$ty>`.
macro_rules! parse_env_opt {
    ($get:expr, $var_name:expr, $ty:ty) => {
        $get($var_name)
            .filter(|v: &String| !v.trim().is_empty())
            .map(|v: String| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
    };
}

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;
const DEFAULT_TEMP_ALERT_MAX: f64 = 450.0;

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    // ---
    /// Address the HTTP server binds to.
    pub bind_addr: SocketAddr,

    /// Largest accepted upload body.
    pub max_upload_bytes: usize,

    /// Trailing window used when a request does not name one.
    pub default_window_minutes: u32,

    /// Smallest and largest window a request may ask for.
    pub min_window_minutes: u32,
    pub max_window_minutes: u32,

    /// Only keep messages published on this topic.
    pub topic_filter: Option<String>,

    /// Treatment of zero/negative placeholder readings.
    pub sentinel_policy: SentinelPolicy,

    /// Alert limits per channel.
    pub temp_alert_max: Option<f64>,
    pub temp_alert_min: Option<f64>,
    pub moisture_alert_max: Option<f64>,
    pub moisture_alert_min: Option<f64>,
    pub co2_alert_max: Option<f64>,
    pub co2_alert_min: Option<f64>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            default_window_minutes: 30,
            min_window_minutes: 5,
            max_window_minutes: 120,
            topic_filter: None,
            sentinel_policy: SentinelPolicy::Literal,
            temp_alert_max: Some(DEFAULT_TEMP_ALERT_MAX),
            temp_alert_min: None,
            moisture_alert_max: None,
            moisture_alert_min: None,
            co2_alert_max: None,
            co2_alert_min: None,
        }
    }
}

/// Load configuration from environment variables with defaults.
///
/// Optional:
/// - `BIND_ADDR` – listen address (default: 0.0.0.0:8080)
/// - `MAX_UPLOAD_BYTES` – request body limit (default: 16 MiB)
/// - `DEFAULT_WINDOW_MINUTES` / `MIN_WINDOW_MINUTES` / `MAX_WINDOW_MINUTES`
///   – trailing window default and bounds (default: 30 / 5 / 120)
/// - `TOPIC_FILTER` – keep only messages on this topic (default: unset)
/// - `SENTINEL_POLICY` – `literal`, `absent` or `forward_fill` (default: literal)
/// - `TEMP_ALERT_MAX` (default: 450), `TEMP_ALERT_MIN`, `MOISTURE_ALERT_MAX`,
///   `MOISTURE_ALERT_MIN`, `CO2_ALERT_MAX`, `CO2_ALERT_MIN` – alert limits
///
/// Returns an error if any variable is present but invalid.
pub fn load_from_env() -> Result<Config> {
    load_from(|name| env::var(name).ok())
}

/// Load configuration through an arbitrary variable lookup.
pub fn load_from<F>(get: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    // ---
    let bind_addr = parse_env!(
        get,
        "BIND_ADDR",
        SocketAddr,
        DEFAULT_BIND_ADDR.parse::<SocketAddr>()?
    );
    let max_upload_bytes = parse_env!(get, "MAX_UPLOAD_BYTES", usize, DEFAULT_MAX_UPLOAD_BYTES);
    let default_window_minutes = parse_env!(get, "DEFAULT_WINDOW_MINUTES", u32, 30);
    let min_window_minutes = parse_env!(get, "MIN_WINDOW_MINUTES", u32, 5);
    let max_window_minutes = parse_env!(get, "MAX_WINDOW_MINUTES", u32, 120);

    if !(min_window_minutes..=max_window_minutes).contains(&default_window_minutes) {
        bail!(
            "DEFAULT_WINDOW_MINUTES ({}) must lie within MIN_WINDOW_MINUTES..=MAX_WINDOW_MINUTES ({}..={})",
            default_window_minutes,
            min_window_minutes,
            max_window_minutes
        );
    }

    let topic_filter = get("TOPIC_FILTER").filter(|t| !t.trim().is_empty());
    let sentinel_policy = match get("SENTINEL_POLICY") {
        Some(name) => SentinelPolicy::parse(&name)
            .ok_or_else(|| anyhow!("Invalid SENTINEL_POLICY: {}", name))?,
        None => SentinelPolicy::Literal,
    };

    Ok(Config {
        bind_addr,
        max_upload_bytes,
        default_window_minutes,
        min_window_minutes,
        max_window_minutes,
        topic_filter,
        sentinel_policy,
        temp_alert_max: Some(parse_env!(get, "TEMP_ALERT_MAX", f64, DEFAULT_TEMP_ALERT_MAX)),
        temp_alert_min: parse_env_opt!(get, "TEMP_ALERT_MIN", f64),
        moisture_alert_max: parse_env_opt!(get, "MOISTURE_ALERT_MAX", f64),
        moisture_alert_min: parse_env_opt!(get, "MOISTURE_ALERT_MIN", f64),
        co2_alert_max: parse_env_opt!(get, "CO2_ALERT_MAX", f64),
        co2_alert_min: parse_env_opt!(get, "CO2_ALERT_MIN", f64),
    })
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  BIND_ADDR        : {}", self.bind_addr);
        tracing::info!("  MAX_UPLOAD_BYTES : {}", self.max_upload_bytes);
        tracing::info!(
            "  WINDOW_MINUTES   : {} (allowed {}..={})",
            self.default_window_minutes,
            self.min_window_minutes,
            self.max_window_minutes
        );
        tracing::info!("  TOPIC_FILTER     : {:?}", self.topic_filter);
        tracing::info!("  SENTINEL_POLICY  : {:?}", self.sentinel_policy);
        tracing::info!("  THRESHOLDS       : {:?}", self.thresholds());
    }

    /// Alert thresholds configured for every channel.
    pub fn thresholds(&self) -> Thresholds {
        // ---
        [
            (SensorField::Temperature, self.temp_alert_max, self.temp_alert_min),
            (SensorField::Moisture, self.moisture_alert_max, self.moisture_alert_min),
            (SensorField::Co2, self.co2_alert_max, self.co2_alert_min),
        ]
        .into_iter()
        .flat_map(|(field, max, min)| {
            max.map(|limit| Threshold::above(field, limit))
                .into_iter()
                .chain(min.map(|limit| Threshold::below(field, limit)))
        })
        .collect()
    }

    /// Ingestion options, optionally overriding the configured topic.
    pub fn ingest_options(&self, topic: Option<&str>) -> IngestOptions {
        IngestOptions {
            topic: topic.map(str::to_string).or_else(|| self.topic_filter.clone()),
            sentinel_policy: self.sentinel_policy,
        }
    }

    pub fn window_allowed(&self, minutes: u32) -> bool {
        (self.min_window_minutes..=self.max_window_minutes).contains(&minutes)
    }
}
