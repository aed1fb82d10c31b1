//! Configuration loading and validation.
//!
//! The configuration is a TOML file declaring the bridge and database
//! endpoints, the publish intervals, and one `[[sensors]]` block per
//! physical device. It is read once at startup, validated eagerly, and
//! treated as immutable afterwards: every later failure mode (unknown
//! address, malformed broadcast, sink outage) is a runtime event, never a
//! configuration one.

use crate::decoder::Family;
use crate::mac_address::MacAddress;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default minimum time between live (bridge) updates per sensor.
pub const LIVE_UPDATE_INTERVAL: Duration = Duration::from_secs(2 * 60);

/// Default minimum time between durable (database) writes per sensor.
pub const DURABLE_UPDATE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Errors produced while loading or validating the configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading configuration file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing configuration file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("sensor {0}: missing {1}")]
    MissingField(usize, &'static str),
    #[error("sensor {name:?}: duplicate address {address}")]
    DuplicateAddress { name: String, address: MacAddress },
    #[error("sensor {name:?}: another sensor already uses this name")]
    DuplicateName { name: String },
    #[error("sensor {name:?}: invalid table name {table:?}")]
    InvalidTable { name: String, table: String },
}

/// The main configuration of this program.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub bridge: BridgeConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub intervals: Intervals,
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,
}

/// Connection parameters for the smart-home bridge broker.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    pub host: String,
    #[serde(default = "default_bridge_port")]
    pub port: u16,
    /// Topic prefix the per-sensor state topics live under.
    #[serde(default = "default_base_topic")]
    pub base_topic: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

/// Connection parameters for the time-series database.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// A libpq-style connection URL.
    pub url: String,
}

/// Per-sink publish intervals. Both default to the values the probe has
/// always shipped with; override per deployment when sensors broadcast
/// unusually fast or slow.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Intervals {
    #[serde(default = "default_live_interval", deserialize_with = "deserialize_interval")]
    pub live: Duration,
    #[serde(default = "default_durable_interval", deserialize_with = "deserialize_interval")]
    pub durable: Duration,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            live: LIVE_UPDATE_INTERVAL,
            durable: DURABLE_UPDATE_INTERVAL,
        }
    }
}

/// The configuration of a single sensor.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensorConfig {
    /// Logical name, also the `room` column in family-A rows.
    pub name: String,
    /// Hardware address; any case accepted, normalized on parse.
    pub mac: MacAddress,
    /// Firmware family selector (`atc` or `ruuviv5`).
    pub firmware: Family,
    /// Destination table for durable writes.
    pub table: String,
}

fn default_bridge_port() -> u16 {
    1883
}

fn default_base_topic() -> String {
    "sensor-probe".to_string()
}

fn default_client_id() -> String {
    "sensor-probe".to_string()
}

fn default_live_interval() -> Duration {
    LIVE_UPDATE_INTERVAL
}

fn default_durable_interval() -> Duration {
    DURABLE_UPDATE_INTERVAL
}

fn deserialize_interval<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

/// Load and validate a configuration file.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: Config = toml::from_str(&raw)?;
    validate(&config)?;
    Ok(config)
}

/// Check the sensor list for the mistakes the rest of the program is
/// allowed to assume away: empty identifiers, duplicate addresses or
/// names, and table names that are not plain SQL identifiers (the table
/// name is interpolated into the INSERT statement).
fn validate(config: &Config) -> Result<(), ConfigError> {
    let mut addresses = HashSet::new();
    let mut names = HashSet::new();

    for (i, sensor) in config.sensors.iter().enumerate() {
        if sensor.name.is_empty() {
            return Err(ConfigError::MissingField(i, "name"));
        }
        if sensor.table.is_empty() {
            return Err(ConfigError::MissingField(i, "table"));
        }
        if !is_sql_identifier(&sensor.table) {
            return Err(ConfigError::InvalidTable {
                name: sensor.name.clone(),
                table: sensor.table.clone(),
            });
        }
        if !addresses.insert(sensor.mac) {
            return Err(ConfigError::DuplicateAddress {
                name: sensor.name.clone(),
                address: sensor.mac,
            });
        }
        if !names.insert(sensor.name.as_str()) {
            return Err(ConfigError::DuplicateName {
                name: sensor.name.clone(),
            });
        }
    }

    Ok(())
}

fn is_sql_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parse a duration from a human-readable string.
///
/// Supports the suffixes `ms`, `s`, `m` and `h`; a bare number is
/// interpreted as seconds.
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();

    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    if let Some(num) = src.strip_suffix("ms") {
        let millis: u64 = num
            .trim()
            .parse()
            .map_err(|_| format!("invalid milliseconds: {}", num))?;
        return Ok(Duration::from_millis(millis));
    }

    if let Some(num) = src.strip_suffix('h') {
        let hours: u64 = num
            .trim()
            .parse()
            .map_err(|_| format!("invalid hours: {}", num))?;
        return Ok(Duration::from_secs(hours * 3600));
    }

    if let Some(num) = src.strip_suffix('m') {
        let minutes: u64 = num
            .trim()
            .parse()
            .map_err(|_| format!("invalid minutes: {}", num))?;
        return Ok(Duration::from_secs(minutes * 60));
    }

    if let Some(num) = src.strip_suffix('s') {
        let secs: u64 = num
            .trim()
            .parse()
            .map_err(|_| format!("invalid seconds: {}", num))?;
        return Ok(Duration::from_secs(secs));
    }

    let secs: u64 = src
        .parse()
        .map_err(|_| format!("invalid duration: {}", src))?;
    Ok(Duration::from_secs(secs))
}
