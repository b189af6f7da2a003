//! Daemon configuration – reads `~/.warden/config.toml` (or the file named
//! by `WARDEN_CONFIG`) and applies `WARDEN_*` environment overrides.
//!
//! Every field has a default, so a missing file or a missing key is never an
//! error.  A key with a bad value (or an unknown key) is skipped with a
//! warning and the rest of the file still applies.  Durations may be written as plain seconds (`60`, `2.5`) or with a
//! unit suffix (`2.5min`, `1h`, `7days`, `0.5year`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use tracing::warn;
use warden_hal::LinuxPeripherals;
use warden_network::cache::{DEFAULT_CACHE_PATH, DEFAULT_CACHE_TTL};
use warden_perception::SimilarityParams;
use warden_runtime::RuntimeConfig;
use warden_types::PinId;

const YEAR_SECONDS: f64 = 3600.0 * 24.0 * 365.2425;

/// Typed daemon configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// GPIO output pins under control.
    pub pins: Vec<PinId>,
    pub gpio_active_low: bool,
    pub gpio_root: PathBuf,

    /// Permit the network watchdog to reboot the board.
    pub reboot_allowed: bool,
    #[serde(deserialize_with = "duration")]
    pub network_check_interval: Duration,
    pub reachability_cache_path: PathBuf,
    #[serde(deserialize_with = "duration")]
    pub reachability_cache_ttl: Duration,

    #[serde(deserialize_with = "duration")]
    pub camera_check_interval: Duration,
    /// Similarity score below which a frame pair counts as motion.
    pub similarity_floor: u8,
    pub motion_tiles: usize,
    pub motion_noise_threshold: f64,
    pub webcam_device: String,
    pub webcam_resolution: String,

    /// Directory holding the monthly temperature segments.
    pub temperature_storage: PathBuf,
    pub temperature_storage_max_mb: u64,
    pub temperature_device: PathBuf,
    #[serde(deserialize_with = "duration")]
    pub temperature_read_interval: Duration,
    #[serde(deserialize_with = "duration")]
    pub retention_interval: Duration,

    #[serde(deserialize_with = "duration")]
    pub tick_period: Duration,
    /// Size of the blocking worker pool.
    pub workers: usize,
    pub port: u16,
    /// Client names admitted by the API; empty admits everyone.
    pub allowed_clients: Vec<String>,
    /// Run against simulated peripherals instead of the board.
    pub simulate: bool,
}

impl Default for Config {
    fn default() -> Self {
        let runtime = RuntimeConfig::default();
        Self {
            pins: Vec::new(),
            gpio_active_low: true,
            gpio_root: PathBuf::from("/sys/class/gpio"),
            reboot_allowed: runtime.reboot_allowed,
            network_check_interval: runtime.network_check_interval,
            reachability_cache_path: PathBuf::from(DEFAULT_CACHE_PATH),
            reachability_cache_ttl: DEFAULT_CACHE_TTL,
            camera_check_interval: runtime.camera_check_interval,
            similarity_floor: runtime.similarity_floor,
            motion_tiles: runtime.similarity.tiles,
            motion_noise_threshold: runtime.similarity.noise_threshold,
            webcam_device: "video0".to_string(),
            webcam_resolution: "640x480".to_string(),
            temperature_storage: PathBuf::from("/data/temperature"),
            temperature_storage_max_mb: 150,
            temperature_device: PathBuf::from(
                "/sys/bus/w1/devices/w1_bus_master1/28-fc6db0116461/w1_slave",
            ),
            temperature_read_interval: runtime.temperature_read_interval,
            retention_interval: runtime.retention_interval,
            tick_period: runtime.tick_period,
            workers: 4,
            port: warden_cockpit::DEFAULT_PORT,
            allowed_clients: Vec::new(),
            simulate: false,
        }
    }
}

impl Config {
    /// Loop timings and policy for the supervisor.
    pub fn runtime(&self) -> RuntimeConfig {
        RuntimeConfig {
            tick_period: self.tick_period,
            camera_check_interval: self.camera_check_interval,
            similarity: SimilarityParams {
                tiles: self.motion_tiles,
                noise_threshold: self.motion_noise_threshold,
            },
            similarity_floor: self.similarity_floor,
            temperature_read_interval: self.temperature_read_interval,
            retention_interval: self.retention_interval,
            network_check_interval: self.network_check_interval,
            reboot_allowed: self.reboot_allowed,
        }
    }

    /// Driver settings for the real board.
    pub fn linux_peripherals(&self) -> LinuxPeripherals {
        LinuxPeripherals {
            gpio_root: self.gpio_root.clone(),
            gpio_active_low: self.gpio_active_low,
            webcam_device: self.webcam_device.clone(),
            webcam_resolution: self.webcam_resolution.clone(),
            temperature_device: self.temperature_device.clone(),
        }
    }

    pub fn temperature_ceiling_bytes(&self) -> u64 {
        self.temperature_storage_max_mb.saturating_mul(1024 * 1024)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Value parsing
// ────────────────────────────────────────────────────────────────────────────

/// Parse a duration: plain seconds, or a number followed by one of
/// `s`, `m`/`min`, `h`/`hour(s)`, `d`/`day(s)`, `y`/`year(s)`.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    let value: f64 = number.parse().ok()?;
    let scale = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "s" | "sec" | "secs" => 1.0,
        "m" | "min" | "mins" => 60.0,
        "h" | "hour" | "hours" => 3600.0,
        "d" | "day" | "days" => 86_400.0,
        "y" | "year" | "years" => YEAR_SECONDS,
        _ => return None,
    };
    Duration::try_from_secs_f64(value * scale).ok()
}

/// `true`/`on`/`yes`/`ok` (any case) are true; everything else is false.
pub fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_uppercase().as_str(),
        "TRUE" | "ON" | "YES" | "OK"
    )
}

/// Comma-separated pin list; empty items are skipped.
pub fn parse_pins(raw: &str) -> Option<Vec<PinId>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().ok())
        .collect()
}

fn duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(s) => Duration::try_from_secs_f64(s).map_err(serde::de::Error::custom),
        Raw::Text(t) => parse_duration(&t)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid duration: {t}"))),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Loading
// ────────────────────────────────────────────────────────────────────────────

/// Return `$WARDEN_CONFIG`, or `~/.warden/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(p) = std::env::var("WARDEN_CONFIG")
        && !p.trim().is_empty()
    {
        return PathBuf::from(p);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".warden").join("config.toml")
}

/// Load the config from [`config_path`].  Returns `None` if the file does
/// not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let table: toml::Table = raw
        .parse()
        .map_err(|e| format!("Failed to parse config: {}", e))?;

    // Each key is checked on its own so one bad value only costs that key.
    let mut accepted = toml::Table::new();
    for (key, value) in table {
        let mut single = toml::Table::new();
        single.insert(key.clone(), value);
        match toml::Value::Table(single.clone()).try_into::<Config>() {
            Ok(_) => accepted.extend(single),
            Err(e) => warn!(key = %key, error = %e, "ignoring invalid config value"),
        }
    }
    toml::Value::Table(accepted)
        .try_into()
        .map(Some)
        .map_err(|e| format!("Failed to apply config: {}", e))
}

/// Apply `WARDEN_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `WARDEN_PINS` | `pins` (comma list) |
/// | `WARDEN_GPIO_ACTIVE_LOW` | `gpio_active_low` |
/// | `WARDEN_REBOOT_ALLOW` | `reboot_allowed` |
/// | `WARDEN_NETWORK_CHECK_TIMEOUT` | `network_check_interval` |
/// | `WARDEN_CAMERA_CHECK_INTERVAL` | `camera_check_interval` |
/// | `WARDEN_IMG_COMPARE_LIMIT` | `similarity_floor` |
/// | `WARDEN_TEMPERATURE_STORAGE` | `temperature_storage` |
/// | `WARDEN_WORKERS` | `workers` |
/// | `WARDEN_PORT` | `port` |
/// | `WARDEN_SIMULATE` | `simulate` |
///
/// Values that fail to parse leave the field unchanged.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    fn set<T>(slot: &mut T, key: &str, raw: Option<String>, parse: impl FnOnce(&str) -> Option<T>) {
        let Some(raw) = raw else { return };
        match parse(&raw) {
            Some(v) => *slot = v,
            None => warn!(key, value = %raw, "ignoring invalid setting"),
        }
    }

    set(&mut cfg.pins, "WARDEN_PINS", var("WARDEN_PINS"), parse_pins);
    set(
        &mut cfg.gpio_active_low,
        "WARDEN_GPIO_ACTIVE_LOW",
        var("WARDEN_GPIO_ACTIVE_LOW"),
        |v| Some(parse_flag(v)),
    );
    set(
        &mut cfg.reboot_allowed,
        "WARDEN_REBOOT_ALLOW",
        var("WARDEN_REBOOT_ALLOW"),
        |v| Some(parse_flag(v)),
    );
    set(
        &mut cfg.network_check_interval,
        "WARDEN_NETWORK_CHECK_TIMEOUT",
        var("WARDEN_NETWORK_CHECK_TIMEOUT"),
        parse_duration,
    );
    set(
        &mut cfg.camera_check_interval,
        "WARDEN_CAMERA_CHECK_INTERVAL",
        var("WARDEN_CAMERA_CHECK_INTERVAL"),
        parse_duration,
    );
    set(
        &mut cfg.similarity_floor,
        "WARDEN_IMG_COMPARE_LIMIT",
        var("WARDEN_IMG_COMPARE_LIMIT"),
        |v| v.trim().parse().ok().filter(|f| *f <= 100),
    );
    set(
        &mut cfg.temperature_storage,
        "WARDEN_TEMPERATURE_STORAGE",
        var("WARDEN_TEMPERATURE_STORAGE"),
        |v| Some(PathBuf::from(v.trim())),
    );
    set(&mut cfg.workers, "WARDEN_WORKERS", var("WARDEN_WORKERS"), |v| {
        v.trim().parse().ok().filter(|n| *n > 0)
    });
    set(&mut cfg.port, "WARDEN_PORT", var("WARDEN_PORT"), |v| v.trim().parse().ok());
    set(&mut cfg.simulate, "WARDEN_SIMULATE", var("WARDEN_SIMULATE"), |v| {
        Some(parse_flag(v))
    });
}
