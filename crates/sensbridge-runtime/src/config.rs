//! Boot configuration – a JSON document read once at startup.
//!
//! Values are looked up by dotted path with a caller-supplied default, so a
//! missing file, a missing key and a value of the wrong type all degrade to
//! the default:
//!
//! ```rust
//! use sensbridge_runtime::config::BootConfig;
//!
//! let boot: BootConfig = r#"{ "converters": { "odom": { "frequency": 25 } } }"#.parse().unwrap();
//! assert_eq!(boot.get("converters.odom.frequency", 10.0), 25.0);
//! assert!(boot.get("converters.odom.enabled", true));
//! ```
//!
//! [`RuntimeConfig`] gathers the typed settings of the scheduler, the event
//! bus and the container store from the `driver.*`, `bus.*` and `recorder.*`
//! sections, then applies `SENSBRIDGE_*` environment overrides.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use sensbridge_kernel::DriverConfig;
use sensbridge_types::BridgeError;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

/// Parsed boot configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BootConfig {
    root: Value,
}

impl BootConfig {
    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    /// Read `path`. A file that does not exist yields an empty config.
    pub fn load(path: &Path) -> Result<Self, BridgeError> {
        if !path.exists() {
            info!(path = %path.display(), "no boot config; using defaults");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!("failed to read boot config at {}: {e}", path.display()))
        })?;
        let config = raw.parse()?;
        info!(path = %path.display(), "boot config loaded");
        Ok(config)
    }

    /// The value at dotted `path`, or `default` when it is absent or does
    /// not deserialize as `T`.
    pub fn get<T: DeserializeOwned>(&self, path: &str, default: T) -> T {
        let Some(node) = self.node(path) else {
            return default;
        };
        match serde_json::from_value(node.clone()) {
            Ok(value) => value,
            Err(e) => {
                debug!(path, error = %e, "boot config value has the wrong type; using default");
                default
            }
        }
    }

    /// Whether anything is stored at `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.node(path).is_some()
    }

    fn node(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .filter(|segment| !segment.is_empty())
            .try_fold(&self.root, |node, segment| node.get(segment))
            .filter(|node| !node.is_null())
    }
}

impl FromStr for BootConfig {
    type Err = BridgeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let root: Value = serde_json::from_str(raw)
            .map_err(|e| BridgeError::Config(format!("failed to parse boot config: {e}")))?;
        if !root.is_object() {
            return Err(BridgeError::Config("boot config must be a JSON object".into()));
        }
        Ok(Self { root })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Typed runtime settings
// ─────────────────────────────────────────────────────────────────────────────

/// Capacity of each topic channel of the event bus.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Everything needed to assemble a bridge besides the hardware session.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub driver: DriverConfig,
    /// Directory holding the recorded containers.
    pub container_dir: PathBuf,
    pub bus_capacity: usize,
}

impl RuntimeConfig {
    /// Read the typed settings from `boot`, falling back to
    /// [`DriverConfig::default`] field by field.
    ///
    /// | Key | Field |
    /// |---|---|
    /// | `driver.buffer_horizon_secs` | buffer horizon |
    /// | `driver.storage_limit_bytes` | dump storage ceiling |
    /// | `driver.idle_interval_ms` | idle sleep of an empty scheduler |
    /// | `driver.sleep_slice_ms` | longest uninterrupted sleep |
    /// | `driver.stop_grace_ms` | event source stop grace |
    /// | `bus.capacity` | topic channel capacity |
    /// | `recorder.container_dir` | container directory |
    pub fn from_boot(boot: &BootConfig, default_container_dir: &Path) -> Self {
        let defaults = DriverConfig::default();
        let millis = |path: &str, default: Duration| {
            Duration::from_millis(boot.get(path, default.as_millis() as u64))
        };
        let horizon_secs = boot.get("driver.buffer_horizon_secs", defaults.buffer_horizon.as_secs_f64());

        Self {
            driver: DriverConfig {
                idle_interval: millis("driver.idle_interval_ms", defaults.idle_interval),
                sleep_slice: millis("driver.sleep_slice_ms", defaults.sleep_slice),
                stop_grace: millis("driver.stop_grace_ms", defaults.stop_grace),
                storage_limit: boot.get("driver.storage_limit_bytes", defaults.storage_limit),
                buffer_horizon: secs_or(horizon_secs, defaults.buffer_horizon),
            },
            container_dir: boot.get("recorder.container_dir", default_container_dir.to_path_buf()),
            bus_capacity: boot.get("bus.capacity", DEFAULT_BUS_CAPACITY).max(1),
        }
    }
}

/// Apply `SENSBRIDGE_*` environment variable overrides to `cfg`.
///
/// Supported variables:
///
/// | Variable | Config field |
/// |---|---|
/// | `SENSBRIDGE_CONTAINER_DIR` | `container_dir` |
/// | `SENSBRIDGE_BUFFER_HORIZON_SECS` | `driver.buffer_horizon` |
/// | `SENSBRIDGE_STORAGE_LIMIT_BYTES` | `driver.storage_limit` |
/// | `SENSBRIDGE_BUS_CAPACITY` | `bus_capacity` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut RuntimeConfig) {
    if let Ok(v) = std::env::var("SENSBRIDGE_CONTAINER_DIR") {
        cfg.container_dir = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("SENSBRIDGE_BUFFER_HORIZON_SECS")
        && let Ok(secs) = v.trim().parse::<f64>()
    {
        cfg.driver.buffer_horizon = secs_or(secs, cfg.driver.buffer_horizon);
    }
    if let Ok(v) = std::env::var("SENSBRIDGE_STORAGE_LIMIT_BYTES")
        && let Ok(bytes) = v.trim().parse::<u64>()
    {
        cfg.driver.storage_limit = bytes;
    }
    if let Ok(v) = std::env::var("SENSBRIDGE_BUS_CAPACITY")
        && let Ok(capacity) = v.trim().parse::<usize>()
        && capacity > 0
    {
        cfg.bus_capacity = capacity;
    }
}

fn secs_or(secs: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(fallback)
}
