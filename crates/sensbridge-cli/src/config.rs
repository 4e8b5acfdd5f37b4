//! Boot config location – `~/.sensbridge/boot_config.json` unless
//! `SENSBRIDGE_BOOT_CONFIG` names another file.

use std::fs;
use std::path::{Path, PathBuf};

use sensbridge_runtime::{BootConfig, DEFAULT_CONVERTERS, DEFAULT_SUBSCRIBERS, DefaultSource};
use serde_json::{Map, Value, json};

/// Return the boot config path, honouring `SENSBRIDGE_BOOT_CONFIG`.
pub fn boot_config_path() -> PathBuf {
    boot_config_path_from(std::env::var("SENSBRIDGE_BOOT_CONFIG").ok(), &home())
}

/// Extracted for testability without mutating environment variables.
pub(crate) fn boot_config_path_from(override_path: Option<String>, home: &str) -> PathBuf {
    match override_path.filter(|p| !p.trim().is_empty()) {
        Some(path) => PathBuf::from(path),
        None => sensbridge_dir_for_home(home).join("boot_config.json"),
    }
}

/// Where containers go when the boot config does not say.
pub fn default_container_dir() -> PathBuf {
    sensbridge_dir_for_home(&home()).join("containers")
}

pub(crate) fn sensbridge_dir_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".sensbridge")
}

fn home() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

/// Load the boot config at `path`. `Ok(None)` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<BootConfig>, String> {
    if !path.exists() {
        return Ok(None);
    }
    BootConfig::load(path).map(Some).map_err(|e| e.to_string())
}

/// A boot config listing every built-in converter and subscriber with its
/// defaults, ready to be edited.
pub fn default_document() -> Value {
    let converters: Map<String, Value> = DEFAULT_CONVERTERS
        .iter()
        .map(|c| {
            let entry = match c.source {
                DefaultSource::Event { .. } => json!({ "enabled": true }),
                _ => json!({ "enabled": true, "frequency": c.frequency }),
            };
            (c.name.to_string(), entry)
        })
        .collect();
    let subscribers: Map<String, Value> = DEFAULT_SUBSCRIBERS
        .iter()
        .map(|s| (s.name.to_string(), json!({ "enabled": true })))
        .collect();
    json!({
        "converters": converters,
        "subscribers": subscribers,
        "driver": { "buffer_horizon_secs": 10.0 },
    })
}

/// Write [`default_document`] to `path`, creating parent directories.
pub fn save_default_to(path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw = serde_json::to_string_pretty(&default_document())
        .map_err(|e| format!("Failed to serialize boot config: {}", e))?;
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write boot config at {}: {}", path.display(), e))
}
