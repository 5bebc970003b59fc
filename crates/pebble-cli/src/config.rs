//! Configuration – reads/writes `~/.pebble/config.toml`.

use pebble_middleware::Topics;
use pebble_runtime::{CompanionConfig, ControlLoopConfig, DockingConfig, LogFormat, LogSettings};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The `[control]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlSettings {
    pub tick_ms: u64,
    pub face_cooldown_secs: u64,
    pub object_cooldown_secs: u64,
    pub low_battery_voltage: f64,
    pub full_battery_voltage: f64,
    /// 0 seeds from OS entropy.
    pub seed: u64,
}

impl Default for ControlSettings {
    fn default() -> Self {
        let companion = CompanionConfig::default();
        Self {
            tick_ms: 100,
            face_cooldown_secs: 60,
            object_cooldown_secs: 300,
            low_battery_voltage: companion.low_battery_voltage,
            full_battery_voltage: companion.full_battery_voltage,
            seed: 0,
        }
    }
}

/// The `[docking]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockingSettings {
    pub offset_mm: f64,
    pub speed_mmps: f64,
    pub tolerance_position_mm: f64,
    pub tolerance_angle_deg: f64,
    pub max_search_attempts: u32,
    pub approach_distance_mm: f64,
    pub max_restarts: u32,
}

impl Default for DockingSettings {
    fn default() -> Self {
        let docking = DockingConfig::default();
        Self {
            offset_mm: docking.offset_mm,
            speed_mmps: docking.speed_mmps,
            tolerance_position_mm: docking.tolerance_position_mm,
            tolerance_angle_deg: docking.tolerance_angle_rad.to_degrees(),
            max_search_attempts: docking.max_search_attempts,
            approach_distance_mm: docking.approach_distance_mm,
            max_restarts: docking.max_restarts,
        }
    }
}

/// Persisted configuration stored in `~/.pebble/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub topics: Topics,
    pub control: ControlSettings,
    pub docking: DockingSettings,
    pub logging: LogSettings,
}

impl Config {
    /// Runtime configuration for the control loop.
    pub fn control_loop(&self) -> ControlLoopConfig {
        let defaults = ControlLoopConfig::default();
        ControlLoopConfig {
            tick: Duration::from_millis(self.control.tick_ms.max(1)),
            face_cooldown: Duration::from_secs(self.control.face_cooldown_secs),
            object_cooldown: Duration::from_secs(self.control.object_cooldown_secs),
            seed: self.control.seed,
            topics: self.topics.clone(),
            companion: CompanionConfig {
                low_battery_voltage: self.control.low_battery_voltage,
                full_battery_voltage: self.control.full_battery_voltage,
                ..defaults.companion
            },
            docking: DockingConfig {
                offset_mm: self.docking.offset_mm,
                speed_mmps: self.docking.speed_mmps,
                tolerance_position_mm: self.docking.tolerance_position_mm,
                tolerance_angle_rad: self.docking.tolerance_angle_deg.to_radians(),
                max_search_attempts: self.docking.max_search_attempts,
                approach_distance_mm: self.docking.approach_distance_mm,
                max_restarts: self.docking.max_restarts,
                ..defaults.docking
            },
        }
    }
}

/// Return the path to `~/.pebble/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".pebble").join("config.toml")
}

/// Defaults with `PEBBLE_*` overrides applied, for runs without a config file.
pub fn defaults_with_env() -> Config {
    let mut cfg = Config::default();
    apply_env_overrides(&mut cfg);
    cfg
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `PEBBLE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `PEBBLE_TICK_MS` | `control.tick_ms` |
/// | `PEBBLE_SEED` | `control.seed` |
/// | `PEBBLE_LOG_FORMAT` | `logging.format` (`json` or `compact`) |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("PEBBLE_TICK_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.control.tick_ms = ms;
    }
    if let Ok(v) = std::env::var("PEBBLE_SEED")
        && let Ok(seed) = v.parse::<u64>()
    {
        cfg.control.seed = seed;
    }
    match std::env::var("PEBBLE_LOG_FORMAT").as_deref() {
        Ok("json") => cfg.logging.format = LogFormat::Json,
        Ok("compact") => cfg.logging.format = LogFormat::Compact,
        _ => {}
    }
}

/// Save the config to disk, creating `~/.pebble/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    // Owner-only read/write on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
