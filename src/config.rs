//! Configuration for the line monitor.
//!
//! The on-disk [`Config`] is a JSON document. Its [`DetectionSettings`] part is
//! hot-reloadable: the engine reads it through a [`SettingsHandle`], an
//! atomically swappable immutable snapshot.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Number of production lines seeded into a fresh configuration.
pub const DEFAULT_LINE_COUNT: usize = 13;

/// Largest accepted value for any seconds setting.
pub const MAX_SETTING_SECS: u64 = i64::MAX as u64;

/// Seconds setting as a signed duration, saturating at `i64::MAX`.
pub fn signed_secs(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX)
}

/// Chart windows the dashboard knows how to draw.
pub const ALLOWED_GRAPH_HOURS: [u32; 2] = [24, 48];

/// Main configuration for the monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Smoothing and state detection parameters
    pub detection: DetectionSettings,

    /// Known production lines
    pub lines: Vec<LineProfile>,

    /// HTTP port for the server
    pub port: u16,

    /// Path for stats and other local state
    pub data_path: PathBuf,

    /// SQLite database holding the status log and minute statistics
    pub database_path: PathBuf,

    /// Period of the flush/offline maintenance cycle
    #[serde(with = "duration_serde")]
    pub maintenance_interval: Duration,

    /// Hours of minute-resolution speed shown on charts (24 or 48)
    pub graph_hours: u32,

    /// Days covered by the daily work/idle chart and report
    pub report_days: u32,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("line-monitor");

        Self {
            detection: DetectionSettings::default(),
            lines: LineProfile::seeded(DEFAULT_LINE_COUNT),
            port: 3000,
            database_path: data_dir.join("data.db"),
            data_path: data_dir,
            maintenance_interval: Duration::from_secs(15),
            graph_hours: 24,
            report_days: 30,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific file, falling back to defaults
    /// when the file does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to a specific file.
    ///
    /// Writes to a sibling temp file first and renames it into place so a
    /// concurrently reloading server never sees a half-written document.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, content)?;
        std::fs::rename(&tmp_path, path)?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("line-monitor")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)?;
        if let Some(parent) = self.database_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Look up a line profile by id.
    pub fn line(&self, line_id: &str) -> Option<&LineProfile> {
        self.lines.iter().find(|l| l.id == line_id)
    }

    /// Display name for a line, defaulting to its id.
    pub fn display_name(&self, line_id: &str) -> String {
        self.line(line_id)
            .and_then(|l| l.display_name.clone())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| line_id.to_string())
    }

    /// Product label currently assigned to a line.
    pub fn product(&self, line_id: &str) -> Option<String> {
        self.line(line_id)
            .and_then(|l| l.product.clone())
            .filter(|p| !p.is_empty())
    }

    /// Ids of lines shown on the dashboard and in reports.
    pub fn enabled_line_ids(&self) -> Vec<String> {
        self.lines
            .iter()
            .filter(|l| l.enabled)
            .map(|l| l.id.clone())
            .collect()
    }

    /// Apply a settings patch to this configuration.
    pub fn apply_patch(&mut self, patch: &SettingsPatch) {
        self.detection = self.detection.apply(patch);
        if let Some(hours) = patch.graph_hours.as_ref().and_then(non_negative) {
            let hours = hours as u32;
            if ALLOWED_GRAPH_HOURS.contains(&hours) {
                self.graph_hours = hours;
            }
        }
        if let Some(ref names) = patch.line_names {
            for line in &mut self.lines {
                if let Some(name) = names.get(&line.id) {
                    line.display_name = Some(name.clone());
                }
            }
        }
        if let Some(ref products) = patch.products {
            for line in &mut self.lines {
                if let Some(product) = products.get(&line.id) {
                    line.product = Some(product.clone());
                }
            }
        }
        if let Some(ref enabled) = patch.enabled_lines {
            for line in &mut self.lines {
                line.enabled = enabled.contains(&line.id);
            }
        }
    }
}

/// A production line known to the monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineProfile {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Product currently running on the line; stamped onto status events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

impl LineProfile {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            product: None,
            enabled: true,
        }
    }

    /// Profiles `line1..=lineN`.
    pub fn seeded(count: usize) -> Vec<Self> {
        (1..=count).map(|i| Self::new(format!("line{i}"))).collect()
    }
}

/// Smoothing, hysteresis and reconstruction parameters.
///
/// Times are in seconds, speeds in pulses per minute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Length of the smoothing window
    #[serde(rename = "windowSec")]
    pub window_secs: u64,
    /// Speed at or above which a stopped line starts its start timer
    #[serde(rename = "V_START")]
    pub v_start: f64,
    /// Speed at or below which a running line starts its stop timer
    #[serde(rename = "V_STOP")]
    pub v_stop: f64,
    /// Continuous time above `v_start` needed to declare running
    #[serde(rename = "delayStart")]
    pub delay_start_secs: u64,
    /// Continuous time below `v_stop` needed to declare stopped
    #[serde(rename = "delayStop")]
    pub delay_stop_secs: u64,
    /// Packet silence after which a line is forced to stopped
    #[serde(rename = "offlineTimeout")]
    pub offline_timeout_secs: u64,
    /// Reconstructed segments shorter than this are treated as noise
    #[serde(rename = "minSegmentSec")]
    pub min_segment_secs: u64,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            window_secs: 60,
            v_start: 0.5,
            v_stop: 0.3,
            delay_start_secs: 30,
            delay_stop_secs: 30,
            offline_timeout_secs: 60,
            min_segment_secs: 60,
        }
    }
}

impl DetectionSettings {
    /// Return a copy with every valid field of `patch` applied.
    ///
    /// Missing, negative, NaN and non-numeric values keep the current value.
    pub fn apply(&self, patch: &SettingsPatch) -> Self {
        let secs = |value: &Option<serde_json::Value>, prior: u64| {
            value
                .as_ref()
                .and_then(non_negative)
                .map(|n| (n as u64).min(MAX_SETTING_SECS))
                .unwrap_or(prior)
        };
        let speed = |value: &Option<serde_json::Value>, prior: f64| {
            value.as_ref().and_then(non_negative).unwrap_or(prior)
        };

        Self {
            window_secs: secs(&patch.window_secs, self.window_secs),
            v_start: speed(&patch.v_start, self.v_start),
            v_stop: speed(&patch.v_stop, self.v_stop),
            delay_start_secs: secs(&patch.delay_start, self.delay_start_secs),
            delay_stop_secs: secs(&patch.delay_stop, self.delay_stop_secs),
            offline_timeout_secs: secs(&patch.offline_timeout, self.offline_timeout_secs),
            min_segment_secs: secs(&patch.min_segment_secs, self.min_segment_secs),
        }
    }
}

/// Accepts JSON numbers and numeric strings; rejects negatives and NaN.
fn non_negative(value: &serde_json::Value) -> Option<f64> {
    let n = match value {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (n.is_finite() && n >= 0.0).then_some(n)
}

/// Loosely typed settings update, as posted by the settings page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsPatch {
    #[serde(rename = "windowSec", default)]
    pub window_secs: Option<serde_json::Value>,
    #[serde(rename = "V_START", default)]
    pub v_start: Option<serde_json::Value>,
    #[serde(rename = "V_STOP", default)]
    pub v_stop: Option<serde_json::Value>,
    #[serde(rename = "delayStart", default)]
    pub delay_start: Option<serde_json::Value>,
    #[serde(rename = "delayStop", default)]
    pub delay_stop: Option<serde_json::Value>,
    #[serde(rename = "offlineTimeout", default)]
    pub offline_timeout: Option<serde_json::Value>,
    #[serde(rename = "minSegmentSec", default)]
    pub min_segment_secs: Option<serde_json::Value>,
    #[serde(rename = "graphHours", default)]
    pub graph_hours: Option<serde_json::Value>,
    #[serde(rename = "lineNames", default)]
    pub line_names: Option<std::collections::BTreeMap<String, String>>,
    #[serde(default)]
    pub products: Option<std::collections::BTreeMap<String, String>>,
    #[serde(rename = "enabledLines", default)]
    pub enabled_lines: Option<Vec<String>>,
}

/// Atomically swappable detection settings shared by every reader.
#[derive(Debug)]
pub struct SettingsHandle {
    current: ArcSwap<DetectionSettings>,
}

impl SettingsHandle {
    pub fn new(settings: DetectionSettings) -> Self {
        Self {
            current: ArcSwap::from_pointee(settings),
        }
    }

    /// The current snapshot. Hold it for the duration of one operation.
    pub fn snapshot(&self) -> Arc<DetectionSettings> {
        self.current.load_full()
    }

    /// Replace the snapshot wholesale.
    pub fn replace(&self, settings: DetectionSettings) {
        self.current.store(Arc::new(settings));
    }

    /// Apply a patch on top of the current snapshot and return the result.
    pub fn update(&self, patch: &SettingsPatch) -> Arc<DetectionSettings> {
        self.current.rcu(|current| Arc::new(current.apply(patch)));
        self.snapshot()
    }
}

impl Default for SettingsHandle {
    fn default() -> Self {
        Self::new(DetectionSettings::default())
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Serde support for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.lines.len(), DEFAULT_LINE_COUNT);
        assert_eq!(config.lines[0].id, "line1");
        assert_eq!(config.maintenance_interval, Duration::from_secs(15));
        assert_eq!(config.detection.window_secs, 60);
        assert_eq!(config.graph_hours, 24);
    }

    #[test]
    fn test_patch_keeps_prior_on_invalid_values() {
        let settings = DetectionSettings::default();
        let patch = SettingsPatch {
            window_secs: Some(json!(-5)),
            v_start: Some(json!("abc")),
            v_stop: Some(json!("0.2")),
            delay_start: Some(json!(45)),
            delay_stop: Some(json!(null)),
            ..Default::default()
        };

        let next = settings.apply(&patch);
        assert_eq!(next.window_secs, 60);
        assert_eq!(next.v_start, 0.5);
        assert_eq!(next.v_stop, 0.2);
        assert_eq!(next.delay_start_secs, 45);
        assert_eq!(next.delay_stop_secs, 30);
    }

    #[test]
    fn test_oversized_seconds_are_clamped() {
        let patch = SettingsPatch {
            window_secs: Some(json!(1e19)),
            delay_stop: Some(json!("1e30")),
            ..Default::default()
        };
        let next = DetectionSettings::default().apply(&patch);
        assert_eq!(next.window_secs, MAX_SETTING_SECS);
        assert_eq!(next.delay_stop_secs, MAX_SETTING_SECS);
        assert_eq!(signed_secs(next.window_secs), i64::MAX);
        assert_eq!(signed_secs(u64::MAX), i64::MAX);
    }

    #[test]
    fn test_settings_handle_swaps_snapshot() {
        let handle = SettingsHandle::default();
        let before = handle.snapshot();

        let patch = SettingsPatch {
            offline_timeout: Some(json!(120)),
            ..Default::default()
        };
        let after = handle.update(&patch);

        assert_eq!(before.offline_timeout_secs, 60);
        assert_eq!(after.offline_timeout_secs, 120);
        assert_eq!(handle.snapshot().offline_timeout_secs, 120);
    }

    #[test]
    fn test_graph_hours_only_accepts_known_windows() {
        let mut config = Config::default();
        let mut patch = SettingsPatch {
            graph_hours: Some(json!(36)),
            ..Default::default()
        };
        config.apply_patch(&patch);
        assert_eq!(config.graph_hours, 24);

        patch.graph_hours = Some(json!(48));
        config.apply_patch(&patch);
        assert_eq!(config.graph_hours, 48);
    }

    #[test]
    fn test_patch_updates_line_profiles() {
        let mut config = Config::default();
        let patch = SettingsPatch {
            products: Some([("line2".to_string(), "PE pipe 32mm".to_string())].into()),
            line_names: Some([("line2".to_string(), "Extruder B".to_string())].into()),
            ..Default::default()
        };
        config.apply_patch(&patch);

        assert_eq!(config.product("line2").as_deref(), Some("PE pipe 32mm"));
        assert_eq!(config.display_name("line2"), "Extruder B");
        assert_eq!(config.display_name("line3"), "line3");
        assert_eq!(config.product("line3"), None);
    }

    #[test]
    fn test_config_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.detection.v_start = 1.5;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.detection.v_start, 1.5);
        assert_eq!(loaded.lines.len(), DEFAULT_LINE_COUNT);
    }

    #[test]
    fn test_detection_settings_use_dashboard_keys() {
        let value = serde_json::to_value(DetectionSettings::default()).unwrap();
        assert_eq!(value["windowSec"], 60);
        assert_eq!(value["V_START"], 0.5);
        assert_eq!(value["offlineTimeout"], 60);
    }
}
