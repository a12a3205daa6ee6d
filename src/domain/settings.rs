use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_true(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "tsdz_link".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Timing and identifiers for the controller link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSettings {
    #[serde(default = "default_service_uuid")]
    pub service_uuid: String,
    #[serde(default = "default_periodic_uuid")]
    pub periodic_char_uuid: String,
    #[serde(default = "default_configuration_uuid")]
    pub configuration_char_uuid: String,

    #[serde(default = "default_readiness_poll_ms")]
    pub readiness_poll_ms: u64,
    #[serde(default = "default_max_connect_attempts")]
    pub max_connect_attempts: u32,
    #[serde(default = "default_connect_retry_delay_ms")]
    pub connect_retry_delay_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How often the UI may look at the cached snapshots
    #[serde(default = "default_observe_interval_ms")]
    pub observe_interval_ms: u64,
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,

    #[serde(default)]
    pub last_connected_device: Option<String>,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            service_uuid: default_service_uuid(),
            periodic_char_uuid: default_periodic_uuid(),
            configuration_char_uuid: default_configuration_uuid(),
            readiness_poll_ms: default_readiness_poll_ms(),
            max_connect_attempts: default_max_connect_attempts(),
            connect_retry_delay_ms: default_connect_retry_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            observe_interval_ms: default_observe_interval_ms(),
            io_timeout_ms: default_io_timeout_ms(),
            last_connected_device: None,
        }
    }
}

fn default_service_uuid() -> String {
    "dac21400-cfdd-462f-bfaf-7f6e4ccbb45f".to_string()
}
fn default_periodic_uuid() -> String {
    "dac21401-cfdd-462f-bfaf-7f6e4ccbb45f".to_string()
}
fn default_configuration_uuid() -> String {
    "dac21402-cfdd-462f-bfaf-7f6e4ccbb45f".to_string()
}
fn default_readiness_poll_ms() -> u64 {
    500
}
fn default_max_connect_attempts() -> u32 {
    10
}
fn default_connect_retry_delay_ms() -> u64 {
    1000
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_observe_interval_ms() -> u64 {
    200
}
fn default_io_timeout_ms() -> u64 {
    3000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_settings: LogSettings,
    #[serde(default)]
    pub link: LinkSettings,
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load settings from the user's config directory, falling back to defaults
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load settings from an explicit file
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("TsdzLink");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn remember_device(&mut self, device_id: &str) -> anyhow::Result<()> {
        if self.settings.link.last_connected_device.as_deref() != Some(device_id) {
            self.settings.link.last_connected_device = Some(device_id.to_string());
            self.save()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_use_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{ "link": { "poll_interval_ms": 250 } }"#).unwrap();
        assert_eq!(settings.link.poll_interval_ms, 250);
        assert_eq!(settings.link.max_connect_attempts, 10);
        assert_eq!(settings.link.readiness_poll_ms, 500);
        assert_eq!(settings.log_settings.level, "info");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut service = SettingsService::with_path(path.clone());
        service.get_mut().link.io_timeout_ms = 1500;
        service.remember_device("AA:BB:CC:DD:EE:FF").unwrap();

        let reloaded = SettingsService::with_path(path);
        assert_eq!(reloaded.get().link.io_timeout_ms, 1500);
        assert_eq!(
            reloaded.get().link.last_connected_device.as_deref(),
            Some("AA:BB:CC:DD:EE:FF")
        );
    }

    #[test]
    fn test_unreadable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();

        let service = SettingsService::with_path(path);
        assert_eq!(service.get().link.poll_interval_ms, 1000);
    }
}
