use serde::{Deserialize, Serialize};
use serde_json::Value;
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
    #[serde(default = "default_true")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
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
            show_file_line: default_true(),
            show_thread_ids: default_false(),
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
    "gatt_alert_server".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

pub const SETTING_ON: &str = "on";
pub const SETTING_OFF: &str = "off";

/// User-facing alarm settings, exchanged with the bridge as plain strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmSettings {
    /// "on" shows a notification on alarm
    #[serde(default = "default_on")]
    pub alert: String,
    /// "off" or the name of the sound to play
    #[serde(default = "default_sound")]
    pub sound: String,
    #[serde(default = "default_on")]
    pub vibration: String,
    /// "on" writes an alarm log entry per presented alarm
    #[serde(default = "default_off")]
    pub log: String,
}

impl Default for AlarmSettings {
    fn default() -> Self {
        Self {
            alert: default_on(),
            sound: default_sound(),
            vibration: default_on(),
            log: default_off(),
        }
    }
}

fn default_on() -> String {
    SETTING_ON.to_string()
}
fn default_off() -> String {
    SETTING_OFF.to_string()
}
fn default_sound() -> String {
    "default".to_string()
}

impl AlarmSettings {
    pub fn alert_enabled(&self) -> bool {
        self.alert != SETTING_OFF
    }

    /// Sound to play, `None` when muted
    pub fn sound_name(&self) -> Option<&str> {
        if self.sound == SETTING_OFF {
            None
        } else {
            Some(&self.sound)
        }
    }

    pub fn vibration_enabled(&self) -> bool {
        self.vibration == SETTING_ON
    }

    pub fn log_enabled(&self) -> bool {
        self.log == SETTING_ON
    }

    /// Apply a partial update received from the bridge.
    ///
    /// The update is validated completely before anything is changed.
    pub fn apply_update(&mut self, update: &Value) -> Result<(), String> {
        let map = update
            .as_object()
            .ok_or_else(|| "alarm settings must be an object".to_string())?;

        let mut next = self.clone();
        for (key, value) in map {
            let value = value
                .as_str()
                .ok_or_else(|| format!("setting '{}' must be a string", key))?;
            match key.as_str() {
                "alert" => next.alert = parse_switch(key, value)?,
                "vibration" => next.vibration = parse_switch(key, value)?,
                "log" => next.log = parse_switch(key, value)?,
                "sound" => {
                    if value.trim().is_empty() {
                        return Err("setting 'sound' must not be empty".to_string());
                    }
                    next.sound = value.to_string();
                }
                other => return Err(format!("unknown setting '{}'", other)),
            }
        }

        *self = next;
        Ok(())
    }
}

fn parse_switch(key: &str, value: &str) -> Result<String, String> {
    match value {
        SETTING_ON | SETTING_OFF => Ok(value.to_string()),
        _ => Err(format!(
            "setting '{}' must be \"on\" or \"off\", got \"{}\"",
            key, value
        )),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Local name used while advertising
    #[serde(default = "default_local_name")]
    pub local_name: String,
    #[serde(default = "default_bridge_socket_name")]
    pub bridge_socket_name: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            local_name: default_local_name(),
            bridge_socket_name: default_bridge_socket_name(),
        }
    }
}

fn default_local_name() -> String {
    "GattAlertServer".to_string()
}
fn default_bridge_socket_name() -> String {
    "gatt_alert_server.sock".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub alarm: AlarmSettings,

    #[serde(default)]
    pub server: ServerSettings,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load settings from an explicit file, falling back to defaults
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!(
                    "Using default settings ({}): {}",
                    settings_path.display(),
                    e
                );
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("GattAlertServer");
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
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn update_alarm_settings(&mut self, alarm: AlarmSettings) -> anyhow::Result<()> {
        if self.settings.alarm != alarm {
            self.settings.alarm = alarm;
            self.save()?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn temp_settings_path(tag: &str) -> PathBuf {
    std::env::temp_dir()
        .join(format!("gatt_alert_server_{}_{}", tag, std::process::id()))
        .join("settings.json")
}
