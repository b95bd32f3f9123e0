use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::app::error::AppError;

pub const CONFIG_PATH_ENV: &str = "ANDROID_ASSISTANT_CONFIG_PATH";
const CONFIG_FILE_NAME: &str = ".android_assistant_config.json";
const BACKUP_FILE_NAME: &str = ".android_assistant_config.backup.json";
const LOG_LEVELS: [&str; 5] = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolSettings {
    #[serde(default)]
    pub adb_path: String,
    #[serde(default)]
    pub fastboot_path: String,
    #[serde(default)]
    pub aapt_path: String,
    /// Passed to adb as `-s <serial>` when set.
    #[serde(default)]
    pub serial: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSettings {
    pub log_level: String,
    pub log_commands: bool,
    pub log_to_file: bool,
    pub log_file_path: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
            log_commands: true,
            log_to_file: false,
            log_file_path: "app.log".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackageSettings {
    pub include_system: bool,
    pub include_third_party: bool,
    pub refresh_after_batch: bool,
}

impl Default for PackageSettings {
    fn default() -> Self {
        Self {
            include_system: false,
            include_third_party: false,
            refresh_after_batch: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeviceSettings {
    pub long_format: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub tools: ToolSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub packages: PackageSettings,
    #[serde(default)]
    pub devices: DeviceSettings,
    #[serde(default)]
    pub apks_dir: String,
    #[serde(default)]
    pub version: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tools: ToolSettings::default(),
            logging: LoggingSettings::default(),
            packages: PackageSettings::default(),
            devices: DeviceSettings::default(),
            apks_dir: String::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl AppConfig {
    /// Arguments that select the configured device, if any.
    pub fn serial_args(&self) -> Vec<String> {
        let serial = self.tools.serial.trim();
        if serial.is_empty() {
            Vec::new()
        } else {
            vec!["-s".to_string(), serial.to_string()]
        }
    }
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    home_dir().join(CONFIG_FILE_NAME)
}

pub fn backup_config_path(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(BACKUP_FILE_NAME),
        _ => PathBuf::from(BACKUP_FILE_NAME),
    }
}

pub fn load_config(trace_id: &str) -> Result<AppConfig, AppError> {
    load_config_from_path(&config_path(), trace_id)
}

pub fn load_config_from_path(path: &Path, trace_id: &str) -> Result<AppConfig, AppError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::system(format!("Failed to read config: {err}"), trace_id))?;
    let config: AppConfig = serde_json::from_str(&raw)
        .map_err(|err| AppError::system(format!("Failed to parse config: {err}"), trace_id))?;
    Ok(validate_config(config))
}

pub fn save_config_to_path(
    config: &AppConfig,
    path: &Path,
    backup_path: &Path,
    trace_id: &str,
) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|err| {
                AppError::system(format!("Failed to create config dir: {err}"), trace_id)
            })?;
        }
    }
    if path.exists() {
        let _ = fs::copy(path, backup_path);
    }
    let payload = serde_json::to_string_pretty(config).map_err(|err| {
        AppError::system(format!("Failed to serialize config: {err}"), trace_id)
    })?;
    fs::write(path, payload)
        .map_err(|err| AppError::system(format!("Failed to write config: {err}"), trace_id))?;
    Ok(())
}

fn validate_config(mut config: AppConfig) -> AppConfig {
    let level = config.logging.log_level.trim().to_uppercase();
    config.logging.log_level = match level.as_str() {
        "WARNING" => "WARN".to_string(),
        other if LOG_LEVELS.contains(&other) => other.to_string(),
        _ => "INFO".to_string(),
    };
    if config.logging.log_to_file && config.logging.log_file_path.trim().is_empty() {
        config.logging.log_file_path = LoggingSettings::default().log_file_path;
    }
    config.tools.serial = config.tools.serial.trim().to_string();
    config
}
