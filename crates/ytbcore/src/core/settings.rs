//! Persisted user settings (`config.json` in the config dir)
//!
//! Holds the save directory and the cookies file. Keys this version does not
//! know about are kept and written back untouched.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::config;
use crate::core::error::{AppError, AppResult};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies_path: Option<PathBuf>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Load settings from a JSON file
///
/// A missing file yields defaults. A corrupt file is logged and also yields
/// defaults so the tool still starts.
pub fn load_settings(path: &Path) -> AppSettings {
    if !path.exists() {
        log::info!("load_settings: {} doesn't exist, using defaults", path.display());
        return AppSettings::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<AppSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("load_settings: Failed to parse {}: {}, using defaults", path.display(), e);
                AppSettings::default()
            }
        },
        Err(e) => {
            log::warn!("load_settings: Failed to read {}: {}, using defaults", path.display(), e);
            AppSettings::default()
        }
    }
}

/// Save settings to a JSON file, creating parent directories.
pub fn save_settings(settings: &AppSettings, path: &Path) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut json = serde_json::to_string_pretty(settings)?;
    json.push('\n');
    std::fs::write(path, json)?;
    log::debug!("save_settings: wrote {}", path.display());
    Ok(())
}

/// Settings bound to their file; every setter persists immediately.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
    current: AppSettings,
}

impl SettingsStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let current = load_settings(&path);
        Self { path, current }
    }

    /// Store at the default location inside the config dir.
    pub fn open_default() -> Self {
        Self::open(config::settings_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &AppSettings {
        &self.current
    }

    /// Save directory; the current directory when none was chosen.
    pub fn save_path(&self) -> PathBuf {
        self.current
            .save_path
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn cookies_path(&self) -> Option<&Path> {
        self.current.cookies_path.as_deref()
    }

    /// Sets and persists the save directory (absolute). The directory must exist.
    pub fn set_save_path(&mut self, path: &Path) -> AppResult<PathBuf> {
        let absolute = std::path::absolute(path)?;
        if !absolute.is_dir() {
            return Err(AppError::Validation(format!(
                "save path is not a directory: {}",
                absolute.display()
            )));
        }
        self.current.save_path = Some(absolute.clone());
        save_settings(&self.current, &self.path)?;
        log::info!("💾 Save path set to {}", absolute.display());
        Ok(absolute)
    }

    /// Sets and persists the cookies file (absolute). The file must exist.
    pub fn set_cookies_path(&mut self, path: &Path) -> AppResult<PathBuf> {
        let absolute = std::path::absolute(path)?;
        if !absolute.is_file() {
            return Err(AppError::Validation(format!(
                "cookies file not found: {}",
                absolute.display()
            )));
        }
        self.current.cookies_path = Some(absolute.clone());
        save_settings(&self.current, &self.path)?;
        log::info!("🍪 Cookies path set to {}", absolute.display());
        Ok(absolute)
    }
}
