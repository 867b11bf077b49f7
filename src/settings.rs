//! Persisted user preferences.
//!
//! Stored as JSON next to nothing else in the platform config directory.
//! There is no schema version: unknown keys are ignored and missing keys take
//! their defaults, so older files keep loading.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::generation::QualityTier;

const FILE_NAME: &str = "preferences.json";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    Light,
    #[default]
    Dark,
}

/// A reusable stamp preset in the annotation palette.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LibraryEntry {
    pub name: String,
    pub icon: String,
    pub color: [u8; 4],
    #[serde(default)]
    pub label: Option<String>,
}

impl LibraryEntry {
    fn new(name: &str, icon: &str, color: [u8; 4]) -> Self {
        Self {
            name: name.to_string(),
            icon: icon.to_string(),
            color,
            label: Some(name.to_string()),
        }
    }
}

fn default_library() -> Vec<LibraryEntry> {
    vec![
        LibraryEntry::new("sofa", "sofa", [214, 92, 64, 255]),
        LibraryEntry::new("plant", "leaf", [64, 168, 92, 255]),
        LibraryEntry::new("lamp", "lamp", [236, 196, 64, 255]),
        LibraryEntry::new("remove", "cross", [220, 40, 40, 255]),
    ]
}

fn default_true() -> bool {
    true
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8787/v1/edit".to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub quality_tier: QualityTier,
    #[serde(default)]
    pub theme: ThemeMode,
    /// Language code, e.g. "en". Empty means follow the system.
    #[serde(default)]
    pub language: String,
    #[serde(default = "default_library")]
    pub annotation_library: Vec<LibraryEntry>,
    /// Let scrolling move a single selection to the centred image.
    #[serde(default = "default_true")]
    pub focus_tracking: bool,
    /// Proxy that forwards edit requests to the image service.
    #[serde(default = "default_endpoint")]
    pub api_endpoint: String,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            quality_tier: QualityTier::default(),
            theme: ThemeMode::default(),
            language: String::new(),
            annotation_library: default_library(),
            focus_tracking: true,
            api_endpoint: default_endpoint(),
        }
    }
}

#[derive(Debug)]
pub enum SettingsError {
    NoConfigDir,
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::NoConfigDir => write!(f, "no writable configuration directory"),
            SettingsError::Io(e) => write!(f, "preferences I/O error: {}", e),
            SettingsError::Json(e) => write!(f, "preferences are not valid JSON: {}", e),
        }
    }
}

impl std::error::Error for SettingsError {}

impl From<std::io::Error> for SettingsError {
    fn from(e: std::io::Error) -> Self {
        SettingsError::Io(e)
    }
}

impl From<serde_json::Error> for SettingsError {
    fn from(e: serde_json::Error) -> Self {
        SettingsError::Json(e)
    }
}

impl Preferences {
    /// Path to the preferences file.
    /// On Linux:   ~/.config/stagecanvas/preferences.json  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\StageCanvas\preferences.json
    /// On macOS:   ~/Library/Application Support/StageCanvas/preferences.json
    /// Fallback:   same directory as the executable.
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
                    PathBuf::from(home).join(".config")
                })
                .join("stagecanvas");
            return Some(config_dir.join(FILE_NAME));
        }
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA")
                .or_else(|_| std::env::var("USERPROFILE"))
                .ok()?;
            return Some(PathBuf::from(appdata).join("StageCanvas").join(FILE_NAME));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("StageCanvas")
                    .join(FILE_NAME),
            );
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|d| d.join(FILE_NAME)))
        }
    }

    /// Read preferences from `path`. Missing or corrupt files yield defaults.
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&content) {
            Ok(prefs) => prefs,
            Err(e) => {
                crate::log_warn!("ignoring unreadable preferences {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load from the platform location (startup only).
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Write to the platform location. Called after every change.
    pub fn save(&self) -> Result<(), SettingsError> {
        let path = Self::settings_path().ok_or(SettingsError::NoConfigDir)?;
        self.save_to(&path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = Preferences::load_from(&dir.path().join("nope.json"));
        assert_eq!(prefs, Preferences::default());
        assert!(prefs.focus_tracking);
    }

    #[test]
    fn saved_preferences_load_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(FILE_NAME);
        let mut prefs = Preferences::default();
        prefs.quality_tier = QualityTier::High;
        prefs.theme = ThemeMode::Light;
        prefs.language = "de".into();
        prefs.focus_tracking = false;
        prefs.annotation_library.truncate(1);
        prefs.save_to(&path).unwrap();

        assert_eq!(Preferences::load_from(&path), prefs);
    }

    #[test]
    fn partial_and_unknown_fields_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FILE_NAME);
        std::fs::write(&path, r#"{"theme":"light","legacy_flag":3}"#).unwrap();
        let prefs = Preferences::load_from(&path);
        assert_eq!(prefs.theme, ThemeMode::Light);
        assert_eq!(prefs.quality_tier, QualityTier::default());
        assert_eq!(prefs.annotation_library.len(), default_library().len());
    }

    #[test]
    fn corrupt_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FILE_NAME);
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(Preferences::load_from(&path), Preferences::default());
    }
}
