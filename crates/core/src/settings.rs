//! Persisted local media preferences
//!
//! Read once at session start and handed to the media session manager;
//! not part of the orchestration layer's runtime state.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Local device preferences persisted between sessions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSettings {
    /// Preferred camera device id, if the user picked one
    pub preferred_camera: Option<String>,

    /// Preferred microphone device id, if the user picked one
    pub preferred_microphone: Option<String>,

    /// Start with the microphone track disabled
    pub join_muted: bool,

    /// Start without acquiring a camera track
    pub join_camera_off: bool,
}

impl LocalSettings {
    /// Load settings from a JSON file.
    ///
    /// A missing file yields the defaults; a malformed file is an error
    /// so the caller can surface it rather than silently resetting the
    /// user's preferences.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|e| Error::InvalidSettings(format!("{}: {}", path.display(), e)))
    }

    /// Persist settings as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::InvalidSettings(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_defaults() {
        let settings = LocalSettings::load("/nonexistent/settings.json").unwrap();
        assert!(settings.preferred_camera.is_none());
        assert!(!settings.join_muted);
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let settings = LocalSettings {
            preferred_camera: Some("cam-1".to_string()),
            preferred_microphone: None,
            join_muted: true,
            join_camera_off: false,
        };
        settings.save(&path).unwrap();

        let loaded = LocalSettings::load(&path).unwrap();
        assert_eq!(loaded.preferred_camera.as_deref(), Some("cam-1"));
        assert!(loaded.join_muted);
        assert!(!loaded.join_camera_off);
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(LocalSettings::load(&path).is_err());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"join_muted": true}"#).unwrap();

        let loaded = LocalSettings::load(&path).unwrap();
        assert!(loaded.join_muted);
        assert!(loaded.preferred_microphone.is_none());
        assert!(!loaded.join_camera_off);
    }
}
