// SPDX-License-Identifier: MPL-2.0

//! User configuration handling

use crate::camera::Facing;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// Bitrate presets for video recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BitratePreset {
    /// Standard bitrate derived from resolution and frame rate
    #[default]
    Standard,
    /// Doubled bitrate for high-definition recording
    HighDefinition,
}

impl BitratePreset {
    /// Multiplier applied to the computed base bitrate
    pub fn multiplier(&self) -> u32 {
        match self {
            BitratePreset::Standard => 1,
            BitratePreset::HighDefinition => 2,
        }
    }
}

/// Recording settings for a capture session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSettings {
    /// Output video width
    pub width: u32,
    /// Output video height
    pub height: u32,
    /// Whether to capture and mux an audio track
    pub enable_audio: bool,
    /// Bitrate preset (Standard doubles to HighDefinition)
    pub bitrate_preset: BitratePreset,
}

impl Default for RecordSettings {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            enable_audio: true,
            bitrate_preset: BitratePreset::Standard,
        }
    }
}

/// Persistent application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Config schema version, bumped on incompatible changes
    pub version: u32,
    /// Camera facing to open on startup
    pub default_facing: Facing,
    /// Preview aspect ratio (height / width)
    pub aspect_ratio: f32,
    /// Mirror camera preview horizontally (selfie mode)
    pub mirror_preview: bool,
    /// Recording defaults
    pub record: RecordSettings,
    /// Directory for recordings and photos; `None` uses the platform default
    pub output_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            default_facing: Facing::Back,
            aspect_ratio: 9.0 / 16.0,
            mirror_preview: true,
            record: RecordSettings::default(),
            output_dir: None,
        }
    }
}

impl Config {
    /// Path of the persisted configuration file
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("prism").join("config.json"))
    }

    /// Load the configuration, falling back to defaults on any failure
    pub fn load() -> Self {
        let Some(path) = Self::path() else {
            return Self::default();
        };
        match std::fs::read_to_string(&path) {
            Ok(data) => match serde_json::from_str::<Config>(&data) {
                Ok(config) if config.version == Config::default().version => config,
                Ok(config) => {
                    warn!(version = config.version, "Unknown config version, using defaults");
                    Self::default()
                }
                Err(err) => {
                    warn!(error = %err, path = %path.display(), "Failed to parse config");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Persist the configuration as pretty-printed JSON
    pub fn save(&self) -> Result<(), String> {
        let path = Self::path().ok_or("no config directory available")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        let data = serde_json::to_string_pretty(self).map_err(|e| e.to_string())?;
        std::fs::write(&path, data).map_err(|e| e.to_string())
    }

    /// Resolve the output directory for recordings
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .or_else(|| dirs::video_dir().map(|d| d.join("prism")))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Build a timestamped output path for a new recording
    pub fn new_recording_path(&self) -> PathBuf {
        let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
        self.output_dir().join(format!("video_{}.mp4", stamp))
    }

    /// Build a timestamped output path for a new photo
    pub fn new_photo_path(&self) -> PathBuf {
        let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
        let dir = dirs::picture_dir()
            .map(|d| d.join("prism"))
            .unwrap_or_else(|| self.output_dir());
        dir.join(format!("photo_{}.jpg", stamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.default_facing, Facing::Back);
        assert!(config.mirror_preview, "Mirror preview should be enabled by default");
        assert!((config.aspect_ratio - 0.5625).abs() < f32::EPSILON);
    }

    #[test]
    fn test_config_round_trip() {
        let mut config = Config::default();
        config.record.enable_audio = false;
        config.record.bitrate_preset = BitratePreset::HighDefinition;
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_recording_path_extension() {
        let config = Config {
            output_dir: Some(PathBuf::from("/tmp")),
            ..Config::default()
        };
        let path = config.new_recording_path();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("mp4"));
        assert!(path.starts_with("/tmp"));
    }
}
