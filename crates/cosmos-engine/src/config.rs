//! Engine configuration.
//!
//! Holds the audio settings plus the runner's own parameters: logging, tick
//! rate, flight length, scene and output paths. Configuration can be loaded
//! from and saved to a file.

use cosmos_audio::SpatialConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Configuration file name.
const CONFIG_FILE: &str = "cosmos.toml";

/// Engine configuration parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    // === Logging ===
    /// `tracing` filter directive, used when `RUST_LOG` is unset
    pub log_filter: String,

    // === Simulation ===
    /// Listener updates per second
    pub tick_rate: u32,
    /// Length of the scripted flight in seconds
    pub flight_duration: f32,
    /// Seed for the synthetic analyzer features
    pub feature_seed: u64,

    // === Files ===
    /// Scene file; the built-in demo scene is used when unset
    pub scene_path: Option<PathBuf>,
    /// Raw interleaved f32 stereo output file
    pub pcm_output: Option<PathBuf>,

    // === Output ===
    /// Pretend an audio device exists; `false` runs the engine silent
    pub output_enabled: bool,
    /// Binaural rendering (overrides `audio.hrtf_enabled`)
    pub hrtf: bool,

    // === Audio ===
    /// Engine settings
    pub audio: SpatialConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_filter: "cosmos=info".to_string(),

            tick_rate: 60,
            flight_duration: 20.0,
            feature_seed: 7,

            scene_path: None,
            pcm_output: None,

            output_enabled: true,
            hrtf: true,

            audio: SpatialConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the default file location.
    /// Returns default config if file doesn't exist.
    pub fn load() -> Self {
        Self::load_from(Self::config_path())
    }

    /// Load configuration from a specific path.
    /// Returns default config if file doesn't exist or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            info!("Config file not found, using defaults");
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", path.display());
                    config
                },
                Err(e) => {
                    warn!("Failed to parse config file: {e}");
                    Self::default()
                },
            },
            Err(e) => {
                warn!("Failed to read config file: {e}");
                Self::default()
            },
        }
    }

    /// Save configuration to the default file location.
    #[allow(dead_code)]
    pub fn save(&self) -> io::Result<()> {
        self.save_to(Self::config_path())
    }

    /// Save configuration to a specific path.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut file = fs::File::create(path)?;
        file.write_all(contents.as_bytes())?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path.
    fn config_path() -> PathBuf {
        if let Some(config_dir) = dirs_config_path() {
            let path = config_dir.join("cosmos").join(CONFIG_FILE);
            if path.exists() {
                return path;
            }
        }
        PathBuf::from(CONFIG_FILE)
    }

    /// Validate and clamp configuration values to sensible ranges.
    pub fn validate(&mut self) {
        self.tick_rate = self.tick_rate.clamp(1, 1000);
        if !self.flight_duration.is_finite() {
            self.flight_duration = Self::default().flight_duration;
        }
        self.flight_duration = self.flight_duration.clamp(0.1, 3600.0);
        if self.log_filter.trim().is_empty() {
            self.log_filter = Self::default().log_filter;
        }
        self.audio.hrtf_enabled = self.hrtf;
        self.audio.normalize();
    }

    /// Seconds between listener updates.
    #[must_use]
    pub fn tick_interval(&self) -> f32 {
        1.0 / self.tick_rate.max(1) as f32
    }
}

/// Get platform-specific config directory.
fn dirs_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|home| PathBuf::from(home).join("Library/Application Support"))
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
    {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.tick_rate, 60);
        assert_eq!(config.log_filter, "cosmos=info");
        assert!(config.output_enabled);
        assert!(config.scene_path.is_none());
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();
        config.tick_rate = 0;
        config.flight_duration = f32::NAN;
        config.log_filter = "  ".into();
        config.hrtf = false;
        config.audio.master_volume = 4.0;

        config.validate();

        assert_eq!(config.tick_rate, 1);
        assert!((config.flight_duration - 20.0).abs() < f32::EPSILON);
        assert_eq!(config.log_filter, "cosmos=info");
        assert!(!config.audio.hrtf_enabled);
        assert!((config.audio.master_volume - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_config_save_load() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("nested").join("cosmos.toml");

        let mut config = EngineConfig::default();
        config.tick_rate = 120;
        config.pcm_output = Some(PathBuf::from("out.f32"));
        config.audio.sample_rate = 48_000;

        config.save_to(&config_path).expect("Failed to save config");

        let loaded = EngineConfig::load_from(&config_path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_load_missing_file() {
        let config = EngineConfig::load_from("/nonexistent/path/cosmos.toml");
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_config_load_invalid_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("cosmos.toml");
        fs::write(&config_path, "tick_rate = \"fast\"").expect("write");
        assert_eq!(EngineConfig::load_from(&config_path), EngineConfig::default());
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            tick_rate = 30

            [audio]
            sample_rate = 22050
            "#,
        )
        .expect("parse");
        assert_eq!(config.tick_rate, 30);
        assert_eq!(config.audio.sample_rate, 22_050);
        assert_eq!(config.audio.block_size, SpatialConfig::default().block_size);
        assert!(config.hrtf);
    }
}
