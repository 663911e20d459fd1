//! Configuration loading with precedence: CLI > environment > file > defaults

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::model::EncodingConfig;
use crate::error::{TranscodeError, TranscodeResult};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "VIDPRESS_CONFIG";

/// Files probed, in order, when no config path is given
const DEFAULT_CONFIG_PATHS: &[&str] = &["vidpress.toml", "config/vidpress.toml"];

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VidpressConfig {
    pub encoding: EncodingConfig,
    pub engine: EngineSettings,
    pub logging: LoggingConfig,
}

/// Settings that apply to every job a transcoder runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Output container muxer name
    pub container: String,
    /// x264 speed preset
    pub preset: String,
    /// Encoder threads
    pub threads: usize,
    /// Upper bound on an idle wait between drain iterations
    pub idle_wait_ms: u64,
    /// Move the moov atom to the front of the file
    pub faststart: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            container: "mp4".to_string(),
            preset: "veryfast".to_string(),
            threads: num_cpus::get(),
            idle_wait_ms: 5,
            faststart: true,
        }
    }
}

impl EngineSettings {
    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms.max(1))
    }

    pub fn validate(&self) -> TranscodeResult<()> {
        if !matches!(self.container.as_str(), "mp4" | "mov") {
            return Err(TranscodeError::ConfigError {
                message: format!(
                    "unsupported container '{}', expected mp4 or mov",
                    self.container
                ),
            });
        }
        if self.threads == 0 {
            return Err(TranscodeError::ConfigError {
                message: "encoder threads must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl VidpressConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> TranscodeResult<Self> {
        toml::from_str(content).map_err(|e| TranscodeError::ConfigError {
            message: format!("failed to parse TOML config: {}", e),
        })
    }

    /// Load a TOML config file
    pub fn from_file(path: &Path) -> TranscodeResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| TranscodeError::ConfigError {
            message: format!("failed to read {}: {}", path.display(), e),
        })?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Resolve defaults, then the config file, then `VIDPRESS_*` overrides.
    ///
    /// An explicit path (argument or `VIDPRESS_CONFIG`) must exist. The
    /// default locations are optional.
    pub fn load(explicit: Option<&Path>) -> TranscodeResult<Self> {
        let env_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let mut config = match explicit.map(Path::to_path_buf).or(env_path) {
            Some(path) => Self::from_file(&path)?,
            None => match DEFAULT_CONFIG_PATHS.iter().map(Path::new).find(|p| p.exists()) {
                Some(path) => Self::from_file(path)?,
                None => {
                    debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };

        config.apply_env_from(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `VIDPRESS_*` overrides read through `lookup`
    pub fn apply_env_from<F>(&mut self, lookup: F) -> TranscodeResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut overrides = 0;

        if let Some(v) = lookup("VIDPRESS_VIDEO_BITRATE") {
            self.encoding.video_bitrate = parse_env("VIDPRESS_VIDEO_BITRATE", &v)?;
            overrides += 1;
        }
        if let Some(v) = lookup("VIDPRESS_AUDIO_BITRATE") {
            self.encoding.audio_bitrate = parse_env("VIDPRESS_AUDIO_BITRATE", &v)?;
            overrides += 1;
        }
        if let Some(v) = lookup("VIDPRESS_AUDIO_SAMPLE_RATE") {
            self.encoding.audio_sample_rate = parse_env("VIDPRESS_AUDIO_SAMPLE_RATE", &v)?;
            overrides += 1;
        }
        if let Some(v) = lookup("VIDPRESS_KEYFRAME_INTERVAL") {
            self.encoding.max_keyframe_interval = parse_env("VIDPRESS_KEYFRAME_INTERVAL", &v)?;
            overrides += 1;
        }
        if let Some(v) = lookup("VIDPRESS_PROFILE") {
            self.encoding.profile_level = parse_env("VIDPRESS_PROFILE", &v)?;
            overrides += 1;
        }
        if let Some(v) = lookup("VIDPRESS_PRESET") {
            self.engine.preset = v;
            overrides += 1;
        }
        if let Some(v) = lookup("VIDPRESS_THREADS") {
            self.engine.threads = parse_env("VIDPRESS_THREADS", &v)?;
            overrides += 1;
        }
        if let Some(v) = lookup("VIDPRESS_LOG_LEVEL") {
            self.logging.level = v;
            overrides += 1;
        }
        if let Some(v) = lookup("VIDPRESS_LOG_JSON") {
            self.logging.json = parse_env("VIDPRESS_LOG_JSON", &v)?;
            overrides += 1;
        }

        if overrides > 0 {
            debug!("Applied {} environment variable overrides", overrides);
        }
        Ok(())
    }

    pub fn validate(&self) -> TranscodeResult<()> {
        self.encoding.validate()?;
        self.engine.validate()
    }
}

fn parse_env<T>(key: &str, value: &str) -> TranscodeResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| TranscodeError::ConfigError {
            message: format!("{}={}: {}", key, value, e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{H264Profile, ProfileLevel};
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = VidpressConfig::default();
        assert_eq!(config.engine.container, "mp4");
        assert!(config.engine.threads >= 1);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = VidpressConfig::from_toml_str(
            r#"
            [encoding]
            video_bitrate = 4000000

            [engine]
            preset = "medium"
            "#,
        )
        .unwrap();
        assert_eq!(config.encoding.video_bitrate, 4_000_000);
        assert_eq!(config.encoding.audio_bitrate, 128_000);
        assert_eq!(config.engine.preset, "medium");
        assert_eq!(config.engine.container, "mp4");
    }

    #[test]
    fn test_env_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("VIDPRESS_VIDEO_BITRATE", "1000000"),
            ("VIDPRESS_PROFILE", "main@3.1"),
            ("VIDPRESS_LOG_JSON", "true"),
        ]
        .into_iter()
        .collect();

        let mut config = VidpressConfig::default();
        config
            .apply_env_from(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.encoding.video_bitrate, 1_000_000);
        assert_eq!(
            config.encoding.profile_level,
            ProfileLevel::new(H264Profile::Main, Some(31))
        );
        assert!(config.logging.json);
    }

    #[test]
    fn test_bad_env_value_is_config_error() {
        let mut config = VidpressConfig::default();
        let result = config.apply_env_from(|k| {
            (k == "VIDPRESS_THREADS").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(TranscodeError::ConfigError { .. })));
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vidpress.toml");
        std::fs::write(&path, "[engine]\ncontainer = \"mov\"\n").unwrap();
        let config = VidpressConfig::from_file(&path).unwrap();
        assert_eq!(config.engine.container, "mov");

        std::fs::write(&path, "[engine]\ncontainer = \"avi\"\n").unwrap();
        assert!(VidpressConfig::from_file(&path).unwrap().validate().is_err());
    }
}
