use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::analytics::SizeThresholds;
use crate::source::Mode;

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const CONFIG_PATH_ENV: &str = "LARVACOUNT_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("small_threshold must be greater than zero")]
    SmallThreshold,
    #[error("large_threshold ({large}) must be greater than small_threshold ({small})")]
    LargeThreshold { small: u32, large: u32 },
    #[error("tick_interval_ms must be greater than zero")]
    TickInterval,
    #[error("{name} must be in (0, 1], got {value}")]
    Probability { name: &'static str, value: f32 },
    #[error("preview max_size must be greater than zero")]
    PreviewSize,
    #[error("{0} mode needs an input location")]
    MissingLocation(Mode),
}

fn default_confidence_threshold() -> f32 {
    0.25
}

fn default_iou_threshold() -> f32 {
    0.7
}

fn default_input_size() -> u32 {
    640
}

fn default_intra_threads() -> usize {
    4
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: None,
            confidence_threshold: default_confidence_threshold(),
            iou_threshold: default_iou_threshold(),
            input_size: default_input_size(),
            intra_threads: default_intra_threads(),
        }
    }
}

fn default_location() -> String {
    "0".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputConfig {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default = "default_location")]
    pub location: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            location: default_location(),
        }
    }
}

fn default_small_threshold() -> u32 {
    500
}

fn default_large_threshold() -> u32 {
    2000
}

#[derive(Debug, Clone, Deserialize)]
pub struct SizingConfig {
    #[serde(default = "default_small_threshold")]
    pub small_threshold: u32,
    #[serde(default = "default_large_threshold")]
    pub large_threshold: u32,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            small_threshold: default_small_threshold(),
            large_threshold: default_large_threshold(),
        }
    }
}

impl SizingConfig {
    pub fn thresholds(&self) -> SizeThresholds {
        SizeThresholds::new(self.small_threshold, self.large_threshold)
    }
}

fn default_tick_interval() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
        }
    }
}

fn default_preview_enabled() -> bool {
    true
}

fn default_preview_size() -> u32 {
    1080
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreviewConfig {
    #[serde(default = "default_preview_enabled")]
    pub enabled: bool,
    #[serde(default = "default_preview_size")]
    pub max_size: u32,
    #[serde(default)]
    pub output: Option<PathBuf>,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            enabled: default_preview_enabled(),
            max_size: default_preview_size(),
            output: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub sizing: SizingConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::load_from(path),
            _ => Self::load_from(DEFAULT_CONFIG_PATH),
        }
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let sizing = &self.sizing;
        if sizing.small_threshold == 0 {
            return Err(ConfigError::SmallThreshold);
        }
        if sizing.large_threshold <= sizing.small_threshold {
            return Err(ConfigError::LargeThreshold {
                small: sizing.small_threshold,
                large: sizing.large_threshold,
            });
        }

        if self.stream.tick_interval_ms == 0 {
            return Err(ConfigError::TickInterval);
        }

        check_probability("confidence_threshold", self.model.confidence_threshold)?;
        check_probability("iou_threshold", self.model.iou_threshold)?;

        if self.preview.max_size == 0 {
            return Err(ConfigError::PreviewSize);
        }

        if self.input.mode != Mode::Camera && self.input.location.trim().is_empty() {
            return Err(ConfigError::MissingLocation(self.input.mode));
        }

        Ok(())
    }
}

fn check_probability(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::Probability { name, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.input.mode, Mode::Camera);
        assert_eq!(config.input.location, "0");
        assert_eq!(config.sizing.small_threshold, 500);
        assert_eq!(config.sizing.large_threshold, 2000);
        assert_eq!(config.stream.tick_interval_ms, 30);
        assert_eq!(config.preview.max_size, 1080);
        assert!(config.model.path.is_none());
    }

    #[test]
    fn parses_full_config() {
        let config = Config::parse(
            r#"
            [model]
            path = "models/larvae.onnx"
            confidence_threshold = 0.4

            [input]
            mode = "video"
            location = "tank.mp4"

            [sizing]
            small_threshold = 300
            large_threshold = 1500

            [stream]
            tick_interval_ms = 50
            "#,
        )
        .unwrap();

        assert_eq!(
            config.model.path.as_deref(),
            Some(Path::new("models/larvae.onnx"))
        );
        assert_eq!(config.model.confidence_threshold, 0.4);
        assert_eq!(config.input.mode, Mode::Video);
        assert_eq!(config.sizing.thresholds(), SizeThresholds::new(300, 1500));
        assert_eq!(config.stream.tick_interval_ms, 50);
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let err = Config::parse("[sizing]\nsmall_threshold = 800\nlarge_threshold = 800\n")
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::LargeThreshold {
                small: 800,
                large: 800
            }
        ));
    }

    #[test]
    fn rejects_zero_small_threshold() {
        let err = Config::parse("[sizing]\nsmall_threshold = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::SmallThreshold));
    }

    #[test]
    fn rejects_zero_tick_interval() {
        let err = Config::parse("[stream]\ntick_interval_ms = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::TickInterval));
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let err = Config::parse("[model]\nconfidence_threshold = 1.5\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Probability {
                name: "confidence_threshold",
                ..
            }
        ));
    }

    #[test]
    fn image_mode_needs_location() {
        let err = Config::parse("[input]\nmode = \"image\"\nlocation = \"\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingLocation(Mode::Image)));
    }

    #[test]
    fn load_from_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[input]\nmode = \"image\"\nlocation = \"larvae.jpg\"").unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.input.mode, Mode::Image);
        assert_eq!(config.input.location, "larvae.jpg");
    }

    #[test]
    fn load_from_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_from(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
