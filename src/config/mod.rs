use serde::{Deserialize, Serialize};
use std::fmt;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Output representation for generated images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Url,
    Base64,
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageFormat::Url => write!(f, "url"),
            ImageFormat::Base64 => write!(f, "base64"),
        }
    }
}

/// Output representation for generated videos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoFormat {
    Url,
    #[default]
    Html,
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoFormat::Url => write!(f, "url"),
            VideoFormat::Html => write!(f, "html"),
        }
    }
}

/// Immutable engine configuration snapshot.
///
/// Constructed once and injected into processors at creation time; never
/// read from a global store mid-stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Wrap reasoning content in visible `<think>` markers.
    #[serde(default)]
    pub show_thinking: bool,
    /// Tag names stripped from all text channels.
    #[serde(default = "default_filter_tags")]
    pub filter_tags: Vec<String>,
    #[serde(default)]
    pub image_output_format: ImageFormat,
    #[serde(default)]
    pub video_output_format: VideoFormat,
    /// Idle window for text and image streams; `<= 0` disables the guard.
    #[serde(default = "default_stream_idle_timeout")]
    pub stream_idle_timeout_secs: f64,
    /// Idle window for video streams (generation is slower).
    #[serde(default = "default_video_idle_timeout")]
    pub video_idle_timeout_secs: f64,
    /// When set, generated assets are persisted by the download collaborator
    /// and served from `{public_base_url}/v1/files/...`; when empty, vendor
    /// URLs pass through untouched.
    #[serde(default)]
    pub public_base_url: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_filter_tags() -> Vec<String> {
    vec![
        "grok:render".to_string(),
        "xaiartifact".to_string(),
        "xai:tool_usage_card".to_string(),
    ]
}
fn default_stream_idle_timeout() -> f64 {
    45.0
}
fn default_video_idle_timeout() -> f64 {
    90.0
}
fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            show_thinking: false,
            filter_tags: default_filter_tags(),
            image_output_format: ImageFormat::Url,
            video_output_format: VideoFormat::Html,
            stream_idle_timeout_secs: default_stream_idle_timeout(),
            video_idle_timeout_secs: default_video_idle_timeout(),
            public_base_url: String::new(),
            log_level: default_log_level(),
        }
    }
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<EngineConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: EngineConfig = serde_yaml::from_str(&contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Semantic validation beyond what serde enforces.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when `public_base_url` is set but not
/// an absolute URL, or a filter tag is empty.
pub fn validate_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if !config.public_base_url.is_empty() && url::Url::parse(&config.public_base_url).is_err() {
        return Err(ConfigError::Validation(format!(
            "public_base_url is not a valid absolute URL: {}",
            config.public_base_url
        )));
    }
    if config.filter_tags.iter().any(|tag| tag.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "filter_tags must not contain empty entries".to_string(),
        ));
    }
    Ok(())
}
