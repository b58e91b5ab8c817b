//! Configuration management for MJPEG-over-HTTP streaming

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::multipart::{self, DEFAULT_BOUNDARY};
use crate::source::{Rgb, TestPattern};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub animation: AnimationConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerConfig {
    #[serde(default = "default_bind_ip")]
    pub bind_ip: String,

    /// TCP port (0 = auto-assign)
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Directory served for paths no route matches
    #[serde(default = "default_static_root")]
    pub static_root: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_ip: default_bind_ip(),
            listen_port: default_listen_port(),
            static_root: default_static_root(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_ip, self.listen_port)
    }
}

/// Multipart stream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StreamConfig {
    /// Part delimiter, must never occur inside a payload
    #[serde(default = "default_boundary")]
    pub boundary: String,

    /// Longest wait for the next frame (0 = unbounded)
    #[serde(default = "default_timeout_ms")]
    pub frame_timeout_ms: u64,

    /// Longest wait for one frame to be written and flushed (0 = unbounded)
    #[serde(default = "default_timeout_ms")]
    pub flush_timeout_ms: u64,

    /// Scan payloads for the boundary and abort on a match
    #[serde(default)]
    pub reject_boundary_collisions: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            boundary: default_boundary(),
            frame_timeout_ms: default_timeout_ms(),
            flush_timeout_ms: default_timeout_ms(),
            reject_boundary_collisions: false,
        }
    }
}

impl StreamConfig {
    pub fn frame_timeout(&self) -> Option<Duration> {
        non_zero_ms(self.frame_timeout_ms)
    }

    pub fn flush_timeout(&self) -> Option<Duration> {
        non_zero_ms(self.flush_timeout_ms)
    }
}

/// Demo animation served on `/animation` and `/picture`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AnimationConfig {
    /// Frame width in pixels
    #[serde(default = "default_size")]
    pub width: u32,

    /// Frame height in pixels
    #[serde(default = "default_size")]
    pub height: u32,

    /// Delay between frames (0 = as fast as the client reads)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// JPEG quality (1-100)
    #[serde(default = "default_quality")]
    pub quality: u8,

    /// Frame colours in order, `#rrggbb`
    #[serde(default = "default_colors")]
    pub colors: Vec<String>,

    /// Loop the animation forever
    #[serde(default)]
    pub repeat: bool,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            width: default_size(),
            height: default_size(),
            interval_ms: default_interval_ms(),
            quality: default_quality(),
            colors: default_colors(),
            repeat: false,
        }
    }
}

impl AnimationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Parsed colour list
    pub fn rgb_colors(&self) -> Result<Vec<Rgb>, ConfigError> {
        self.colors
            .iter()
            .map(|c| c.parse::<Rgb>())
            .collect::<Result<_, _>>()
            .map_err(|e| ConfigError::Invalid(format!("animation: {}", e)))
    }

    /// Builds the test pattern described by this section
    pub fn build_pattern(&self) -> Result<TestPattern, ConfigError> {
        let pattern = TestPattern::new(
            self.rgb_colors()?,
            self.width,
            self.height,
            self.quality,
            self.interval(),
        )
        .map_err(|e| ConfigError::Invalid(format!("animation: {}", e)))?;

        Ok(pattern.repeating(self.repeat))
    }
}

// Default value functions
fn default_bind_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_listen_port() -> u16 {
    8080
}
fn default_static_root() -> PathBuf {
    PathBuf::from("./static")
}
fn default_boundary() -> String {
    DEFAULT_BOUNDARY.to_string()
}
fn default_timeout_ms() -> u64 {
    10_000
}
fn default_size() -> u32 {
    200
}
fn default_interval_ms() -> u64 {
    500
}
fn default_quality() -> u8 {
    85
}
fn default_colors() -> Vec<String> {
    vec![
        "#0000ff".to_string(),
        "#ff0000".to_string(),
        "#00ff00".to_string(),
    ]
}

fn non_zero_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl Config {
    /// Loads configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Loads configuration from TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind_ip.trim().is_empty() {
            return Err(ConfigError::Invalid("server: bind-ip must not be empty".to_string()));
        }

        multipart::validate_boundary(&self.stream.boundary)
            .map_err(|e| ConfigError::Invalid(format!("stream: {}", e)))?;

        let anim = &self.animation;

        if anim.width == 0 || anim.height == 0 {
            return Err(ConfigError::Invalid(
                "animation: width and height must be > 0".to_string(),
            ));
        }

        if anim.width > 8192 || anim.height > 8192 {
            return Err(ConfigError::Invalid(format!(
                "animation: at most 8192x8192 pixels, got {}x{}",
                anim.width, anim.height
            )));
        }

        if anim.quality == 0 || anim.quality > 100 {
            return Err(ConfigError::Invalid(format!(
                "animation: quality must be between 1 and 100, got {}",
                anim.quality
            )));
        }

        if anim.colors.is_empty() {
            return Err(ConfigError::Invalid(
                "animation: at least one color is required".to_string(),
            ));
        }

        anim.rgb_colors()?;

        // Every pause between frames must fit inside the frame timeout
        let frame_timeout_ms = self.stream.frame_timeout_ms;
        if frame_timeout_ms > 0 && anim.interval_ms >= frame_timeout_ms {
            return Err(ConfigError::Invalid(format!(
                "animation: interval-ms ({}) must be below stream frame-timeout-ms ({})",
                anim.interval_ms, frame_timeout_ms
            )));
        }

        Ok(())
    }
}
