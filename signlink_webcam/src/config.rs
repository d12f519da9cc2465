use crate::render::RenderSize;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub session: SessionSettings,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub render: RenderConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The three inputs that decide whether a streaming session runs and how.
///
/// Any change to one of them tears the running session down and starts a
/// new one.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub channel_url: String,
    #[serde(default = "default_send_interval_ms")]
    pub send_interval_ms: u64,
}

fn default_send_interval_ms() -> u64 {
    500
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            channel_url: String::new(),
            send_interval_ms: default_send_interval_ms(),
        }
    }
}

impl SessionSettings {
    pub fn new(channel_url: impl Into<String>, enabled: bool) -> Self {
        Self {
            enabled,
            channel_url: channel_url.into(),
            ..Self::default()
        }
    }

    pub fn with_send_interval_ms(mut self, send_interval_ms: u64) -> Self {
        self.send_interval_ms = send_interval_ms;
        self
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms.max(1))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.send_interval_ms == 0 {
            return Err("send_interval_ms must be at least 1".into());
        }
        if self.enabled && self.channel_url.trim().is_empty() {
            return Err("channel_url must be set when the session is enabled".into());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CameraSource {
    Synthetic,
    Device,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CameraConfig {
    #[serde(default = "default_camera_source")]
    pub source: CameraSource,
    #[serde(default)]
    pub device_index: i32,
    #[serde(default = "default_synthetic_width")]
    pub synthetic_width: u32,
    #[serde(default = "default_synthetic_height")]
    pub synthetic_height: u32,
    #[serde(default = "default_feed_fps")]
    pub feed_fps: u64,
}

fn default_camera_source() -> CameraSource {
    CameraSource::Synthetic
}

fn default_synthetic_width() -> u32 {
    640
}

fn default_synthetic_height() -> u32 {
    480
}

fn default_feed_fps() -> u64 {
    15
}

fn fps_to_delay_ms(fps: u64) -> u64 {
    (1000.0 / fps.max(1) as f64).round() as u64
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: default_camera_source(),
            device_index: 0,
            synthetic_width: default_synthetic_width(),
            synthetic_height: default_synthetic_height(),
            feed_fps: default_feed_fps(),
        }
    }
}

impl CameraConfig {
    pub fn get_feed_delay(&self) -> Duration {
        Duration::from_millis(fps_to_delay_ms(self.feed_fps))
    }
}

/// How an encoded frame travels over the channel.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PayloadEncoding {
    /// `data:image/jpeg;base64,...` text message.
    DataUri,
    /// Raw JPEG bytes in a binary message.
    Binary,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StreamConfig {
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    #[serde(default = "default_payload_encoding")]
    pub payload_encoding: PayloadEncoding,
    #[serde(default = "default_fallback_width")]
    pub fallback_width: u32,
    #[serde(default = "default_fallback_height")]
    pub fallback_height: u32,
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
}

fn default_jpeg_quality() -> u8 {
    60
}

fn default_payload_encoding() -> PayloadEncoding {
    PayloadEncoding::DataUri
}

fn default_fallback_width() -> u32 {
    640
}

fn default_fallback_height() -> u32 {
    480
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: default_jpeg_quality(),
            payload_encoding: default_payload_encoding(),
            fallback_width: default_fallback_width(),
            fallback_height: default_fallback_height(),
            connect_timeout_ms: None,
        }
    }
}

impl StreamConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(format!(
                "jpeg_quality must be within 1..=100, got {}",
                self.jpeg_quality
            ));
        }
        if self.fallback_width == 0 || self.fallback_height == 0 {
            return Err("fallback frame dimensions must be non-zero".into());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RenderConfig {
    #[serde(default = "default_render_width")]
    pub width: u32,
    #[serde(default = "default_render_height")]
    pub height: u32,
}

fn default_render_width() -> u32 {
    640
}

fn default_render_height() -> u32 {
    480
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: default_render_width(),
            height: default_render_height(),
        }
    }
}

impl RenderConfig {
    pub fn size(&self) -> RenderSize {
        RenderSize::new(self.width, self.height)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("no working directory: {}", e)))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(
            config::File::from(
                configuration_directory.join(format!("{}.yaml", environment.as_str())),
            )
            .required(false),
        )
        .add_source(
            config::Environment::with_prefix("WC")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;

    for check in [config.session.validate(), config.stream.validate()] {
        if let Err(e) = check {
            tracing::error!("Configuration validation failed: {}", e);
            return Err(config::ConfigError::Message(e));
        }
    }

    Ok(config)
}
