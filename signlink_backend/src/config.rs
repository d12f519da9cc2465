use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub service: ServiceSettings,
    #[serde(default)]
    pub model: ModelSettings,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceSettings {
    pub host: String,
    pub port: u16,
}

impl ServiceSettings {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelSettings {
    #[serde(default = "default_label")]
    pub label: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_label() -> String {
    "A".into()
}

fn default_confidence() -> f64 {
    0.92
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            label: default_label(),
            confidence: default_confidence(),
        }
    }
}

impl ModelSettings {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!(
                "confidence must be within [0, 1], got {}",
                self.confidence
            ));
        }
        Ok(())
    }
}

/// Layers `base.yaml`, the environment overlay and `APP_*` variables.
pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let directory = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("no working directory: {}", e)))?
        .join("configuration");
    let overlay = overlay_name(std::env::var("APP_ENVIRONMENT").ok().as_deref())
        .map_err(config::ConfigError::Message)?;

    let settings: Settings = config::Config::builder()
        .add_source(config::File::from(directory.join("base.yaml")))
        .add_source(config::File::from(directory.join(format!("{overlay}.yaml"))).required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?
        .try_deserialize()?;

    settings.model.validate().map_err(|e| {
        tracing::error!("Invalid model settings: {}", e);
        config::ConfigError::Message(e)
    })?;

    Ok(settings)
}

fn overlay_name(environment: Option<&str>) -> Result<&'static str, String> {
    match environment.map(str::to_lowercase).as_deref() {
        None | Some("local") => Ok("local"),
        Some("production") => Ok("production"),
        Some(other) => Err(format!(
            "unknown environment `{other}`, expected `local` or `production`"
        )),
    }
}
