use decor_core::EngineSettings;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Deserialize)]
pub struct DecorConfig {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub mechanics: MechanicsSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub tick: TickSection,
}

#[derive(Debug, Deserialize)]
pub struct MechanicsSection {
    /// Path of the mechanics file, relative to the working directory.
    #[serde(default = "default_mechanics_path")]
    pub path: String,
}

fn default_mechanics_path() -> String {
    "mechanics.toml".into()
}

impl Default for MechanicsSection {
    fn default() -> Self {
        Self {
            path: default_mechanics_path(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TickSection {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

fn default_interval_ms() -> u64 {
    50
}

impl Default for TickSection {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
        }
    }
}

impl DecorConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_config() {
        let toml_str = r#"
            [engine]
            settle_delay_ticks = 6
            view_radius = 32.0
            barrier_runtime_id = 777

            [mechanics]
            path = "furniture.toml"

            [logging]
            level = "debug"

            [tick]
            interval_ms = 100
        "#;
        let config = DecorConfig::parse(toml_str).unwrap();
        assert_eq!(config.engine.settle_delay_ticks, 6);
        assert_eq!(config.engine.load_settle_delay_ticks, 2);
        assert_eq!(config.engine.view_radius, 32.0);
        assert_eq!(config.engine.barrier_runtime_id, 777);
        assert_eq!(config.mechanics.path, "furniture.toml");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.tick.interval_ms, 100);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = DecorConfig::parse("").unwrap();
        assert_eq!(config.engine.settle_delay_ticks, 4);
        assert_eq!(config.engine.view_radius, 48.0);
        assert_eq!(config.mechanics.path, "mechanics.toml");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.tick.interval_ms, 50);
    }

    #[test]
    fn bad_toml_is_a_parse_error() {
        assert!(matches!(
            DecorConfig::parse("[engine\nsettle = 1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn sample_config_parses() {
        let config = DecorConfig::parse(include_str!("../decor.toml")).unwrap();
        assert_eq!(config.mechanics.path, "mechanics.toml");
    }
}
