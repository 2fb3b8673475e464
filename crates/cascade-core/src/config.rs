//! Configuration loading and typed config structures for Cascade.
//!
//! The canonical configuration lives in `cascade-config.yaml` at the project
//! root. This module defines strongly-typed structs that mirror the YAML
//! structure, and provides a loader that reads and validates the file.
//!
//! The `simulation` section deserializes straight into
//! [`SimulationConfig`], the per-run configuration every simulation
//! carries; the remaining sections configure the process around it.

use std::path::Path;

use cascade_types::{ConfigViolation, SimulationConfig};
use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The parsed configuration cannot drive a simulation.
    #[error("invalid simulation config: {source}")]
    Invalid {
        /// The offending value.
        #[from]
        source: ConfigViolation,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level engine configuration.
///
/// Mirrors the structure of `cascade-config.yaml`. All fields have
/// defaults, so an empty file is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EngineConfig {
    /// Default per-run simulation settings.
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Reasoning backend settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Durable store settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// `DATABASE_URL` overrides `database.url` when set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = serde_yml::from_str(&contents)?;
        config.database.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.database.apply_env_overrides();
        Ok(config)
    }

    /// Check the simulation section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.simulation.validate()?;
        Ok(())
    }
}

/// Reasoning backend configuration.
///
/// Environment variables read by the runner binary take precedence.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LlmConfig {
    /// Backend name: `openai`, `anthropic`, or `stub`.
    #[serde(default = "default_llm_backend")]
    pub backend: String,

    /// Base URL of the backend API.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,

    /// Maximum tokens per completion.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: default_llm_backend(),
            api_url: default_api_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

/// Durable store configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL. Simulations are kept in memory when unset.
    #[serde(default)]
    pub url: Option<String>,

    /// Maximum pool connections (0 uses the store's default).
    #[serde(default)]
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// Override the connection URL with `DATABASE_URL` when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("DATABASE_URL") {
            self.url = Some(val);
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON log lines instead of human-readable text.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions for serde
// ---------------------------------------------------------------------------

fn default_llm_backend() -> String {
    String::from("openai")
}

fn default_api_url() -> String {
    String::from("https://api.openai.com/v1")
}

fn default_model() -> String {
    String::from("gpt-4o-mini")
}

const fn default_max_tokens() -> u32 {
    1024
}

const fn default_temperature() -> f64 {
    0.7
}

fn default_log_level() -> String {
    String::from("info")
}

#[cfg(test)]
mod tests {
    use cascade_types::CoveragePolicy;

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.simulation.max_rounds, 5);
        assert_eq!(config.llm.backend, "openai");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
simulation:
  max_rounds: 8
  concurrency_limit: 2
  per_call_timeout_ms: 30000
  coverage: unanimous
  stabilization:
    threshold: 0.9
    consecutive_rounds: 2
    weights:
      themes: 0.5
      coalitions: 0.3
      gaps: 0.1
      stances: 0.1
  retry:
    max_retries: 4
    initial_backoff_ms: 250
    max_backoff_ms: 4000
    jitter: false
  memory:
    max_peer_responses: 3
    max_excerpt_chars: 400
  fulcrum:
    max_fulcrums: 5
    min_score: 0.1

llm:
  backend: "anthropic"
  api_url: "https://api.anthropic.com/v1"
  model: "claude-sonnet"
  max_tokens: 2048
  temperature: 0.3

logging:
  level: "debug"
  json: true
"#;

        let config = EngineConfig::parse(yaml);
        assert!(config.is_ok(), "{config:?}");
        let config = config.ok().unwrap_or_default();

        assert_eq!(config.simulation.max_rounds, 8);
        assert_eq!(config.simulation.coverage, CoveragePolicy::Unanimous);
        assert_eq!(config.simulation.stabilization.consecutive_rounds, 2);
        assert_eq!(config.simulation.retry.max_retries, 4);
        assert!(!config.simulation.retry.jitter);
        assert_eq!(config.simulation.memory.max_peer_responses, 3);
        assert_eq!(config.simulation.fulcrum.max_fulcrums, 5);
        assert_eq!(config.llm.backend, "anthropic");
        assert_eq!(config.llm.max_tokens, 2048);
        assert!(config.logging.json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_minimal_yaml() {
        let yaml = "simulation:\n  max_rounds: 2\n";
        let config = EngineConfig::parse(yaml);
        assert!(config.is_ok());
        let config = config.ok().unwrap_or_default();

        assert_eq!(config.simulation.max_rounds, 2);
        assert_eq!(config.simulation.concurrency_limit, 4);
        assert_eq!(config.llm.model, "gpt-4o-mini");
    }

    #[test]
    fn parse_empty_yaml() {
        assert!(EngineConfig::parse("").is_ok());
    }

    #[test]
    fn validate_rejects_bad_threshold() {
        let yaml = "simulation:\n  stabilization:\n    threshold: 1.2\n";
        let config = EngineConfig::parse(yaml).ok().unwrap_or_default();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn load_project_config_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("cascade-config.yaml");
        if path.exists() {
            let config = EngineConfig::from_file(&path);
            assert!(config.is_ok(), "Failed to load project config: {config:?}");
        }
    }
}
