//! Configuration types for the simulation runner.
//!
//! Settings come from two places: `cascade-config.yaml` (see
//! [`EngineConfig`]) and environment variables, which take precedence.
//! The runner needs the scenario to simulate, the LLM backend to reason
//! with, and optionally a database to persist into.

use std::path::{Path, PathBuf};

use cascade_core::config::{EngineConfig, LlmConfig};

use crate::error::RunnerError;

/// Default location of the YAML configuration file.
const DEFAULT_CONFIG_PATH: &str = "cascade-config.yaml";

/// Complete runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Engine configuration loaded from YAML.
    pub engine: EngineConfig,
    /// LLM backend used to produce entity responses.
    pub backend: LlmBackendConfig,
    /// Path to the templates directory.
    pub templates_dir: String,
    /// Path to the scenario JSON file.
    pub scenario_path: PathBuf,
}

/// Configuration for a single LLM backend.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmBackendConfig {
    /// The backend type.
    pub backend_type: BackendType,
    /// Base API URL (e.g. `https://api.openai.com/v1`).
    pub api_url: String,
    /// API key for authentication. Empty for the stub backend.
    pub api_key: String,
    /// Model identifier.
    pub model: String,
    /// Maximum tokens per completion.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
}

/// Supported LLM backend types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// `OpenAI`-compatible API (works with `OpenAI`, `DeepSeek`, Ollama).
    OpenAi,
    /// Anthropic Messages API (different request format).
    Anthropic,
    /// Deterministic offline responses; no network access.
    Stub,
}

impl BackendType {
    /// Parse a backend name as written in config or the environment.
    pub fn parse(name: &str) -> Result<Self, RunnerError> {
        match name.trim().to_lowercase().as_str() {
            "openai" | "deepseek" | "ollama" => Ok(Self::OpenAi),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "stub" | "offline" => Ok(Self::Stub),
            other => Err(RunnerError::Config(format!("unknown backend type: {other}"))),
        }
    }
}

impl RunnerConfig {
    /// Load configuration from the config file and environment variables.
    ///
    /// Variables:
    /// - `CASCADE_CONFIG` -- YAML config path (default `cascade-config.yaml`;
    ///   built-in defaults apply when the default path does not exist)
    /// - `SCENARIO_PATH` -- scenario JSON file; falls back to the first
    ///   command-line argument
    /// - `TEMPLATES_DIR` -- path to prompt templates (default `templates`)
    /// - `LLM_DEFAULT_BACKEND` -- `openai`, `anthropic`, or `stub`
    /// - `LLM_DEFAULT_API_URL` -- API base URL
    /// - `LLM_DEFAULT_API_KEY` -- API key (required unless the backend is `stub`)
    /// - `LLM_DEFAULT_MODEL` -- model name
    /// - `DATABASE_URL` -- `PostgreSQL` URL; simulations stay in memory when unset
    pub fn from_env() -> Result<Self, RunnerError> {
        let engine = load_engine_config(std::env::var("CASCADE_CONFIG").ok().as_deref())?;
        engine
            .validate()
            .map_err(|e| RunnerError::Config(e.to_string()))?;

        let backend = resolve_backend(&engine.llm, |name| std::env::var(name).ok())?;

        let templates_dir =
            std::env::var("TEMPLATES_DIR").unwrap_or_else(|_| "templates".to_owned());

        let scenario_path = std::env::var("SCENARIO_PATH")
            .ok()
            .or_else(|| std::env::args().nth(1))
            .map(PathBuf::from)
            .ok_or_else(|| {
                RunnerError::Config(String::from(
                    "no scenario given: set SCENARIO_PATH or pass a path argument",
                ))
            })?;

        Ok(Self {
            engine,
            backend,
            templates_dir,
            scenario_path,
        })
    }
}

/// Load the engine config from `explicit`, or from the default path when
/// it exists.
fn load_engine_config(explicit: Option<&str>) -> Result<EngineConfig, RunnerError> {
    let (path, required) = match explicit {
        Some(path) => (Path::new(path), true),
        None => (Path::new(DEFAULT_CONFIG_PATH), false),
    };
    if !required && !path.exists() {
        let mut config = EngineConfig::default();
        config.database.apply_env_overrides();
        return Ok(config);
    }
    EngineConfig::from_file(path)
        .map_err(|e| RunnerError::Config(format!("{}: {e}", path.display())))
}

/// Resolve the backend settings, letting `lookup`ed environment values
/// override the YAML `llm` section.
fn resolve_backend(
    llm: &LlmConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<LlmBackendConfig, RunnerError> {
    let backend_name = lookup("LLM_DEFAULT_BACKEND").unwrap_or_else(|| llm.backend.clone());
    let backend_type = BackendType::parse(&backend_name)?;
    let api_url = lookup("LLM_DEFAULT_API_URL").unwrap_or_else(|| llm.api_url.clone());
    let model = lookup("LLM_DEFAULT_MODEL").unwrap_or_else(|| llm.model.clone());

    let api_key = match (lookup("LLM_DEFAULT_API_KEY"), backend_type) {
        (Some(key), _) => key,
        (None, BackendType::Stub) => String::new(),
        (None, _) => {
            return Err(RunnerError::Config(String::from(
                "missing required env var LLM_DEFAULT_API_KEY",
            )));
        }
    };

    Ok(LlmBackendConfig {
        backend_type,
        api_url: api_url.trim_end_matches('/').to_owned(),
        api_key,
        model,
        max_tokens: llm.max_tokens,
        temperature: llm.temperature,
    })
}
