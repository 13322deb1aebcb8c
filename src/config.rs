//! Runtime configuration for the `alpaca` CLI.
//!
//! Settings come from an optional JSON file and are overridden by command
//! line flags. The model path is the only required value; it is resolved
//! before anything touches llama.cpp.

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::bindings::LlamaError;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "alpaca",
    version,
    about = "Load a GGUF model with llama.cpp and print its properties"
)]
pub struct Cli {
    /// Path to the GGUF model file.
    #[arg(short, long, env = "ALPACA_MODEL")]
    pub model: Option<PathBuf>,

    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "alpaca.json")]
    pub config: PathBuf,

    /// Print model info as JSON.
    #[arg(long)]
    pub json: bool,

    /// Also print the GGUF header summary.
    #[arg(long)]
    pub inspect: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit log lines as JSON.
    #[arg(long)]
    pub log_json: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model configuration.
    pub model: ModelConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Model-related settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Path to the GGUF model file.
    pub model_path: Option<PathBuf>,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of human-readable ones.
    pub json: bool,

    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            filter: "alpaca=info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, with defaults for missing fields.
    ///
    /// Returns `None` when the file does not exist. Logging is configured from
    /// the result, so reporting the fallback is left to the caller.
    pub fn load(path: &Path) -> anyhow::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&data)?;
        Ok(Some(config))
    }

    /// Apply command-line overrides.
    pub fn merge_cli(mut self, cli: &Cli) -> Self {
        if let Some(model) = &cli.model {
            self.model.model_path = Some(model.clone());
        }
        if cli.log_json {
            self.logging.json = true;
        }
        if cli.verbose {
            self.logging.filter = "alpaca=debug".to_string();
        }
        self
    }

    /// The model path, or a configuration error if none was given.
    pub fn model_path(&self) -> Result<&Path, LlamaError> {
        match self.model.model_path.as_deref() {
            Some(path) if !path.as_os_str().is_empty() => Ok(path),
            _ => Err(LlamaError::Configuration(
                "no model path given; pass --model <PATH> or set model.model_path".to_string(),
            )),
        }
    }
}
