use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::input::DEFAULT_MAX_INPUT_BYTES;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// How aggressively recognized text is cleaned before it is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizeMode {
    /// Whitespace collapsing and trimming only.
    Basic,
    /// Also drops symbols outside word characters and `.,:`.
    #[default]
    Strict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessOptions {
    /// Longest side in pixels; larger scans are downsized.
    pub max_dimension: u32,
    /// Luma cut-off for black/white conversion. `None` keeps grayscale.
    pub binarize_threshold: Option<u8>,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self { max_dimension: 2800, binarize_threshold: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    /// Heading printed above the text.
    pub title: String,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self { title: "FACTURE".to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactureConfig {
    /// Tesseract language code handed to the engine.
    pub language: String,
    pub normalize_mode: NormalizeMode,
    pub max_input_bytes: usize,
    /// Unset means a hung recognition keeps the session in Recognizing.
    pub recognition_timeout_secs: Option<u64>,
    pub tessdata_path: Option<PathBuf>,
    pub preprocess: PreprocessOptions,
    pub export: ExportOptions,
}

impl Default for FactureConfig {
    fn default() -> Self {
        Self {
            language: "fra".to_string(),
            normalize_mode: NormalizeMode::default(),
            max_input_bytes: DEFAULT_MAX_INPUT_BYTES,
            recognition_timeout_secs: None,
            tessdata_path: None,
            preprocess: PreprocessOptions::default(),
            export: ExportOptions::default(),
        }
    }
}

impl FactureConfig {
    pub fn from_toml(toml_content: &str) -> Result<Self, ConfigError> {
        let config: FactureConfig = toml::from_str(toml_content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml(&content)
    }

    pub fn recognition_timeout(&self) -> Option<Duration> {
        self.recognition_timeout_secs.map(Duration::from_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.language.trim().is_empty() {
            return Err(ConfigError::Invalid("language must not be empty".into()));
        }
        if self.max_input_bytes == 0 {
            return Err(ConfigError::Invalid("max_input_bytes must be positive".into()));
        }
        if self.recognition_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid("recognition_timeout_secs must be positive".into()));
        }
        if self.preprocess.max_dimension == 0 {
            return Err(ConfigError::Invalid("preprocess.max_dimension must be positive".into()));
        }
        Ok(())
    }
}
