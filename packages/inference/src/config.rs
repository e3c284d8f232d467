//! Engine configuration
//!
//! Loaded from an optional TOML file, then overridden by environment
//! variables. Per-model constants (input size, normalization, interpolation)
//! are not configured here; they ship in the model's `metadata.json`.

use crate::postprocess::TOP_K;
use crate::source::{AssetSource, DirectorySource};
use crate::store::{DEFAULT_METADATA_FILE, DEFAULT_MODEL_FILE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub const ENV_ASSETS: &str = "DERMASCAN_ASSETS";
pub const ENV_TOP_K: &str = "DERMASCAN_TOP_K";
pub const ENV_HISTORY_DIR: &str = "DERMASCAN_HISTORY_DIR";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, value: impl ToString) -> Self {
        ConfigError::InvalidValue {
            key: key.into(),
            value: value.to_string(),
        }
    }
}

/// Where `model.tflite` and `metadata.json` live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssetLocation {
    Directory { path: PathBuf },
    Url { base_url: String },
}

impl AssetLocation {
    /// `http(s)://` prefixes are URLs, anything else is a directory
    pub fn parse(value: &str) -> Self {
        if value.starts_with("http://") || value.starts_with("https://") {
            AssetLocation::Url {
                base_url: value.to_string(),
            }
        } else {
            AssetLocation::Directory {
                path: PathBuf::from(value),
            }
        }
    }

    pub fn to_source(&self) -> Result<Arc<dyn AssetSource>, ConfigError> {
        match self {
            AssetLocation::Directory { path } => Ok(Arc::new(DirectorySource::new(path))),
            #[cfg(feature = "http")]
            AssetLocation::Url { base_url } => {
                Ok(Arc::new(crate::source::HttpSource::new(base_url.as_str())))
            }
            #[cfg(not(feature = "http"))]
            AssetLocation::Url { base_url } => Err(ConfigError::invalid(
                "assets",
                format!("{base_url} (built without the `http` feature)"),
            )),
        }
    }
}

impl Default for AssetLocation {
    fn default() -> Self {
        AssetLocation::Directory {
            path: PathBuf::from("model"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub assets: AssetLocation,
    #[serde(default = "default_model_file")]
    pub model_file: String,
    #[serde(default = "default_metadata_file")]
    pub metadata_file: String,
    /// Predictions returned per scan, at most [`TOP_K`]
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Where accepted scans are recorded
    #[serde(default = "default_history_dir")]
    pub history_dir: PathBuf,
}

fn default_model_file() -> String {
    DEFAULT_MODEL_FILE.to_string()
}

fn default_metadata_file() -> String {
    DEFAULT_METADATA_FILE.to_string()
}

fn default_top_k() -> usize {
    TOP_K
}

fn default_history_dir() -> PathBuf {
    dirs_next::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dermascan")
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            assets: AssetLocation::default(),
            model_file: default_model_file(),
            metadata_file: default_metadata_file(),
            top_k: default_top_k(),
            history_dir: default_history_dir(),
        }
    }
}

impl EngineConfig {
    pub fn with_assets(mut self, assets: AssetLocation) -> Self {
        self.assets = assets;
        self
    }

    pub fn with_model_file(mut self, name: impl Into<String>) -> Self {
        self.model_file = name.into();
        self
    }

    pub fn with_metadata_file(mut self, name: impl Into<String>) -> Self {
        self.metadata_file = name.into();
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_history_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.history_dir = dir.into();
        self
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Defaults, or `path` when given, with process environment overrides applied
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `DERMASCAN_*` overrides from an arbitrary lookup
    pub fn apply_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(assets) = lookup(ENV_ASSETS).filter(|v| !v.trim().is_empty()) {
            self.assets = AssetLocation::parse(assets.trim());
        }
        if let Some(raw) = lookup(ENV_TOP_K) {
            self.top_k = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid(ENV_TOP_K, &raw))?;
        }
        if let Some(dir) = lookup(ENV_HISTORY_DIR).filter(|v| !v.trim().is_empty()) {
            self.history_dir = PathBuf::from(dir.trim());
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=TOP_K).contains(&self.top_k) {
            return Err(ConfigError::invalid("top_k", self.top_k));
        }
        if self.model_file.trim().is_empty() {
            return Err(ConfigError::invalid("model_file", "<empty>"));
        }
        if self.metadata_file.trim().is_empty() {
            return Err(ConfigError::invalid("metadata_file", "<empty>"));
        }
        Ok(())
    }
}
