//! Configuration file loading
//!
//! The format is picked from the file extension: `.toml` or `.json`.

use std::path::Path;

use serde::de::DeserializeOwned;

use crate::errors::types::{InfraError, Result};

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Detect the format from a path's extension
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Ok(ConfigFormat::Toml),
            Some(ext) if ext.eq_ignore_ascii_case("json") => Ok(ConfigFormat::Json),
            _ => Err(InfraError::Config(format!(
                "Unsupported configuration file: {} (expected .toml or .json)",
                path.display()
            ))),
        }
    }
}

/// Parse configuration text in the given format
pub fn parse_config<T: DeserializeOwned>(contents: &str, format: ConfigFormat) -> Result<T> {
    match format {
        ConfigFormat::Toml => toml::from_str(contents).map_err(|e| InfraError::Parse(e.to_string())),
        ConfigFormat::Json => {
            serde_json::from_str(contents).map_err(|e| InfraError::Parse(e.to_string()))
        }
    }
}

/// Load and deserialize a configuration file
pub fn load_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let format = ConfigFormat::from_path(path)?;
    let contents = std::fs::read_to_string(path)?;
    tracing::debug!("Loading {:?} configuration from {}", format, path.display());
    parse_config(&contents, format)
}
