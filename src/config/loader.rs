//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::MirrorConfig;
use crate::config::validation::validate_config;
use crate::error::ConfigError;
use crate::pipeline::Registry;

/// Document syntax, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Toml,
}

impl Format {
    /// `.toml` files are TOML; everything else is read as JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Format::Toml,
            _ => Format::Json,
        }
    }
}

/// Parse a configuration document without validating it.
pub fn parse_config(content: &str, format: Format) -> Result<MirrorConfig, ConfigError> {
    Ok(match format {
        Format::Json => serde_json::from_str(content)?,
        Format::Toml => toml::from_str(content)?,
    })
}

/// Load and validate configuration from a JSON or TOML file.
pub fn load_config(path: &Path, registry: &Registry) -> Result<MirrorConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config = parse_config(&content, Format::from_path(path))?;
    validate_config(&config, registry).map_err(ConfigError::Validation)?;
    Ok(config)
}
