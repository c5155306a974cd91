// src/config/file.rs
// File-based configuration from ~/.recall-trigger/config.toml

use std::path::{Path, PathBuf};
use tracing::debug;

use super::EngineConfig;
use crate::Result;
use crate::error::TriggerError;

impl EngineConfig {
    /// Default config file location
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".recall-trigger")
            .join("config.toml")
    }

    /// Parse a TOML document. Missing sections take their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// An explicit path that does not exist is an error; a missing default
    /// file just means defaults. A file that exists but does not parse is
    /// always an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::default_path(), false),
        };

        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                let config = Self::from_toml_str(&contents).map_err(|e| {
                    TriggerError::Config(format!("{}: {}", path.display(), e))
                })?;
                debug!(path = %path.display(), "Loaded config from file");
                Ok(config)
            }
            Err(e) if explicit => Err(TriggerError::Config(format!(
                "cannot read {}: {}",
                path.display(),
                e
            ))),
            Err(_) => {
                debug!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
        }
    }
}
