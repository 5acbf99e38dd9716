//! Configuration loading

use anyhow::Result;
use choreo_telemetry::ReaderConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub rig: RigFileConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Address of the serial-to-TCP bridge in front of the motion controller
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(flatten)]
    pub reader: ReaderConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            reader: ReaderConfig::default(),
        }
    }
}

fn default_address() -> String {
    "127.0.0.1:4000".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Move-set document used when no path is given on the command line
    #[serde(default = "default_project_path")]
    pub path: PathBuf,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            path: default_project_path(),
        }
    }
}

fn default_project_path() -> PathBuf {
    PathBuf::from("./choreo.json")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RigFileConfig {
    /// Rig layout to check projects against
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Load configuration from file, falling back to defaults
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}
