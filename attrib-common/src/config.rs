//! Configuration loading and database path resolution

use crate::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Environment variable naming the database file
pub const DB_PATH_ENV: &str = "ATTRIB_DB_PATH";

/// Optional TOML configuration file contents
///
/// All keys are optional; anything absent falls through to the next
/// resolution tier (env var, CLI flag default).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    /// Database file path
    pub database_path: Option<String>,
    /// Scoring service settings
    #[serde(default)]
    pub scoring: ScoringToml,
}

/// `[scoring]` section of the config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScoringToml {
    /// Scoring service endpoint URL
    pub endpoint: Option<String>,
    /// API key sent as `x-api-key`
    pub api_key: Option<String>,
}

impl TomlConfig {
    /// Load the config file if one exists, otherwise return defaults.
    ///
    /// A missing file is not an error; a file that exists but fails to
    /// parse is.
    pub fn load() -> Result<Self> {
        let Some(path) = config_file_path() else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(&path)?;
        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }
}

/// Database path resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable (`ATTRIB_DB_PATH`)
/// 3. TOML config file (`database_path` key)
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_database_path(cli_arg: Option<&PathBuf>, config: &TomlConfig) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.clone();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(DB_PATH_ENV) {
        return PathBuf::from(path);
    }

    // Priority 3: TOML config file
    if let Some(ref path) = config.database_path {
        return PathBuf::from(path);
    }

    // Priority 4: OS-dependent compiled default
    default_database_path()
}

/// Config file location: `<config dir>/attrib/config.toml`
fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("attrib").join("config.toml"))
}

/// OS-dependent default database location
fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("attrib").join("attrib.db"))
        .unwrap_or_else(|| PathBuf::from("./attrib.db"))
}
