//! Configuration for the vs binary

use std::path::PathBuf;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

/// vs configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the store
    #[serde(rename = "store-path")]
    pub store_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            store_path: base.join("vectorstore"),
        }
    }
}

impl Config {
    /// Load configuration, falling back to defaults when no file exists
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            return serde_yaml::from_str(&content).context("Failed to parse config file");
        }

        let local_config = PathBuf::from(".vectorstore.yml");
        if local_config.exists() {
            let content = std::fs::read_to_string(&local_config).context("Failed to read config file")?;
            return serde_yaml::from_str(&content).context("Failed to parse config file");
        }

        Ok(Self::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_store_path() {
        let config = Config::default();
        assert!(config.store_path.ends_with("vectorstore"));
    }
}
