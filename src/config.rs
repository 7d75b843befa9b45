use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendSettings,
    #[serde(default)]
    pub settings: Settings,
}

/// Which registered backend to activate and what to feed it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSettings {
    #[serde(default = "default_backend_kind")]
    pub kind: String,
    #[serde(default)]
    pub schema: Option<PathBuf>,
    #[serde(default)]
    pub fixtures: Option<PathBuf>,
}

fn default_backend_kind() -> String {
    "memory".to_string()
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            kind: default_backend_kind(),
            schema: None,
            fixtures: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Applied as `take` when a query document sets none
    #[serde(default = "default_query_limit")]
    pub default_query_limit: usize,
    /// Print the composed expression before the results
    #[serde(default)]
    pub explain: bool,
}

fn default_query_limit() -> usize {
    100
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_query_limit: default_query_limit(),
            explain: false,
        }
    }
}

impl Config {
    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("query-designer");

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {:?}", config_dir))?;
            info!("Created config directory: {:?}", config_dir);
        }

        Ok(config_dir.join("config.toml"))
    }

    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        Self::load_from(&config_path)
    }

    /// Reads a config file; a missing file yields the defaults
    pub fn load_from(config_path: &Path) -> Result<Self> {
        debug!("Loading config from: {:?}", config_path);

        if !config_path.exists() {
            info!("Config file doesn't exist, using defaults");
            return Ok(Self::default());
        }

        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        let config: Config = toml::from_str(&config_content)
            .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

        debug!("Loaded config for backend '{}'", config.backend.kind);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let path = std::env::temp_dir().join(format!("query-designer-{}.toml", uuid::Uuid::new_v4()));
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.backend.kind, "memory");
        assert_eq!(config.settings.default_query_limit, 100);
    }

    #[test]
    fn test_partial_file() {
        let path = std::env::temp_dir().join(format!("query-designer-{}.toml", uuid::Uuid::new_v4()));
        fs::write(&path, "[backend]\nfixtures = \"data.json\"\n\n[settings]\nexplain = true\n").unwrap();
        let config = Config::load_from(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(config.backend.kind, "memory");
        assert_eq!(config.backend.fixtures, Some(PathBuf::from("data.json")));
        assert!(config.settings.explain);
        assert_eq!(config.settings.default_query_limit, 100);
    }

    #[test]
    fn test_unparseable_file() {
        let path = std::env::temp_dir().join(format!("query-designer-{}.toml", uuid::Uuid::new_v4()));
        fs::write(&path, "[settings]\ndefault_query_limit = \"many\"\n").unwrap();
        let result = Config::load_from(&path);
        fs::remove_file(&path).unwrap();
        assert!(result.is_err());
    }
}
