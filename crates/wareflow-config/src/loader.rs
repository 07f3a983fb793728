use std::path::{Path, PathBuf};

use tracing::{debug, info};
use wareflow_common::{Error, Result};

use crate::model::AppConfig;

const CANDIDATE_FILES: [&str; 3] = ["config.yml", "config.yaml", "config.toml"];

/// Locates, reads and writes the application config inside a config directory.
pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    /// `~/.config/wareflow` (platform equivalent), falling back to `~/.wareflow`.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("wareflow"))
            .unwrap_or_else(|| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".wareflow")
            })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// The first existing config file, if any.
    pub fn config_path(&self) -> Option<PathBuf> {
        CANDIDATE_FILES
            .iter()
            .map(|name| self.config_dir.join(name))
            .find(|path| path.is_file())
    }

    /// Load the config, or defaults when no config file exists.
    pub fn load(&self) -> Result<AppConfig> {
        let Some(path) = self.config_path() else {
            debug!(
                "no config file in {}, using defaults",
                self.config_dir.display()
            );
            return Ok(AppConfig::default());
        };

        let config = load_file(&path)?;
        validate(&config)?;
        info!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Write `config.yml`, creating the directory if needed.
    pub fn save(&self, config: &AppConfig) -> Result<PathBuf> {
        validate(config)?;
        std::fs::create_dir_all(&self.config_dir)?;
        let path = self.config_dir.join("config.yml");
        let yaml = serde_yaml::to_string(config)
            .map_err(|e| Error::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(&path, yaml)?;
        info!("config written to {}", path.display());
        Ok(path)
    }
}

/// Parse a config file, choosing the format from its extension.
pub fn load_file(path: &Path) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        "yml" | "yaml" => serde_yaml::from_str(&contents)
            .map_err(|e| Error::Config(format!("YAML parse error in {}: {e}", path.display()))),
        "toml" => toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("TOML parse error in {}: {e}", path.display()))),
        other => Err(Error::Config(format!(
            "unsupported config extension: {other}"
        ))),
    }
}

pub fn validate(config: &AppConfig) -> Result<()> {
    config.backup.schedule_time().map_err(Error::Config)?;
    Ok(())
}
