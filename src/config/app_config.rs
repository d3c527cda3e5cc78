use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::config::link_config::LinkConfig;
use crate::utils::ensure_directory_exists;

const APP_DIR_NAME: &str = "robocar-link";
const CONFIG_FILE_NAME: &str = "config.json";

/// Host configuration: log level plus the link tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// `error`, `warn`, `info`, `debug` or `trace`; `RUST_LOG` takes precedence.
    pub log_level: String,
    pub link: LinkConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            log_level: "info".to_string(),
            link: LinkConfig::default(),
        }
    }
}

impl AppConfig {
    /// `<config dir>/robocar-link/config.json`
    pub fn default_path() -> Result<PathBuf> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| anyhow!("No configuration directory on this platform"))?;
        Ok(config_dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    pub async fn load(file_path: &Path) -> Result<Self> {
        if !file_path.exists() {
            warn!("Config file not found at {:?}, using default.", file_path);
            return Ok(Self::default());
        }
        let config_json = fs::read_to_string(file_path).await?;
        let config: Self = serde_json::from_str(&config_json)?;
        info!("Config loaded from {:?}", file_path);
        Ok(config)
    }

    pub async fn save(&self, file_path: &Path) -> Result<()> {
        if let Some(config_dir) = file_path.parent() {
            ensure_directory_exists(config_dir).await?;
        }
        fs::write(file_path, serde_json::to_string_pretty(&self)?).await?;
        info!("Config saved to {:?}.", file_path);
        Ok(())
    }
}
