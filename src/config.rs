use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const CONFIG_VERSION: u64 = 1;

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("~/.local/share"))
        .join("taskflow")
}

fn default_version() -> u64 {
    CONFIG_VERSION
}

fn enabled() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TaskflowConfig {
    #[serde(default = "default_version")]
    pub version: u64,
    #[serde(default = "default_data_dir")]
    pub data_directory: PathBuf,
    #[serde(default)]
    pub debug_logging: bool,
    /// Ring the terminal bell when a reminder fires.
    #[serde(default = "enabled")]
    pub sound_enabled: bool,
    /// Also send reminders to the system journal once permitted.
    #[serde(default = "enabled")]
    pub system_notifications: bool,
}

impl Default for TaskflowConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            data_directory: default_data_dir(),
            debug_logging: false,
            sound_enabled: true,
            system_notifications: true,
        }
    }
}

impl TaskflowConfig {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("taskflow")
            .join("config.json")
    }

    /// Load from `path`, falling back to defaults when the file is missing or broken.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(Error::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                Self::default()
            }
            Err(e) => {
                log::warn!("Using default config: {}", e);
                Self::default()
            }
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let config: Self = serde_json::from_str(&content)?;
        if config.version > CONFIG_VERSION {
            return Err(Error::Config(format!(
                "config version {} is newer than supported version {}",
                config.version, CONFIG_VERSION
            )));
        }
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| Error::io(path, e))
    }

    pub fn tasks_path(&self) -> PathBuf {
        self.data_directory.join("tasks.json")
    }
}
