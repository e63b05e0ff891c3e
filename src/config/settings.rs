use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_SETTINGS: &str = "PSYNC_SETTINGS";

/// Tool-wide settings from `psync.toml`, shared by every project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub ssh_program: String,
    pub rsync_program: String,
    pub ssh_copy_id_program: String,
    pub ssh_keygen_program: String,
    pub default_excludes: Vec<String>,
    pub probe_timeout_ms: u64,
    pub log_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ssh_program: "ssh".to_string(),
            rsync_program: "rsync".to_string(),
            ssh_copy_id_program: "ssh-copy-id".to_string(),
            ssh_keygen_program: "ssh-keygen".to_string(),
            default_excludes: vec![".vscode".to_string(), ".idea".to_string(), ".git".to_string()],
            probe_timeout_ms: 1000,
            log_file: None,
        }
    }
}

#[derive(Debug)]
pub struct SettingsManager {
    settings_file: PathBuf,
}

impl SettingsManager {
    /// `PSYNC_SETTINGS` if set, else `<config dir>/psync/psync.toml`.
    pub fn new() -> Result<Self> {
        let settings_file = match std::env::var_os(ENV_SETTINGS) {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => dirs::config_dir()
                .context("Could not find config directory")?
                .join("psync")
                .join("psync.toml"),
        };
        Ok(Self::with_file(settings_file))
    }

    pub fn with_file(settings_file: impl Into<PathBuf>) -> Self {
        Self {
            settings_file: settings_file.into(),
        }
    }

    pub fn load_settings(&self) -> Result<Settings> {
        // A missing file just means defaults
        if !self.settings_file.exists() {
            return Ok(Settings::default());
        }

        let content = fs::read_to_string(&self.settings_file).with_context(|| {
            format!("Failed to read settings file {}", self.settings_file.display())
        })?;

        toml::from_str(&content).with_context(|| {
            format!("Failed to parse settings file {}", self.settings_file.display())
        })
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_file
    }
}
