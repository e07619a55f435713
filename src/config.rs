use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const APP_NAME: &str = "crtm";
pub const CONFIG_FILE_NAME: &str = "config.yaml";
pub const DEFAULT_ORGANIZATION: &str = "chainreactors";

/// Tools managed out of the box, by name and repository.
pub const DEFAULT_TOOLS: &[(&str, &str)] = &[
    ("gogo", "gogo"),
    ("spray", "spray"),
    ("zombie", "zombie"),
    ("urlfounder", "urlfounder"),
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub binary_path: PathBuf,
    pub organization: String,
    pub api_url: String,
    /// Tool name to repository name within `organization`.
    pub tools: BTreeMap<String, String>,
    pub disable_changelog: bool,
    pub disable_update_check: bool,
    pub no_color: bool,
    pub version_check_timeout_secs: u64,
    pub download_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            binary_path: default_binary_path(),
            organization: DEFAULT_ORGANIZATION.to_string(),
            api_url: crate::registry::DEFAULT_API_URL.to_string(),
            tools: DEFAULT_TOOLS
                .iter()
                .map(|(name, repo)| (name.to_string(), repo.to_string()))
                .collect(),
            disable_changelog: false,
            disable_update_check: false,
            no_color: false,
            version_check_timeout_secs: 5,
            download_timeout_secs: 30,
        }
    }
}

impl Settings {
    pub fn version_check_timeout(&self) -> Duration {
        Duration::from_secs(self.version_check_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    /// Apply `CRTM_*` overrides, reading variables through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("CRTM_BINARY_PATH").filter(|p| !p.is_empty()) {
            self.binary_path = PathBuf::from(path);
        }
        if let Some(url) = lookup("CRTM_API_URL").filter(|u| !u.is_empty()) {
            self.api_url = url;
        }
        if let Some(flag) = lookup("CRTM_DISABLE_UPDATE_CHECK") {
            self.disable_update_check = flag.to_lowercase() == "true" || flag == "1";
        }
    }
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

pub fn default_binary_path() -> PathBuf {
    home_dir().join(".crtm").join("bin")
}

pub fn default_config_path() -> PathBuf {
    home_dir()
        .join(".config")
        .join(APP_NAME)
        .join(CONFIG_FILE_NAME)
}

/// Settings from `path` (or the default location) with environment
/// overrides applied. A missing file yields the defaults.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let config_path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);
    tracing::debug!("Config file path: {}", config_path.display());

    let mut settings = if config_path.exists() {
        let content = fs::read_to_string(&config_path).with_context(|| {
            format!("Could not read config file at {}", config_path.display())
        })?;
        if content.trim().is_empty() {
            Settings::default()
        } else {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Could not parse {} as YAML", config_path.display()))?
        }
    } else {
        Settings::default()
    };

    settings.apply_env_overrides(|key| std::env::var(key).ok());
    Ok(settings)
}
