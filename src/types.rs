use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// A tool as published by its latest release. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tool {
    pub name: String,
    pub repo: String,
    /// Release tag with the leading `v` stripped.
    pub version: String,
    /// Asset name to registry asset id. Iterates in lexical name order.
    pub assets: BTreeMap<String, u64>,
    pub install_type: String,
    pub release_notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetFormat {
    Raw,
    TarGz,
    Zip,
}

impl AssetFormat {
    pub fn classify(asset_name: &str) -> Self {
        if asset_name.contains(".zip") {
            AssetFormat::Zip
        } else if asset_name.contains(".tar.gz") {
            AssetFormat::TarGz
        } else {
            AssetFormat::Raw
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub name: String,
    pub id: u64,
    pub format: AssetFormat,
}

/// Filesystem view of a tool, probed fresh for every operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledBinary {
    pub path: PathBuf,
    pub exists: bool,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Installed(String),
    UpToDate(String),
    Updated(String),
    Removed,
    NotFound,
    Failed(String),
}

impl UpdateOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, UpdateOutcome::Failed(_))
    }
}

impl fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateOutcome::Installed(v) => write!(f, "installed {}", v),
            UpdateOutcome::UpToDate(v) => write!(f, "already up to date ({})", v),
            UpdateOutcome::Updated(v) => write!(f, "updated to {}", v),
            UpdateOutcome::Removed => write!(f, "removed"),
            UpdateOutcome::NotFound => write!(f, "not installed"),
            UpdateOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelfUpdateOutcome {
    UpToDate {
        current: String,
        latest: String,
    },
    Updated {
        from: String,
        to: String,
        notes: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlatformInfo {
    pub os: String,
    pub arch: String,
}

/// Registry view of a release.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Release {
    #[serde(rename = "tag_name")]
    pub tag: String,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
    #[serde(default, rename = "body")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReleaseAsset {
    pub name: String,
    pub id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AssetDownload {
    pub browser_download_url: String,
}
