//! Installed-version probing and version comparison.
//!
//! Two comparison policies live here and are deliberately kept apart:
//! [`tags_match`] is the exact, case-insensitive check routine tool updates
//! use, [`is_outdated`] is the ordered semantic comparison that gates
//! self-update.

use crate::error::{Error, Result};
use crate::platform;
use crate::types::InstalledBinary;
use regex::Regex;
use semver::Version;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

/// Argument passed to an executable to make it print its version.
pub const VERSION_FLAG: &str = "--version";

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"v?(\d+\.\d+\.\d+(?:-[0-9A-Za-z.\-]+)?(?:\+[0-9A-Za-z.\-]+)?)")
            .unwrap_or_else(|e| unreachable!("invalid version pattern: {}", e))
    })
}

/// Strip surrounding whitespace and a single leading `v`.
pub fn normalize_version(version: &str) -> &str {
    let trimmed = version.trim();
    trimmed.strip_prefix('v').unwrap_or(trimmed)
}

/// Canonical executable path for `tool_name` and whether a file exists there.
pub fn executable_path(dir: &Path, tool_name: &str) -> (PathBuf, bool) {
    let path = platform::executable_file(dir, tool_name);
    let exists = path.is_file();
    (path, exists)
}

/// Probe the filesystem and the executable itself. Never cached.
pub async fn probe(dir: &Path, tool_name: &str, timeout: Duration) -> InstalledBinary {
    let (path, exists) = executable_path(dir, tool_name);
    let version = if exists {
        installed_version(&path, timeout).await
    } else {
        None
    };
    InstalledBinary {
        path,
        exists,
        version,
    }
}

/// Run `<path> --version` and extract a normalized version token.
///
/// Any failure yields `None`: callers read absence as "not installed or
/// version unknown", never as an error.
pub async fn installed_version(path: &Path, timeout: Duration) -> Option<String> {
    if !path.is_file() {
        tracing::debug!("No executable at {}", path.display());
        return None;
    }

    let run = tokio::process::Command::new(path)
        .arg(VERSION_FLAG)
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(timeout, run).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            tracing::debug!("Could not run {}: {}", path.display(), e);
            return None;
        }
        Err(_) => {
            tracing::debug!("Timed out probing version of {}", path.display());
            return None;
        }
    };

    if !output.status.success() {
        tracing::debug!(
            "{} {} exited with {:?}",
            path.display(),
            VERSION_FLAG,
            output.status.code()
        );
        return None;
    }

    let version = parse_version_output(&String::from_utf8_lossy(&output.stdout))
        .or_else(|| parse_version_output(&String::from_utf8_lossy(&output.stderr)));
    if version.is_none() {
        tracing::debug!("No version found in output of {}", path.display());
    }
    version
}

/// First version-looking token in `output`, without a leading `v`.
pub fn parse_version_output(output: &str) -> Option<String> {
    version_pattern()
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Exact tag equality, ignoring case and a leading `v`.
pub fn tags_match(fetched: &str, installed: &str) -> bool {
    normalize_version(fetched).to_lowercase() == normalize_version(installed).to_lowercase()
}

pub fn parse_semver(version: &str) -> Result<Version> {
    Version::parse(normalize_version(version)).map_err(|source| Error::VersionParseFailed {
        version: version.to_string(),
        source,
    })
}

/// Ordered semantic comparison: `current < latest`.
pub fn is_outdated(current: &str, latest: &str) -> Result<bool> {
    Ok(parse_semver(current)? < parse_semver(latest)?)
}

/// Label shown next to the manager's own version after a version check.
pub fn version_description(current: &str, latest: &str) -> &'static str {
    match is_outdated(current, latest) {
        Ok(true) => "(outdated)",
        Ok(false) => "(latest)",
        Err(_) => "(unknown)",
    }
}
