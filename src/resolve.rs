//! Release asset selection for the current platform.
//!
//! Candidates are scanned in lexical order of their names so that the same
//! asset list always resolves to the same asset, independent of the order
//! the registry returned them in.

use crate::error::{Error, Result};
use crate::types::{Asset, AssetFormat, PlatformInfo, Tool};

/// Select the first asset (by lexical name order) whose name contains the
/// tool name, OS token and arch token, ignoring case.
pub fn resolve_asset<'a, I>(assets: I, tool_name: &str, os: &str, arch: &str) -> Result<Asset>
where
    I: IntoIterator<Item = (&'a str, u64)>,
{
    let mut candidates: Vec<(&str, u64)> = assets.into_iter().collect();
    candidates.sort_by(|a, b| a.0.cmp(b.0));

    tracing::trace!(
        "Looking for {} assets matching OS: '{}', ARCH: '{}'",
        tool_name,
        os,
        arch
    );

    candidates
        .into_iter()
        .find(|(name, _)| is_asset(name, tool_name, os, arch))
        .map(|(name, id)| {
            tracing::debug!("Selected asset '{}' (id {})", name, id);
            Asset {
                name: name.to_string(),
                id,
                format: AssetFormat::classify(name),
            }
        })
        .ok_or_else(|| Error::NoAssetFoundForPlatform {
            tool: tool_name.to_string(),
            os: os.to_string(),
            arch: arch.to_string(),
        })
}

pub fn resolve_tool_asset(tool: &Tool, platform: &PlatformInfo) -> Result<Asset> {
    resolve_asset(
        tool.assets.iter().map(|(name, id)| (name.as_str(), *id)),
        &tool.name,
        &platform.os,
        &platform.arch,
    )
}

/// Whether the tool publishes anything installable for `platform`.
pub fn is_platform_supported(tool: &Tool, platform: &PlatformInfo) -> bool {
    resolve_tool_asset(tool, platform).is_ok()
}

fn is_asset(asset: &str, name: &str, os: &str, arch: &str) -> bool {
    let asset = asset.to_lowercase();
    [name, os, arch]
        .iter()
        .all(|token| asset.contains(&token.to_lowercase()))
}
