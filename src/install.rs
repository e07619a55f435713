//! Per-tool install, update and remove, plus batch variants that report one
//! outcome per tool and never stop at the first failure.

use crate::changelog::{display_text, TerminalRenderer};
use crate::download::Downloader;
use crate::error::{Error, Result};
use crate::platform::get_system_info;
use crate::registry::ReleaseRegistry;
use crate::report::ToolStatus;
use crate::resolve::{is_platform_supported, resolve_tool_asset};
use crate::types::*;
use crate::version::{self, normalize_version, tags_match};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

pub const INSTALL_TYPE: &str = "release";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOp {
    Install,
    Update,
    Remove,
}

pub struct InstallManager<R> {
    registry: R,
    downloader: Downloader,
    organization: String,
    install_dir: PathBuf,
    platform: PlatformInfo,
    probe_timeout: Duration,
    changelog: Option<TerminalRenderer>,
}

impl<R: ReleaseRegistry> InstallManager<R> {
    pub fn new(
        registry: R,
        downloader: Downloader,
        organization: &str,
        install_dir: PathBuf,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            downloader,
            organization: organization.to_string(),
            install_dir,
            platform: get_system_info(),
            probe_timeout,
            changelog: None,
        }
    }

    pub fn with_platform(mut self, platform: PlatformInfo) -> Self {
        self.platform = platform;
        self
    }

    /// Print release notes after successful updates, rendered with `renderer`.
    pub fn with_changelog(mut self, renderer: Option<TerminalRenderer>) -> Self {
        self.changelog = renderer;
        self
    }

    pub async fn fetch_tool(&self, name: &str, repo: &str) -> Result<Tool> {
        tracing::debug!("Fetching latest release of {}/{}", self.organization, repo);
        let release = self
            .registry
            .latest_release(&self.organization, repo)
            .await?;
        Ok(tool_from_release(name, repo, release))
    }

    /// Install a tool that is not present yet. Returns the installed version.
    pub async fn install(&self, tool: &Tool) -> Result<String> {
        let (path, exists) = version::executable_path(&self.install_dir, &tool.name);
        if exists {
            return Err(Error::AlreadyInstalled {
                tool: tool.name.clone(),
                path,
            });
        }

        tracing::info!("Installing {}...", tool.name);
        let (asset, url) = self.locate(tool).await?;
        let installed = self.place(tool, &asset, &url).await?;
        tracing::info!("Installed {} {}", tool.name, installed);
        Ok(installed)
    }

    /// Replace an installed tool with the fetched release unless the
    /// installed version already matches it. The installed executable is
    /// only deleted once the release asset and its download URL are known.
    pub async fn update(&self, tool: &Tool) -> Result<String> {
        let installed = version::probe(&self.install_dir, &tool.name, self.probe_timeout).await;
        if !installed.exists {
            return Err(Error::ToolNotFound {
                tool: tool.name.clone(),
                path: installed.path,
            });
        }

        if let Some(current) = &installed.version {
            if tags_match(&tool.version, current) {
                return Err(Error::AlreadyUpToDate {
                    tool: tool.name.clone(),
                    version: current.clone(),
                });
            }
        }

        let (asset, url) = self.locate(tool).await?;

        tracing::info!(
            "Updating {} {} -> {}...",
            tool.name,
            installed.version.as_deref().unwrap_or("unknown"),
            tool.version
        );
        fs::remove_file(&installed.path)?;
        let updated = self.place(tool, &asset, &url).await?;

        if let (Some(renderer), Some(notes)) = (&self.changelog, &tool.release_notes) {
            println!("{}\n", display_text(renderer, notes));
        }

        tracing::info!("Updated {} to {}", tool.name, updated);
        Ok(updated)
    }

    pub fn remove(&self, tool_name: &str) -> Result<PathBuf> {
        let (path, exists) = version::executable_path(&self.install_dir, tool_name);
        if !exists {
            return Err(Error::ToolNotFound {
                tool: tool_name.to_string(),
                path,
            });
        }

        fs::remove_file(&path)?;
        tracing::info!("Removed {} from {}", tool_name, path.display());
        Ok(path)
    }

    pub async fn status(&self, tool: &Tool) -> ToolStatus {
        let installed = version::probe(&self.install_dir, &tool.name, self.probe_timeout).await;
        match installed.version {
            Some(current) if tags_match(&tool.version, &current) => {
                ToolStatus::Latest(tool.version.clone())
            }
            Some(current) => ToolStatus::Outdated {
                installed: current,
                latest: tool.version.clone(),
            },
            None if !is_platform_supported(tool, &self.platform) => ToolStatus::NotSupported,
            None => ToolStatus::NotInstalled,
        }
    }

    /// The platform asset of `tool` and where to download it from.
    async fn locate(&self, tool: &Tool) -> Result<(Asset, String)> {
        let asset = resolve_tool_asset(tool, &self.platform)?;
        let url = self
            .registry
            .download_url(&self.organization, &tool.repo, asset.id)
            .await?;
        Ok((asset, url))
    }

    async fn place(&self, tool: &Tool, asset: &Asset, url: &str) -> Result<String> {
        let path = self
            .downloader
            .install_asset(url, asset, &tool.name, &self.install_dir)
            .await?;

        match version::installed_version(&path, self.probe_timeout).await {
            Some(found) if tags_match(&tool.version, &found) => {
                tracing::debug!("Verified {} reports {}", path.display(), found);
            }
            Some(found) => tracing::warn!(
                "{} reports version {} but the release is {}",
                tool.name,
                found,
                tool.version
            ),
            None => tracing::warn!("Could not verify the version of {}", path.display()),
        }

        Ok(tool.version.clone())
    }

    /// Run `op` for every named tool of `catalog` (name to repository),
    /// collecting one outcome per tool.
    pub async fn run_batch(
        &self,
        op: BatchOp,
        catalog: &BTreeMap<String, String>,
        names: &[String],
    ) -> Vec<(String, UpdateOutcome)> {
        let mut outcomes = Vec::with_capacity(names.len());

        for name in names {
            let outcome = match lookup(catalog, name) {
                Some((tool_name, repo)) => self.run_one(op, tool_name, repo).await,
                None => UpdateOutcome::Failed(format!("{} is not a known tool", name)),
            };

            match &outcome {
                UpdateOutcome::Failed(reason) => tracing::error!("{}: {}", name, reason),
                other => tracing::info!("{}: {}", name, other),
            }
            outcomes.push((name.clone(), outcome));
        }

        outcomes
    }

    pub async fn install_many(
        &self,
        catalog: &BTreeMap<String, String>,
        names: &[String],
    ) -> Vec<(String, UpdateOutcome)> {
        self.run_batch(BatchOp::Install, catalog, names).await
    }

    pub async fn update_many(
        &self,
        catalog: &BTreeMap<String, String>,
        names: &[String],
    ) -> Vec<(String, UpdateOutcome)> {
        self.run_batch(BatchOp::Update, catalog, names).await
    }

    pub async fn remove_many(
        &self,
        catalog: &BTreeMap<String, String>,
        names: &[String],
    ) -> Vec<(String, UpdateOutcome)> {
        self.run_batch(BatchOp::Remove, catalog, names).await
    }

    pub async fn install_all(&self, catalog: &BTreeMap<String, String>) -> Vec<(String, UpdateOutcome)> {
        let names: Vec<String> = catalog.keys().cloned().collect();
        self.run_batch(BatchOp::Install, catalog, &names).await
    }

    pub async fn update_all(&self, catalog: &BTreeMap<String, String>) -> Vec<(String, UpdateOutcome)> {
        let names: Vec<String> = catalog.keys().cloned().collect();
        self.run_batch(BatchOp::Update, catalog, &names).await
    }

    pub async fn remove_all(&self, catalog: &BTreeMap<String, String>) -> Vec<(String, UpdateOutcome)> {
        let names: Vec<String> = catalog.keys().cloned().collect();
        self.run_batch(BatchOp::Remove, catalog, &names).await
    }

    async fn run_one(&self, op: BatchOp, name: &str, repo: &str) -> UpdateOutcome {
        if op == BatchOp::Remove {
            return match self.remove(name) {
                Ok(_) => UpdateOutcome::Removed,
                Err(Error::ToolNotFound { .. }) => UpdateOutcome::NotFound,
                Err(e) => UpdateOutcome::Failed(e.to_string()),
            };
        }

        let tool = match self.fetch_tool(name, repo).await {
            Ok(tool) => tool,
            Err(e) => return UpdateOutcome::Failed(e.to_string()),
        };

        match op {
            BatchOp::Install => match self.install(&tool).await {
                Ok(v) => UpdateOutcome::Installed(v),
                Err(e) => UpdateOutcome::Failed(e.to_string()),
            },
            _ => match self.update(&tool).await {
                Ok(v) => UpdateOutcome::Updated(v),
                Err(Error::AlreadyUpToDate { version, .. }) => UpdateOutcome::UpToDate(version),
                Err(Error::ToolNotFound { .. }) => UpdateOutcome::NotFound,
                Err(e) => UpdateOutcome::Failed(e.to_string()),
            },
        }
    }
}

/// Catalog entry for `name`, matched case-insensitively.
fn lookup<'a>(catalog: &'a BTreeMap<String, String>, name: &str) -> Option<(&'a str, &'a str)> {
    catalog
        .iter()
        .find(|(tool, _)| tool.eq_ignore_ascii_case(name))
        .map(|(tool, repo)| (tool.as_str(), repo.as_str()))
}

pub fn tool_from_release(name: &str, repo: &str, release: Release) -> Tool {
    let mut assets = BTreeMap::new();
    for asset in release.assets {
        assets.entry(asset.name).or_insert(asset.id);
    }

    Tool {
        name: name.to_string(),
        repo: repo.to_string(),
        version: normalize_version(&release.tag).to_string(),
        assets,
        install_type: INSTALL_TYPE.to_string(),
        release_notes: release.notes.filter(|n| !n.trim().is_empty()),
    }
}
