mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use crtm::changelog::{display_text, TerminalRenderer};
use crtm::config::{self, Settings, APP_NAME};
use crtm::download::{remove_stale_temp_files, Downloader};
use crtm::install::InstallManager;
use crtm::registry::{GitHubRegistry, VersionCheckParams};
use crtm::report::Palette;
use crtm::self_update::SelfUpdater;
use crtm::types::{SelfUpdateOutcome, UpdateOutcome};
use crtm::version::version_description;
use crtm::Error;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut settings = config::load_settings(cli.config.as_deref())?;
    if let Some(path) = &cli.binary_path {
        settings.binary_path = path.clone();
    }
    settings.no_color |= cli.no_color;
    settings.disable_update_check |= cli.disable_update_check;

    setup_logging(&cli, settings.no_color)?;

    let mut scratch_dirs = vec![settings.binary_path.clone()];
    if let Some(dir) = env::current_exe().ok().and_then(|exe| exe.parent().map(PathBuf::from)) {
        scratch_dirs.push(dir);
    }

    tokio::select! {
        result = run(cli, settings) => result,
        _ = tokio::signal::ctrl_c() => {
            println!("\r- Ctrl+C pressed in Terminal, Exiting...");
            for dir in &scratch_dirs {
                let removed = remove_stale_temp_files(dir);
                if removed > 0 {
                    tracing::debug!("Removed {} temporary file(s) from {}", removed, dir.display());
                }
            }
            std::process::exit(0);
        }
    }
}

async fn run(cli: Cli, settings: Settings) -> Result<ExitCode> {
    let palette = Palette::new(!settings.no_color);

    match &cli.command {
        Commands::Version => {
            println!("crtm {}", cli::get_version());
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Path => {
            println!("{}", settings.binary_path.display());
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    let registry = GitHubRegistry::new(&settings.api_url, settings.version_check_timeout())?
        .with_token(env::var("GITHUB_TOKEN").ok());

    if !settings.disable_update_check && !matches!(cli.command, Commands::SelfUpdate { .. }) {
        check_for_new_version(&registry, &settings).await;
    }

    let downloader = Downloader::new(settings.download_timeout(), !cli.quiet)?;

    match cli.command {
        Commands::Install { tools, all } => {
            let manager = build_manager(registry, downloader, &settings, None);
            let outcomes = if all {
                manager.install_all(&settings.tools).await
            } else {
                manager.install_many(&settings.tools, &tools).await
            };
            print_outcomes(&palette, &outcomes);
        }

        Commands::Update {
            tools,
            all,
            disable_changelog,
        } => {
            let renderer = (!disable_changelog && !settings.disable_changelog)
                .then(|| TerminalRenderer::new(palette.color()));
            let manager = build_manager(registry, downloader, &settings, renderer);
            let outcomes = if all {
                manager.update_all(&settings.tools).await
            } else {
                manager.update_many(&settings.tools, &tools).await
            };
            print_outcomes(&palette, &outcomes);
        }

        Commands::Remove { tools, all } => {
            let manager = build_manager(registry, downloader, &settings, None);
            let outcomes = if all {
                manager.remove_all(&settings.tools).await
            } else {
                manager.remove_many(&settings.tools, &tools).await
            };
            print_outcomes(&palette, &outcomes);
        }

        Commands::List => {
            let manager = build_manager(registry, downloader, &settings, None);
            println!("Tools in {}:", settings.binary_path.display());
            for (name, repo) in &settings.tools {
                match manager.fetch_tool(name, repo).await {
                    Ok(tool) => {
                        let status = manager.status(&tool).await;
                        println!("  {} {}", name, palette.status(&status));
                    }
                    Err(e) => {
                        tracing::error!("Could not fetch latest release of {}: {}", name, e);
                        let failed = UpdateOutcome::Failed(e.to_string());
                        println!("  {}", palette.outcome(name, &failed));
                    }
                }
            }
        }

        Commands::SelfUpdate { disable_changelog } => {
            let show_notes = !disable_changelog && !settings.disable_changelog;
            return self_update(&registry, &downloader, &settings, &palette, show_notes).await;
        }

        Commands::Version | Commands::Path => {}
    }

    Ok(ExitCode::SUCCESS)
}

fn setup_logging(cli: &Cli, no_color: bool) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if cli.quiet {
        "error"
    } else if cli.verbose == 0 {
        "warn"
    } else if cli.verbose == 1 {
        "info"
    } else {
        "debug"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(!no_color)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .init();

    Ok(())
}

fn build_manager(
    registry: GitHubRegistry,
    downloader: Downloader,
    settings: &Settings,
    changelog: Option<TerminalRenderer>,
) -> InstallManager<GitHubRegistry> {
    InstallManager::new(
        registry,
        downloader,
        &settings.organization,
        settings.binary_path.clone(),
        settings.version_check_timeout(),
    )
    .with_changelog(changelog)
}

fn print_outcomes(palette: &Palette, outcomes: &[(String, UpdateOutcome)]) {
    for (tool, outcome) in outcomes {
        println!("{}", palette.outcome(tool, outcome));
    }
}

/// Report whether this build is the latest crtm release. Failures are only
/// visible in verbose output.
async fn check_for_new_version(registry: &GitHubRegistry, settings: &Settings) {
    let current = env!("CARGO_PKG_VERSION");
    let params = VersionCheckParams::current(APP_NAME, current);

    match registry
        .check_latest_version(&settings.organization, APP_NAME, &params)
        .await
    {
        Ok(latest) => tracing::info!(
            "Current crtm version v{} {}",
            current,
            version_description(current, &latest)
        ),
        Err(e) => tracing::debug!("crtm version check failed: {}", e),
    }
}

async fn self_update(
    registry: &GitHubRegistry,
    downloader: &Downloader,
    settings: &Settings,
    palette: &Palette,
    show_notes: bool,
) -> Result<ExitCode> {
    let executable = env::current_exe()
        .and_then(fs::canonicalize)
        .context("Could not locate the running crtm executable")?;

    let updater = SelfUpdater::new(registry, downloader, &settings.organization, executable);
    match updater.run().await {
        Ok(SelfUpdateOutcome::UpToDate { current, .. }) => {
            println!("crtm is already updated to latest version (v{})", current);
            Ok(ExitCode::SUCCESS)
        }
        Ok(SelfUpdateOutcome::Updated { from, to, notes }) => {
            println!("crtm successfully updated v{} -> v{} (latest)", from, to);
            if let Some(notes) = notes.filter(|_| show_notes) {
                let renderer = TerminalRenderer::new(palette.color());
                println!("{}\n", display_text(&renderer, &notes));
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e @ Error::RollbackFailed { .. }) => {
            tracing::error!("{}", e);
            eprintln!("crtm could not be restored, please reinstall it manually: {}", e);
            Ok(ExitCode::FAILURE)
        }
        Err(e) => {
            tracing::error!("crtm update failed: {}", e);
            eprintln!("crtm update failed: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}
