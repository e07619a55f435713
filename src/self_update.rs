//! Replacing the running crtm executable with its latest release.
//!
//! The previous executable is copied to `<exe>.old` before anything is
//! written. A failed replacement renames that copy back, so the original is
//! either untouched, restored, or reported as unrecoverable.

use crate::config::APP_NAME;
use crate::download::{executable_bytes, make_executable, Downloader, TEMP_PREFIX};
use crate::error::{Error, Result};
use crate::platform::get_system_info;
use crate::registry::ReleaseRegistry;
use crate::resolve::resolve_asset;
use crate::types::{PlatformInfo, SelfUpdateOutcome};
use crate::version::{is_outdated, normalize_version};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const BACKUP_SUFFIX: &str = ".old";

/// Writes new content over an executable.
pub trait Replace {
    fn replace(&self, target: &Path, content: &[u8]) -> io::Result<()>;
}

/// Stages content in a sibling temp file and renames it over the target.
#[derive(Debug, Default, Clone, Copy)]
pub struct AtomicReplace;

impl Replace for AtomicReplace {
    fn replace(&self, target: &Path, content: &[u8]) -> io::Result<()> {
        let dir = parent_dir(target);
        let mut staged = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(dir)?;
        staged.write_all(content)?;
        staged.as_file().sync_all()?;
        make_executable(staged.path())?;

        // a running executable cannot be overwritten on windows, only renamed
        #[cfg(windows)]
        {
            let mut aside = target.as_os_str().to_owned();
            aside.push(".running");
            let aside = PathBuf::from(aside);
            let _ = fs::remove_file(&aside);
            fs::rename(target, &aside)?;
        }

        staged.persist(target).map_err(|e| e.error)?;

        #[cfg(unix)]
        if let Ok(handle) = fs::File::open(dir) {
            let _ = handle.sync_all();
        }
        Ok(())
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

pub fn backup_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Fail early when `target` cannot be replaced. The target is usually the
/// running executable and is never opened for writing; the directory it is
/// renamed into is tested instead.
pub fn check_write_permission(target: &Path) -> Result<()> {
    let denied = |source| Error::PermissionDenied {
        path: target.to_path_buf(),
        source,
    };

    let metadata = fs::metadata(target).map_err(denied)?;
    if metadata.permissions().readonly() {
        return Err(denied(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "executable is read-only",
        )));
    }
    tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(parent_dir(target))
        .map_err(denied)?;
    Ok(())
}

/// Back up `target`, replace it with `content` and roll back on failure.
pub fn apply_update<P: Replace>(target: &Path, content: &[u8], replacer: &P) -> Result<()> {
    let backup = backup_path(target);
    fs::copy(target, &backup).map_err(|source| Error::ApplyFailed {
        path: target.to_path_buf(),
        source,
    })?;
    tracing::debug!("Backed up {} to {}", target.display(), backup.display());

    match replacer.replace(target, content) {
        Ok(()) => {
            if let Err(e) = fs::remove_file(&backup) {
                tracing::warn!("Could not remove backup {}: {}", backup.display(), e);
            }
            Ok(())
        }
        Err(source) => {
            tracing::error!("Replacing {} failed, rolling back: {}", target.display(), source);
            match fs::rename(&backup, target) {
                Ok(()) => Err(Error::ApplyFailed {
                    path: target.to_path_buf(),
                    source,
                }),
                Err(rollback) => Err(Error::RollbackFailed {
                    path: target.to_path_buf(),
                    backup,
                    source: rollback,
                }),
            }
        }
    }
}

pub struct SelfUpdater<'a, R> {
    registry: &'a R,
    downloader: &'a Downloader,
    organization: String,
    repo: String,
    tool_name: String,
    current_version: String,
    executable: PathBuf,
    platform: PlatformInfo,
}

impl<'a, R: ReleaseRegistry> SelfUpdater<'a, R> {
    pub fn new(
        registry: &'a R,
        downloader: &'a Downloader,
        organization: &str,
        executable: PathBuf,
    ) -> Self {
        Self {
            registry,
            downloader,
            organization: organization.to_string(),
            repo: APP_NAME.to_string(),
            tool_name: APP_NAME.to_string(),
            current_version: env!("CARGO_PKG_VERSION").to_string(),
            executable,
            platform: get_system_info(),
        }
    }

    pub fn with_current_version(mut self, version: &str) -> Self {
        self.current_version = version.to_string();
        self
    }

    pub fn with_platform(mut self, platform: PlatformInfo) -> Self {
        self.platform = platform;
        self
    }

    pub async fn run(&self) -> Result<SelfUpdateOutcome> {
        self.run_with(&AtomicReplace).await
    }

    pub async fn run_with<P: Replace>(&self, replacer: &P) -> Result<SelfUpdateOutcome> {
        let release = self
            .registry
            .latest_release(&self.organization, &self.repo)
            .await?;

        let current = normalize_version(&self.current_version).to_string();
        let latest = normalize_version(&release.tag).to_string();

        if !is_outdated(&current, &latest)? {
            tracing::info!("{} is already updated to latest version", self.tool_name);
            return Ok(SelfUpdateOutcome::UpToDate { current, latest });
        }

        check_write_permission(&self.executable)?;

        let asset = resolve_asset(
            release.assets.iter().map(|a| (a.name.as_str(), a.id)),
            &self.tool_name,
            &self.platform.os,
            &self.platform.arch,
        )?;
        let url = self
            .registry
            .download_url(&self.organization, &self.repo, asset.id)
            .await?;

        let data = self.downloader.download_bytes(&url).await?;
        let content = executable_bytes(
            data,
            asset.format,
            &self.tool_name,
            parent_dir(&self.executable),
        )?;

        apply_update(&self.executable, &content, replacer)?;
        tracing::info!(
            "{} successfully updated v{} -> v{} (latest)",
            self.tool_name,
            current,
            latest
        );

        Ok(SelfUpdateOutcome::Updated {
            from: current,
            to: latest,
            notes: release.notes.filter(|n| !n.trim().is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingReplace;

    impl Replace for FailingReplace {
        fn replace(&self, target: &Path, _content: &[u8]) -> io::Result<()> {
            fs::write(target, b"half written")?;
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }
    }

    struct DestructiveReplace;

    impl Replace for DestructiveReplace {
        fn replace(&self, target: &Path, _content: &[u8]) -> io::Result<()> {
            fs::remove_file(backup_path(target))?;
            Err(io::Error::new(io::ErrorKind::Other, "device removed"))
        }
    }

    #[test]
    fn test_backup_path() {
        assert_eq!(
            backup_path(Path::new("/usr/local/bin/crtm")),
            PathBuf::from("/usr/local/bin/crtm.old")
        );
    }

    #[test]
    fn test_atomic_replace() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("crtm");
        fs::write(&target, b"old").unwrap();

        apply_update(&target, b"new", &AtomicReplace).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"new");
        assert!(!backup_path(&target).exists());

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&target).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn test_failed_replace_restores_original() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("crtm");
        fs::write(&target, b"original bytes").unwrap();

        let err = apply_update(&target, b"new", &FailingReplace).unwrap_err();
        assert!(matches!(err, Error::ApplyFailed { .. }));
        assert_eq!(fs::read(&target).unwrap(), b"original bytes");
        assert!(!backup_path(&target).exists());
    }

    #[test]
    fn test_lost_backup_is_rollback_failure() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("crtm");
        fs::write(&target, b"original").unwrap();

        let err = apply_update(&target, b"new", &DestructiveReplace).unwrap_err();
        assert!(matches!(err, Error::RollbackFailed { .. }));
    }

    #[test]
    fn test_write_permission_on_missing_target() {
        let dir = tempfile::tempdir().unwrap();
        let err = check_write_permission(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, Error::PermissionDenied { .. }));
    }

    #[test]
    fn test_write_permission_on_read_only_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("crtm");
        fs::write(&target, b"binary").unwrap();
        let mut perms = fs::metadata(&target).unwrap().permissions();
        perms.set_readonly(true);
        fs::set_permissions(&target, perms).unwrap();

        let err = check_write_permission(&target).unwrap_err();
        assert!(matches!(err, Error::PermissionDenied { .. }));
    }

    #[cfg(target_os = "linux")]
    mod running {
        use super::*;
        use std::process::{Child, Command};

        /// A real executable copied to `<dir>/crtm` and started, so the
        /// kernel holds its image busy for the duration of the test.
        struct RunningCopy {
            _dir: tempfile::TempDir,
            path: PathBuf,
            original: Vec<u8>,
            child: Child,
        }

        impl RunningCopy {
            fn start() -> Self {
                let dir = tempfile::tempdir().unwrap();
                let path = dir.path().join("crtm");
                fs::copy("/bin/sleep", &path).unwrap();
                make_executable(&path).unwrap();
                let original = fs::read(&path).unwrap();

                // another test thread may still hold the copy open across a fork
                let mut attempts = 0;
                let child = loop {
                    match Command::new(&path).arg("30").spawn() {
                        Ok(child) => break child,
                        Err(e) if e.raw_os_error() == Some(26) && attempts < 50 => {
                            attempts += 1;
                            std::thread::sleep(std::time::Duration::from_millis(20));
                        }
                        Err(e) => panic!("could not start {}: {}", path.display(), e),
                    }
                };

                Self {
                    _dir: dir,
                    path,
                    original,
                    child,
                }
            }
        }

        impl Drop for RunningCopy {
            fn drop(&mut self) {
                let _ = self.child.kill();
                let _ = self.child.wait();
            }
        }

        #[test]
        fn test_write_permission_on_running_executable() {
            let running = RunningCopy::start();
            assert!(fs::OpenOptions::new().write(true).open(&running.path).is_err());
            check_write_permission(&running.path).unwrap();
        }

        #[test]
        fn test_atomic_replace_of_running_executable() {
            let running = RunningCopy::start();
            check_write_permission(&running.path).unwrap();

            apply_update(&running.path, b"#!/bin/sh\necho crtm v9.9.9\n", &AtomicReplace).unwrap();
            assert_eq!(
                fs::read(&running.path).unwrap(),
                b"#!/bin/sh\necho crtm v9.9.9\n"
            );
            assert!(!backup_path(&running.path).exists());
        }

        #[test]
        fn test_in_place_write_of_running_executable_rolls_back() {
            let running = RunningCopy::start();

            let err = apply_update(&running.path, b"new", &FailingReplace).unwrap_err();
            assert!(matches!(err, Error::ApplyFailed { .. }));
            assert_eq!(fs::read(&running.path).unwrap(), running.original);
            assert!(!backup_path(&running.path).exists());
        }
    }
}
