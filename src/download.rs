use crate::error::{Error, ExtractionError, Result};
use crate::platform;
use crate::types::{Asset, AssetFormat};
use flate2::read::GzDecoder;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tar::Archive;

/// Prefix of every temporary file crtm creates next to its targets.
pub const TEMP_PREFIX: &str = ".crtm-";

/// Upper bound on buffer space reserved from a size hint.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// Fetches release assets. The client timeout bounds whole downloads.
pub struct Downloader {
    client: reqwest::Client,
    show_progress: bool,
}

impl Downloader {
    pub fn new(timeout: Duration, show_progress: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("crtm/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::DownloadFailed {
                url: String::new(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            show_progress,
        })
    }

    /// Download `asset` from `url` and materialize it as the tool's
    /// executable inside `dest_dir`.
    pub async fn install_asset(
        &self,
        url: &str,
        asset: &Asset,
        tool_name: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf> {
        fs::create_dir_all(dest_dir)?;

        let path = match asset.format {
            AssetFormat::Raw => {
                let target = platform::executable_file(dest_dir, tool_name);
                self.download_file(url, &target).await?;
                make_executable(&target)?;
                target
            }
            AssetFormat::TarGz => {
                let data = self.download_bytes(url).await?;
                tracing::info!("Extracting {}...", asset.name);
                extract_tar_gz(Cursor::new(data), tool_name, dest_dir)?
            }
            AssetFormat::Zip => {
                let data = self.download_bytes(url).await?;
                tracing::info!("Extracting {}...", asset.name);
                extract_zip(&data, tool_name, dest_dir)?
            }
        };

        tracing::info!("Placed executable at {}", path.display());
        Ok(path)
    }

    /// Stream the body of `url` into `local_path`, truncating it first.
    pub async fn download_file(&self, url: &str, local_path: &Path) -> Result<()> {
        let response = self.get(url).await?;
        let label = local_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let pb = self.progress_bar(response.content_length().unwrap_or(0), &label);

        let mut file = fs::File::create(local_path)?;
        let mut downloaded = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| download_failed(url, e))?;
            file.write_all(&chunk)?;
            downloaded += chunk.len() as u64;
            pb.set_position(downloaded);
        }
        file.flush()?;

        pb.finish_with_message("Download complete");
        Ok(())
    }

    /// Buffer the whole body of `url` in memory.
    pub async fn download_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.get(url).await?;
        let total_size = response.content_length().unwrap_or(0);
        let label = url.rsplit('/').next().unwrap_or(url).to_string();
        let pb = self.progress_bar(total_size, &label);

        let mut data = Vec::with_capacity(preallocation(total_size));
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| download_failed(url, e))?;
            data.extend_from_slice(&chunk);
            pb.set_position(data.len() as u64);
        }

        pb.finish_with_message("Download complete");
        Ok(data)
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        tracing::info!("Downloading {}...", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| download_failed(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::DownloadFailed {
                url: url.to_string(),
                reason: format!("unexpected status {}", status),
            });
        }
        Ok(response)
    }

    fn progress_bar(&self, total_size: u64, label: &str) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total_size);
        if let Ok(style) = ProgressStyle::default_bar().template(
            "{msg} {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
        ) {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_message(format!("Downloading {}", label));
        pb
    }
}

fn download_failed(url: &str, err: reqwest::Error) -> Error {
    Error::DownloadFailed {
        url: url.to_string(),
        reason: err.to_string(),
    }
}

/// Decompress a gzip'd tarball and write the first file entry named after
/// the tool to its canonical location in `dest_dir`.
pub fn extract_tar_gz<R: Read>(
    reader: R,
    tool_name: &str,
    dest_dir: &Path,
) -> Result<PathBuf, ExtractionError> {
    let mut archive = Archive::new(GzDecoder::new(reader));

    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let entry_path = entry.path().map_err(corrupt)?.into_owned();
        let destination = resolve_entry(dest_dir, &entry_path)?;
        if !matches_tool(&entry_path, tool_name) {
            continue;
        }

        tracing::debug!(
            "Found {} in archive at {} (would unpack to {})",
            tool_name,
            entry_path.display(),
            destination.display()
        );
        let mut content = Vec::new();
        entry.read_to_end(&mut content).map_err(corrupt)?;
        return Ok(write_executable(&content, dest_dir, tool_name)?);
    }

    Err(ExtractionError::ExecutableNotFound {
        tool: tool_name.to_string(),
    })
}

/// Same as [`extract_tar_gz`] for a zip archive held in memory.
pub fn extract_zip(
    data: &[u8],
    tool_name: &str,
    dest_dir: &Path,
) -> Result<PathBuf, ExtractionError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data))?;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }

        let entry_path = PathBuf::from(file.name());
        let destination = resolve_entry(dest_dir, &entry_path)?;
        if !matches_tool(&entry_path, tool_name) {
            continue;
        }

        tracing::debug!(
            "Found {} in archive at {} (would unpack to {})",
            tool_name,
            entry_path.display(),
            destination.display()
        );
        let mut content = Vec::with_capacity(preallocation(file.size()));
        file.read_to_end(&mut content).map_err(corrupt)?;
        return Ok(write_executable(&content, dest_dir, tool_name)?);
    }

    Err(ExtractionError::ExecutableNotFound {
        tool: tool_name.to_string(),
    })
}

/// Capacity to reserve for a body of `hint` bytes. Sizes come from servers
/// and archive headers, so the reservation is capped.
fn preallocation(hint: u64) -> usize {
    usize::try_from(hint.min(MAX_PREALLOC)).unwrap_or(0)
}

/// The tool's executable content from a downloaded asset. Archives are
/// unpacked in a `TEMP_PREFIX` directory created inside `scratch_dir`.
pub fn executable_bytes(
    data: Vec<u8>,
    format: AssetFormat,
    tool_name: &str,
    scratch_dir: &Path,
) -> Result<Vec<u8>> {
    if format == AssetFormat::Raw {
        return Ok(data);
    }

    let scratch = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempdir_in(scratch_dir)?;
    let path = match format {
        AssetFormat::Zip => extract_zip(&data, tool_name, scratch.path())?,
        _ => extract_tar_gz(Cursor::new(data), tool_name, scratch.path())?,
    };
    Ok(fs::read(path)?)
}

/// Destination an archive entry would unpack to. Rejects anything but plain
/// relative paths, so the result always lies strictly inside `dest_dir`.
fn resolve_entry(dest_dir: &Path, entry: &Path) -> Result<PathBuf, ExtractionError> {
    let mut relative = PathBuf::new();
    for component in entry.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(path_traversal(entry));
            }
        }
    }

    if relative.as_os_str().is_empty() {
        return Err(path_traversal(entry));
    }
    Ok(dest_dir.join(relative))
}

fn path_traversal(entry: &Path) -> ExtractionError {
    tracing::error!("Rejecting archive entry outside target: {}", entry.display());
    ExtractionError::PathTraversalRejected {
        entry: entry.to_string_lossy().to_string(),
    }
}

/// Entry base name, minus a trailing `.exe`, equals the tool name.
fn matches_tool(entry: &Path, tool_name: &str) -> bool {
    let Some(file_name) = entry.file_name() else {
        return false;
    };
    let file_name = file_name.to_string_lossy().to_lowercase();
    let stem = file_name.strip_suffix(".exe").unwrap_or(&file_name);
    stem == tool_name.to_lowercase()
}

fn write_executable(content: &[u8], dest_dir: &Path, tool_name: &str) -> std::io::Result<PathBuf> {
    fs::create_dir_all(dest_dir)?;
    let target = platform::executable_file(dest_dir, tool_name);
    let mut file = fs::File::create(&target)?;
    file.write_all(content)?;
    file.flush()?;
    drop(file);
    make_executable(&target)?;
    Ok(target)
}

pub fn make_executable(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms)?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Delete leftover `TEMP_PREFIX` files and directories directly inside `dir`.
/// Returns how many entries were removed.
pub fn remove_stale_temp_files(dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        if !entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
            continue;
        }
        let path = entry.path();
        let result = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => tracing::debug!("Could not remove {}: {}", path.display(), e),
        }
    }
    removed
}

fn corrupt(err: std::io::Error) -> ExtractionError {
    ExtractionError::CorruptArchive(err.to_string())
}
