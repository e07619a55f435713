//! Error taxonomy for the install/update pipeline and self-update.

use std::path::PathBuf;
use std::time::Duration;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{tool} is already installed at {path}")]
    AlreadyInstalled { tool: String, path: PathBuf },

    #[error("{tool} is not installed at {path}")]
    ToolNotFound { tool: String, path: PathBuf },

    #[error("{tool} is already up to date ({version})")]
    AlreadyUpToDate { tool: String, version: String },

    #[error("no release asset of {tool} found for {os}/{arch}")]
    NoAssetFoundForPlatform {
        tool: String,
        os: String,
        arch: String,
    },

    #[error("registry rate limit exceeded, retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("registry request for {resource} failed: {reason}")]
    Registry { resource: String, reason: String },

    #[error("download of {url} failed: {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("extraction failed: {0}")]
    ExtractionFailed(#[from] ExtractionError),

    #[error("could not parse '{version}' as a semantic version: {source}")]
    VersionParseFailed {
        version: String,
        #[source]
        source: semver::Error,
    },

    #[error("insufficient permission to replace {path}: {source}")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not apply update to {path}, previous executable restored: {source}")]
    ApplyFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("rollback of {path} from {backup} failed: {source}")]
    RollbackFailed {
        path: PathBuf,
        backup: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("archive entry '{entry}' escapes the target directory")]
    PathTraversalRejected { entry: String },

    #[error("no executable named {tool} in archive")]
    ExecutableNotFound { tool: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<zip::result::ZipError> for ExtractionError {
    fn from(err: zip::result::ZipError) -> Self {
        // zip archives are always read from an in-memory buffer, so any
        // reader failure is a property of the archive itself
        ExtractionError::CorruptArchive(err.to_string())
    }
}
