use crate::types::PlatformInfo;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Appended to executable file names on this platform.
pub const EXE_SUFFIX: &str = std::env::consts::EXE_SUFFIX;

pub const UNKNOWN_MACHINE_ID: &str = "unknown";

/// Canonical location of a tool's executable inside an install directory.
pub fn executable_file(dir: &Path, tool_name: &str) -> PathBuf {
    dir.join(format!("{}{}", tool_name, EXE_SUFFIX))
}

/// OS and architecture tokens as they appear in release asset names.
pub fn get_system_info() -> PlatformInfo {
    PlatformInfo {
        os: normalize_os(std::env::consts::OS),
        arch: normalize_arch(std::env::consts::ARCH),
    }
}

pub fn normalize_os(os: &str) -> String {
    match os {
        "macos" => "darwin".to_string(),
        _ => os.to_string(),
    }
}

pub fn normalize_arch(arch: &str) -> String {
    match arch {
        "x86_64" => "amd64".to_string(),
        "aarch64" => "arm64".to_string(),
        "x86" => "386".to_string(),
        _ => arch.to_string(),
    }
}

/// Stable per-host identifier, hashed with the application name so the raw
/// host id never leaves the machine. Falls back to [`UNKNOWN_MACHINE_ID`].
pub fn machine_id(app_id: &str) -> String {
    match read_host_id() {
        Some(id) => protect(app_id, &id),
        None => {
            tracing::debug!("Could not determine machine id");
            UNKNOWN_MACHINE_ID.to_string()
        }
    }
}

fn protect(app_id: &str, host_id: &str) -> String {
    let digest = Sha256::digest(format!("{}:{}", app_id, host_id).as_bytes());
    format!("{:x}", digest)
}

#[cfg(target_os = "linux")]
fn read_host_id() -> Option<String> {
    ["/etc/machine-id", "/var/lib/dbus/machine-id"]
        .iter()
        .filter_map(|path| std::fs::read_to_string(path).ok())
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}

#[cfg(target_os = "macos")]
fn read_host_id() -> Option<String> {
    let output = std::process::Command::new("ioreg")
        .args(["-rd1", "-c", "IOPlatformExpertDevice"])
        .output()
        .ok()?;
    let text = String::from_utf8_lossy(&output.stdout);
    text.lines()
        .find(|line| line.contains("IOPlatformUUID"))
        .and_then(|line| line.split('"').nth(3))
        .map(|s| s.to_string())
}

#[cfg(windows)]
fn read_host_id() -> Option<String> {
    let output = std::process::Command::new("reg")
        .args([
            "query",
            r"HKLM\SOFTWARE\Microsoft\Cryptography",
            "/v",
            "MachineGuid",
        ])
        .output()
        .ok()?;
    let text = String::from_utf8_lossy(&output.stdout);
    text.lines()
        .find(|line| line.contains("MachineGuid"))
        .and_then(|line| line.split_whitespace().last())
        .map(|s| s.to_string())
}

#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
fn read_host_id() -> Option<String> {
    None
}
