use crtm::types::PlatformInfo;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const ORG: &str = "chainreactors";

// Each test file pulls in the helpers it needs; the rest would warn.
#[allow(dead_code)]
pub fn linux_amd64() -> PlatformInfo {
    PlatformInfo {
        os: "linux".to_string(),
        arch: "amd64".to_string(),
    }
}

/// A shell script standing in for a tool that answers `--version`.
#[allow(dead_code)]
pub fn version_script(tool: &str, version: &str) -> Vec<u8> {
    format!("#!/bin/sh\necho \"{} version v{}\"\n", tool, version).into_bytes()
}

#[allow(dead_code)]
pub fn write_executable(path: &Path, content: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }
}

/// Gzip'd tarball of regular files. Names are written raw into the header so
/// hostile paths reach the archive unchanged.
#[allow(dead_code)]
pub fn tar_gz(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.as_gnu_mut().unwrap().name[..name.len()].copy_from_slice(name.as_bytes());
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder.append(&header, *data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// One asset of a mocked release: name, id and downloadable body.
pub struct MockAsset<'a> {
    pub name: &'a str,
    pub id: u64,
    pub body: &'a [u8],
}

/// Mount the latest-release, asset and download endpoints of `repo`.
/// Each asset body must be downloaded exactly `downloads` times.
#[allow(dead_code)]
pub async fn mock_release(
    server: &MockServer,
    repo: &str,
    tag: &str,
    notes: Option<&str>,
    assets: &[MockAsset<'_>],
    downloads: u64,
) {
    let listed: Vec<_> = assets
        .iter()
        .map(|a| json!({ "name": a.name, "id": a.id }))
        .collect();

    Mock::given(method("GET"))
        .and(path(format!("/repos/{}/{}/releases/latest", ORG, repo)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tag_name": tag,
            "body": notes,
            "assets": listed,
        })))
        .mount(server)
        .await;

    for asset in assets {
        let download_path = format!("/download/{}/{}", repo, asset.name);
        Mock::given(method("GET"))
            .and(path(format!("/repos/{}/{}/releases/assets/{}", ORG, repo, asset.id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": asset.id,
                "name": asset.name,
                "browser_download_url": format!("{}{}", server.uri(), download_path),
            })))
            .mount(server)
            .await;

        Mock::given(method("GET"))
            .and(path(download_path))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(asset.body.to_vec()))
            .expect(downloads)
            .mount(server)
            .await;
    }
}

#[allow(dead_code)]
pub async fn mock_missing_release(server: &MockServer, repo: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/repos/{}/{}/releases/latest", ORG, repo)))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
}

/// Names of the entries directly inside `dir`, sorted.
#[allow(dead_code)]
pub fn dir_entries(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

/// Isolated home, config and install directory for running the binary.
#[allow(dead_code)]
pub struct TestContext {
    pub _temp_dir: TempDir,
    pub config_path: PathBuf,
    pub bin_dir: PathBuf,
    pub bin_path: PathBuf,
}

#[allow(dead_code)]
impl TestContext {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("config.yaml");
        let bin_dir = temp_dir.path().join("bin");
        let bin_path = PathBuf::from(env!("CARGO_BIN_EXE_crtm"));

        Self {
            _temp_dir: temp_dir,
            config_path,
            bin_dir,
            bin_path,
        }
    }

    pub fn cmd(&self) -> Command {
        let mut cmd = Command::new(&self.bin_path);
        cmd.env("CRTM_CONFIG", &self.config_path);
        cmd.env("CRTM_BINARY_PATH", &self.bin_dir);
        cmd.env("CRTM_DISABLE_UPDATE_CHECK", "1");
        cmd.env("HOME", self._temp_dir.path());
        cmd.env_remove("RUST_LOG");
        cmd
    }
}

#[allow(dead_code)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: std::process::ExitStatus,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            status: output.status,
        }
    }
}

#[allow(dead_code)]
impl CommandOutput {
    pub fn assert_success(&self) -> &Self {
        if !self.status.success() {
            panic!(
                "Command failed with status {:?}\nstdout: {}\nstderr: {}",
                self.status.code(),
                self.stdout,
                self.stderr
            );
        }
        self
    }

    pub fn assert_stdout_contains(&self, text: &str) -> &Self {
        assert!(
            self.stdout.contains(text),
            "Stdout did not contain '{}'\nActual stdout: {}",
            text,
            self.stdout
        );
        self
    }
}
