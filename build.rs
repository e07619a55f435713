use std::env;
use std::process::Command;

fn capture(program: &str, args: &[&str]) -> Option<String> {
    Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .and_then(|s| s.lines().next().map(|line| line.trim().to_string()))
        .filter(|s| !s.is_empty())
}

fn main() {
    let commit = capture("git", &["rev-parse", "--short", "HEAD"])
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=CRTM_GIT_COMMIT={}", commit);

    if let Some(tag) = capture("git", &["tag", "--points-at", "HEAD"]) {
        println!("cargo:rustc-env=CRTM_GIT_TAG={}", tag);
    }

    // reported by the startup version check
    let rustc = env::var("RUSTC").unwrap_or_else(|_| "rustc".to_string());
    let rustc_version =
        capture(&rustc, &["--version"]).unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=CRTM_RUSTC_VERSION={}", rustc_version);

    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/");
}
