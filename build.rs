use std::process::Command;

/// Run git and return trimmed stdout, or `None` outside a repository.
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn main() {
    let version = env!("CARGO_PKG_VERSION");
    let build_date = chrono::Utc::now().format("%Y-%m-%d");

    // e.g. "0.1.0 (3f2a9c1, 2026-10-18)"
    let long_version = match git(&["rev-parse", "--short", "HEAD"]) {
        Some(hash) => format!("{} ({}, {})", version, hash, build_date),
        None => format!("{} ({})", version, build_date),
    };

    println!("cargo:rustc-env=TCPTUNNEL_VERSION={}", long_version);
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs");
}
