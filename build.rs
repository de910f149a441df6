use std::process::Command;

fn main() {
    println!("cargo:rerun-if-env-changed=SOURCE_COMMIT_HASH");
    println!("cargo:rerun-if-changed=.git/HEAD");

    println!(
        "cargo:rustc-env=BLOCKPIPE_GIT_COMMIT_HASH={}",
        resolve_commit_hash()
    );
    println!(
        "cargo:rustc-env=BLOCKPIPE_BUILD_PROFILE={}",
        std::env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string())
    );
}

/// `SOURCE_COMMIT_HASH` wins so container builds without a `.git` directory still stamp a
/// real commit.
fn resolve_commit_hash() -> String {
    if let Ok(explicit) = std::env::var("SOURCE_COMMIT_HASH") {
        let explicit = explicit.trim();
        if !explicit.is_empty() {
            return explicit.to_string();
        }
    }

    Command::new("git")
        .args(["rev-parse", "--verify", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|hash| hash.trim().to_string())
        .filter(|hash| !hash.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
