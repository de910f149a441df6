/// Build metadata stamped by `build.rs`, reported by the CLI, logs and metrics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_COMMIT_HASH: &str = env!("BLOCKPIPE_GIT_COMMIT_HASH");
pub const BUILD_PROFILE: &str = env!("BLOCKPIPE_BUILD_PROFILE");
pub const VERSION_WITH_COMMIT: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "+",
    env!("BLOCKPIPE_GIT_COMMIT_HASH")
);

/// Returns the first 12 characters of the commit hash, or `"unknown"` when git metadata was
/// unavailable at build time.
pub fn short_commit_hash() -> &'static str {
    match GIT_COMMIT_HASH.get(..12) {
        Some(short) if GIT_COMMIT_HASH != "unknown" => short,
        _ => GIT_COMMIT_HASH,
    }
}

#[cfg(test)]
mod tests {
    use super::{short_commit_hash, GIT_COMMIT_HASH, VERSION, VERSION_WITH_COMMIT};

    #[test]
    fn version_with_commit_is_semver_plus_hash() {
        assert!(
            VERSION_WITH_COMMIT.starts_with(VERSION),
            "version string should begin with semver"
        );
        assert!(
            VERSION_WITH_COMMIT.ends_with(GIT_COMMIT_HASH),
            "version string should end with the commit hash"
        );
    }

    #[test]
    fn short_commit_hash_is_prefix_of_full_hash() {
        let short = short_commit_hash();
        assert!(!short.is_empty(), "short hash should never be empty");
        assert!(GIT_COMMIT_HASH.starts_with(short));
        assert!(short.len() <= 12);
    }
}
