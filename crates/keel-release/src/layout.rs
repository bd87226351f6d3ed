//! File and directory names inside a working directory.

use std::path::{Path, PathBuf};

use keel_core::Version;

/// Lock-guard file. Its contents are never read.
pub const LOCK_FILE: &str = ".deploy.lock";

/// Catalog root, one subdirectory per release.
pub const RELEASES_DIR: &str = "releases";

/// Pointer to the live release.
pub const CURRENT: &str = "current";

/// Pointer to the release `current` superseded.
pub const PREVIOUS: &str = "previous";

/// Resolved application definition inside a release directory.
pub const DEFINITION_FILE: &str = "docker-compose.yml";

/// Commit marker inside a release directory (RFC 3339 timestamp).
pub const RELEASE_DATE_FILE: &str = "RELEASE_DATE";

pub fn lock_path(workdir: &Path) -> PathBuf {
    workdir.join(LOCK_FILE)
}

pub fn releases_dir(workdir: &Path) -> PathBuf {
    workdir.join(RELEASES_DIR)
}

pub fn release_dir(workdir: &Path, version: &Version) -> PathBuf {
    releases_dir(workdir).join(version.as_str())
}

/// Pointer target as stored in the link: relative to the workdir so the
/// whole tree can be moved.
pub fn pointer_target(version: &Version) -> PathBuf {
    Path::new(RELEASES_DIR).join(version.as_str())
}
