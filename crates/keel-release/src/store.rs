//! ReleaseStore — the release catalog and its pointers.
//!
//! Provides create/commit/abort over `releases/<version>/` directories and
//! the `current`/`previous` pointers. Commit writes the release-date marker
//! and swaps the pointers. Pruning is split in two so a caller can tear down
//! whatever runs from an expired release before its directory goes:
//! `expired` names the releases outside the retention window and
//! `remove_releases` deletes them.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Serialize;
use tracing::{debug, info, warn};

use keel_core::{DEFAULT_RETAIN, MIN_RETAIN, Release, Version, project_name};

use crate::error::{StoreError, StoreResult};
use crate::layout::{self, CURRENT, DEFINITION_FILE, PREVIOUS, RELEASE_DATE_FILE};

/// Catalog entry as seen by `list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseInfo {
    pub version: Version,
    pub dir: PathBuf,
    /// Creation instant: mtime of the definition file, which is written once.
    #[serde(skip)]
    pub created: SystemTime,
    /// Contents of the release-date marker; `None` for uncommitted releases.
    pub committed_at: Option<String>,
}

/// Release catalog rooted at a working directory.
#[derive(Debug, Clone)]
pub struct ReleaseStore {
    workdir: PathBuf,
    retain: usize,
}

impl ReleaseStore {
    /// Open (or create) the catalog under `workdir`.
    pub fn open(workdir: &Path) -> StoreResult<Self> {
        let releases = layout::releases_dir(workdir);
        fs::create_dir_all(&releases).map_err(StoreError::io(&releases))?;
        debug!(workdir = %workdir.display(), "release store opened");
        Ok(Self::open_existing(workdir))
    }

    /// Open the catalog under `workdir` without creating anything, for
    /// readers. A missing `releases/` directory reads as an empty catalog.
    pub fn open_existing(workdir: &Path) -> Self {
        Self {
            workdir: workdir.to_path_buf(),
            retain: DEFAULT_RETAIN,
        }
    }

    /// Number of releases kept by pruning, raised to [`MIN_RETAIN`] if lower.
    /// The `current` and `previous` targets are always kept regardless.
    pub fn with_retain(mut self, retain: usize) -> Self {
        self.retain = retain.max(MIN_RETAIN);
        self
    }

    pub fn retain(&self) -> usize {
        self.retain
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Handle for `version`, whether or not it exists on disk.
    pub fn release(&self, version: &Version) -> Release {
        let dir = layout::release_dir(&self.workdir, version);
        Release {
            version: version.clone(),
            definition: dir.join(DEFINITION_FILE),
            dir,
            project: project_name(&self.workdir, version),
        }
    }

    pub fn exists(&self, version: &Version) -> bool {
        layout::release_dir(&self.workdir, version).is_dir()
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Materialize `releases/<version>/` with its definition file.
    ///
    /// Fails with `ReleaseExists` if the directory is already there.
    pub fn create_release(&self, version: &Version, definition: &str) -> StoreResult<Release> {
        let release = self.release(version);
        match fs::create_dir(&release.dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StoreError::ReleaseExists(version.to_string()));
            }
            Err(e) => return Err(StoreError::io(&release.dir)(e)),
        }

        atomic_write(&release.definition, definition.as_bytes())?;
        make_read_only(&release.definition);
        info!(%version, dir = %release.dir.display(), "release created");
        Ok(release)
    }

    /// Promote `version` to current, recording `previous` if given.
    pub fn commit(&self, version: &Version, previous: Option<&Version>) -> StoreResult<()> {
        if !self.exists(version) {
            return Err(StoreError::ReleaseNotFound(version.to_string()));
        }

        let marker = layout::release_dir(&self.workdir, version).join(RELEASE_DATE_FILE);
        let stamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        atomic_write(&marker, format!("{stamp}\n").as_bytes())?;

        // `previous` first: an interruption between the two swaps leaves
        // `current` on the old release, which is still consistent.
        if let Some(prev) = previous {
            self.swap_pointer(PREVIOUS, prev)?;
        }
        self.swap_pointer(CURRENT, version)?;
        info!(%version, previous = ?previous.map(Version::as_str), "release committed");
        Ok(())
    }

    /// Delete a release that never became current.
    pub fn abort_release(&self, version: &Version) -> StoreResult<()> {
        if self.delete_release(version)? {
            info!(%version, "release aborted");
        }
        Ok(())
    }

    /// Remove `releases/<version>/` unless a pointer targets it. Returns
    /// whether anything was deleted.
    fn delete_release(&self, version: &Version) -> StoreResult<bool> {
        if self.read_current()?.as_ref() == Some(version) {
            return Err(StoreError::ReleaseInUse(version.to_string(), CURRENT));
        }
        if self.read_previous()?.as_ref() == Some(version) {
            return Err(StoreError::ReleaseInUse(version.to_string(), PREVIOUS));
        }

        let dir = layout::release_dir(&self.workdir, version);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(&dir)(e)),
        }
    }

    // ── Pointers ───────────────────────────────────────────────────

    /// The live release, or `None` before the first successful deployment.
    pub fn read_current(&self) -> StoreResult<Option<Version>> {
        self.read_pointer(CURRENT)
    }

    pub fn read_previous(&self) -> StoreResult<Option<Version>> {
        self.read_pointer(PREVIOUS)
    }

    fn read_pointer(&self, name: &str) -> StoreResult<Option<Version>> {
        let path = self.workdir.join(name);
        let target = match read_pointer_target(&path) {
            Ok(target) => target,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&path)(e)),
        };

        let bad = |reason: String| StoreError::BadPointer {
            path: path.clone(),
            reason,
        };
        let name = target
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| bad(format!("target {} has no file name", target.display())))?;
        Version::parse(name).map(Some).map_err(|e| bad(e.to_string()))
    }

    /// Repoint `name` at `version` with a single rename.
    fn swap_pointer(&self, name: &str, version: &Version) -> StoreResult<()> {
        let path = self.workdir.join(name);
        let target = layout::pointer_target(version);
        replace_pointer(&self.workdir, &path, &target)?;
        debug!(pointer = name, %version, "pointer swapped");
        Ok(())
    }

    // ── Catalog ────────────────────────────────────────────────────

    /// All release directories, oldest first.
    pub fn list(&self) -> StoreResult<Vec<ReleaseInfo>> {
        let root = layout::releases_dir(&self.workdir);
        let entries = match fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&root)(e)),
        };
        let mut releases = Vec::new();
        for entry in entries {
            let entry = entry.map_err(StoreError::io(&root))?;
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            // Names that are not valid versions were not written by keel.
            let Some(version) = entry
                .file_name()
                .to_str()
                .and_then(|n| Version::parse(n).ok())
            else {
                continue;
            };

            let created = fs::metadata(dir.join(DEFINITION_FILE))
                .or_else(|_| fs::metadata(&dir))
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            let committed_at = fs::read_to_string(dir.join(RELEASE_DATE_FILE))
                .ok()
                .map(|s| s.trim().to_string());

            releases.push(ReleaseInfo {
                version,
                dir,
                created,
                committed_at,
            });
        }
        releases.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.version.cmp(&b.version)));
        Ok(releases)
    }

    /// Releases outside the retention window, oldest first: everything but
    /// the `retain` newest, never including the targets of `current` or
    /// `previous`. An unreadable catalog yields nothing to prune.
    pub fn expired(&self) -> Vec<Version> {
        let protected: Vec<Version> = [self.read_current(), self.read_previous()]
            .into_iter()
            .filter_map(|p| match p {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "unreadable pointer while pruning");
                    None
                }
            })
            .collect();

        let releases = match self.list() {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "cannot list releases; skipping prune");
                return Vec::new();
            }
        };

        let keep_from = releases.len().saturating_sub(self.retain);
        releases
            .into_iter()
            .take(keep_from)
            .map(|r| r.version)
            .filter(|v| !protected.contains(v))
            .collect()
    }

    /// Delete the directories of `versions`. Best-effort: a failure is
    /// logged and skipped, and pointer targets are never touched. Returns
    /// the versions actually removed.
    pub fn remove_releases(&self, versions: &[Version]) -> Vec<Version> {
        let mut removed = Vec::new();
        for version in versions {
            match self.delete_release(version) {
                Ok(_) => {
                    debug!(%version, "pruned release");
                    removed.push(version.clone());
                }
                Err(e) => warn!(%version, error = %e, "failed to prune release"),
            }
        }
        if !removed.is_empty() {
            info!(count = removed.len(), "pruned old releases");
        }
        removed
    }

    /// Delete every expired release directory. See [`Self::expired`].
    pub fn prune(&self) -> Vec<Version> {
        self.remove_releases(&self.expired())
    }
}

/// Write `data` to `path` via a tempfile in the same directory.
fn atomic_write(path: &Path, data: &[u8]) -> StoreResult<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(StoreError::io(dir))?;
    tmp.write_all(data).map_err(StoreError::io(path))?;
    tmp.persist(path).map_err(|e| StoreError::io(path)(e.error))?;
    Ok(())
}

fn make_read_only(path: &Path) {
    let result = fs::metadata(path).and_then(|m| {
        let mut perms = m.permissions();
        perms.set_readonly(true);
        fs::set_permissions(path, perms)
    });
    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "could not mark definition read-only");
    }
}

#[cfg(unix)]
fn read_pointer_target(path: &Path) -> std::io::Result<PathBuf> {
    fs::read_link(path)
}

#[cfg(unix)]
fn replace_pointer(workdir: &Path, path: &Path, target: &Path) -> StoreResult<()> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = workdir.join(format!(".{name}.{}.tmp", std::process::id()));

    // Leftover from an interrupted swap by a dead process with our pid.
    let _ = fs::remove_file(&tmp);
    std::os::unix::fs::symlink(target, &tmp).map_err(StoreError::io(&tmp))?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(StoreError::io(path)(e));
    }
    Ok(())
}

#[cfg(not(unix))]
fn read_pointer_target(path: &Path) -> std::io::Result<PathBuf> {
    fs::read_to_string(path).map(|s| PathBuf::from(s.trim()))
}

#[cfg(not(unix))]
fn replace_pointer(_workdir: &Path, path: &Path, target: &Path) -> StoreResult<()> {
    atomic_write(path, target.to_string_lossy().as_bytes())
}
