//! Shared types used across keel crates.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ValidationError;

/// Default number of health polls before a release is declared unhealthy.
pub const DEFAULT_MAX_RETRIES: u32 = 30;

/// Default seconds between two health polls.
pub const DEFAULT_INTERVAL_SECS: u64 = 5;

/// Default number of release directories kept after a commit.
pub const DEFAULT_RETAIN: usize = 3;

/// Fewest release directories a store keeps: the live release and the
/// one it would roll back to.
pub const MIN_RETAIN: usize = 2;

/// Bytes of the workdir/version digest appended to project names.
const PROJECT_DIGEST_BYTES: usize = 6;

// ── Version ───────────────────────────────────────────────────────

static VERSION_RE: OnceLock<Regex> = OnceLock::new();

fn version_re() -> &'static Regex {
    VERSION_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,127}$").expect("static version pattern")
    })
}

/// A release identifier, safe to use as a single path component.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version(String);

impl Version {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        if raw == "." || raw == ".." || !version_re().is_match(raw) {
            return Err(ValidationError::InvalidVersion(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Version {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.0
    }
}

// ── Release ───────────────────────────────────────────────────────

/// Handle to one materialized release in the catalog.
///
/// The engine uses `project` and `definition` to address the release's
/// containers; the store owns `dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub version: Version,
    pub dir: PathBuf,
    pub definition: PathBuf,
    pub project: String,
}

/// Container project name for a release:
/// `<workdir-basename>-<version>-<digest>`.
///
/// The readable part is lowercased with anything outside `[a-z0-9_-]`
/// replaced by `-`, which is lossy. The trailing digest is taken over the
/// exact workdir path and version, so two deployments never share a
/// project even when their readable parts collide (`V2` and `v2`, or the
/// same app under two workdirs).
pub fn project_name(workdir: &Path, version: &Version) -> String {
    let base = workdir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "keel".to_string());

    let raw = format!("{base}-{version}");
    let mut name: String = raw
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();

    // Compose requires a leading letter or digit.
    if !name.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        name.insert_str(0, "keel");
    }

    name.push('-');
    name.push_str(&project_digest(workdir, version));
    name
}

fn project_digest(workdir: &Path, version: &Version) -> String {
    let mut hasher = Sha256::new();
    hasher.update(workdir.as_os_str().as_encoded_bytes());
    hasher.update([0u8]);
    hasher.update(version.as_str().as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..PROJECT_DIGEST_BYTES])
}

// ── Health ────────────────────────────────────────────────────────

/// Health of a probe-target container as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// The image declares no health signal.
    Unsupported,
    Starting,
    Healthy,
    Unhealthy,
    Stopped,
    /// Container missing or status not reported yet.
    Absent,
}

impl HealthStatus {
    /// Map an engine status string (`healthy`, `starting`, ...) to a status.
    /// Unrecognised strings are treated as absent.
    pub fn from_engine(raw: &str) -> Self {
        match raw.trim() {
            "healthy" => Self::Healthy,
            "starting" => Self::Starting,
            "unhealthy" => Self::Unhealthy,
            "stopped" | "exited" | "dead" => Self::Stopped,
            "none" | "unsupported" => Self::Unsupported,
            _ => Self::Absent,
        }
    }

    pub fn is_healthy(self) -> bool {
        self == Self::Healthy
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unsupported => "unsupported",
            Self::Starting => "starting",
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Stopped => "stopped",
            Self::Absent => "absent",
        };
        f.write_str(s)
    }
}

// ── Plan ──────────────────────────────────────────────────────────

/// Everything a deployment needs at run time, fixed at generation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployPlan {
    pub version: Version,
    pub workdir: PathBuf,
    /// Service whose health stands in for the whole release.
    pub probe: String,
    pub max_retries: u32,
    pub interval_secs: u64,
    pub retain: usize,
    pub pin_digests: bool,
    /// Fully resolved application definition, embedded verbatim.
    pub definition: String,
    /// Hex SHA-256 of `definition`.
    pub definition_sha256: String,
    /// Unix timestamp of plan compilation.
    pub compiled_at: u64,
}
