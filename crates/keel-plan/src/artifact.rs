//! Self-contained deployment executables.
//!
//! An artifact is a keel runtime binary with a plan appended:
//!
//! ```text
//! ┌──────────────────┬──────────────────┬────────────┬──────────┐
//! │ runtime binary   │ plan (JSON)      │ len u64 LE │ KEELPLN1 │
//! └──────────────────┴──────────────────┴────────────┴──────────┘
//! ```
//!
//! The runtime checks its own file for the trailer at startup. Appended data
//! is ignored by the OS loader, so the binary runs unchanged.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use keel_core::DeployPlan;

use crate::compile::{sha256_hex, verify};
use crate::error::{PlanError, PlanResult};

/// Marker closing every artifact.
pub const MAGIC: &[u8; 8] = b"KEELPLN1";

const TRAILER_LEN: u64 = 16;

/// Plans larger than this are treated as corrupt rather than read.
const MAX_PLAN_LEN: u64 = 64 * 1024 * 1024;

/// A written artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactInfo {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub sha256: String,
}

/// Location of an embedded plan inside a file.
struct Embedded {
    /// Length of the runtime part, i.e. offset of the plan.
    runtime_len: u64,
    plan_len: u64,
}

/// Write `runtime` plus `plan` to a fresh file in the temp directory.
///
/// If `runtime` already carries a plan (it is itself an artifact), that plan
/// is dropped first so artifacts never nest.
pub fn write_artifact(runtime: &Path, plan: &DeployPlan) -> PlanResult<ArtifactInfo> {
    write_artifact_in(&std::env::temp_dir(), runtime, plan)
}

pub fn write_artifact_in(dir: &Path, runtime: &Path, plan: &DeployPlan) -> PlanResult<ArtifactInfo> {
    let payload = serde_json::to_vec(plan)?;

    let mut source = File::open(runtime).map_err(PlanError::io(runtime))?;
    let runtime_len = match locate(&mut source, runtime)? {
        Some(embedded) => {
            debug!(runtime = %runtime.display(), "runtime carries a plan; replacing it");
            embedded.runtime_len
        }
        None => source.metadata().map_err(PlanError::io(runtime))?.len(),
    };
    source.seek(SeekFrom::Start(0)).map_err(PlanError::io(runtime))?;

    let mut out = tempfile::Builder::new()
        .prefix(&format!("keel-deploy-{}-", plan.version))
        .tempfile_in(dir)
        .map_err(PlanError::io(dir))?;
    let out_path = out.path().to_path_buf();

    let copied = io::copy(&mut (&mut source).take(runtime_len), out.as_file_mut())
        .map_err(PlanError::io(&out_path))?;
    if copied != runtime_len {
        return Err(PlanError::Corrupt {
            path: runtime.to_path_buf(),
            reason: format!("runtime shrank while copying ({copied} of {runtime_len} bytes)"),
        });
    }

    let file = out.as_file_mut();
    file.write_all(&payload).map_err(PlanError::io(&out_path))?;
    file.write_all(&(payload.len() as u64).to_le_bytes())
        .map_err(PlanError::io(&out_path))?;
    file.write_all(MAGIC).map_err(PlanError::io(&out_path))?;
    file.sync_all().map_err(PlanError::io(&out_path))?;

    let (_, path) = out.keep().map_err(|e| PlanError::io(&out_path)(e.error))?;
    make_executable(&path)?;

    let bytes = fs::read(&path).map_err(PlanError::io(&path))?;
    let info = ArtifactInfo {
        size_bytes: bytes.len() as u64,
        sha256: sha256_hex(&bytes),
        path,
    };
    info!(
        path = %info.path.display(),
        size_bytes = info.size_bytes,
        sha256 = %info.sha256,
        "artifact written"
    );
    Ok(info)
}

/// Read the plan embedded in `path`, if there is one. The definition
/// checksum is verified before the plan is returned.
pub fn read_embedded(path: &Path) -> PlanResult<Option<DeployPlan>> {
    let mut file = File::open(path).map_err(PlanError::io(path))?;
    let Some(embedded) = locate(&mut file, path)? else {
        return Ok(None);
    };

    file.seek(SeekFrom::Start(embedded.runtime_len))
        .map_err(PlanError::io(path))?;
    let mut payload = Vec::with_capacity(embedded.plan_len as usize);
    (&mut file)
        .take(embedded.plan_len)
        .read_to_end(&mut payload)
        .map_err(PlanError::io(path))?;

    let plan: DeployPlan = serde_json::from_slice(&payload).map_err(|e| PlanError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    verify(&plan)?;
    Ok(Some(plan))
}

/// Plan embedded in the running executable.
pub fn current_exe_plan() -> PlanResult<Option<DeployPlan>> {
    let exe = std::env::current_exe().map_err(PlanError::io("current executable"))?;
    read_embedded(&exe)
}

fn locate(file: &mut File, path: &Path) -> PlanResult<Option<Embedded>> {
    let len = file.metadata().map_err(PlanError::io(path))?.len();
    if len < TRAILER_LEN {
        return Ok(None);
    }

    let mut trailer = [0u8; TRAILER_LEN as usize];
    file.seek(SeekFrom::End(-(TRAILER_LEN as i64)))
        .map_err(PlanError::io(path))?;
    file.read_exact(&mut trailer).map_err(PlanError::io(path))?;
    if &trailer[8..] != MAGIC {
        return Ok(None);
    }

    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&trailer[..8]);
    let plan_len = u64::from_le_bytes(len_bytes);
    if plan_len > MAX_PLAN_LEN || plan_len > len - TRAILER_LEN {
        return Err(PlanError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("trailer claims {plan_len} plan bytes in a {len}-byte file"),
        });
    }

    Ok(Some(Embedded {
        runtime_len: len - TRAILER_LEN - plan_len,
        plan_len,
    }))
}

#[cfg(unix)]
fn make_executable(path: &Path) -> PlanResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).map_err(PlanError::io(path))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> PlanResult<()> {
    Ok(())
}
