use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use serde::Serialize;

use keel_core::Version;
use keel_release::{ReleaseInfo, ReleaseStore};

#[derive(Debug, Serialize)]
struct StatusReport {
    workdir: PathBuf,
    current: Option<Version>,
    previous: Option<Version>,
    releases: Vec<ReleaseInfo>,
}

pub fn status(workdir: &Path, format: &str) -> anyhow::Result<ExitCode> {
    let report = collect(workdir)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print!("{}", format_report(&report)),
    }
    Ok(ExitCode::SUCCESS)
}

/// Read-only: a workdir that was never deployed to stays untouched.
fn collect(workdir: &Path) -> anyhow::Result<StatusReport> {
    let store = ReleaseStore::open_existing(workdir);
    Ok(StatusReport {
        workdir: workdir.to_path_buf(),
        current: store.read_current()?,
        previous: store.read_previous()?,
        releases: store.list()?,
    })
}

fn format_report(report: &StatusReport) -> String {
    let name = |v: &Option<Version>| v.as_ref().map_or("none".to_string(), Version::to_string);

    let mut out = String::new();
    let _ = writeln!(out, "workdir:  {}", report.workdir.display());
    let _ = writeln!(out, "current:  {}", name(&report.current));
    let _ = writeln!(out, "previous: {}", name(&report.previous));
    if report.releases.is_empty() {
        let _ = writeln!(out, "releases: none");
        return out;
    }
    let _ = writeln!(out, "releases:");
    for release in report.releases.iter().rev() {
        let marker = if Some(&release.version) == report.current.as_ref() {
            "*"
        } else {
            " "
        };
        let _ = writeln!(
            out,
            "  {marker} {:<24} {}",
            release.version.as_str(),
            release.committed_at.as_deref().unwrap_or("uncommitted")
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_workdir_reports_nothing_deployed() {
        let dir = tempfile::tempdir().unwrap();
        let report = collect(&dir.path().join("absent")).unwrap();
        let text = format_report(&report);
        assert!(text.contains("current:  none"));
        assert!(text.contains("releases: none"));
        assert!(!dir.path().join("absent").exists());
    }

    #[test]
    fn status_does_not_create_the_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let report = collect(dir.path()).unwrap();
        assert!(report.current.is_none());
        assert!(report.releases.is_empty());
        assert!(!dir.path().join("releases").exists());
    }

    #[test]
    fn lists_newest_first_and_marks_current() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReleaseStore::open(dir.path()).unwrap();
        let v1 = Version::parse("v1").unwrap();
        let v2 = Version::parse("v2").unwrap();
        store.create_release(&v1, "services: {}\n").unwrap();
        store.commit(&v1, None).unwrap();
        store.create_release(&v2, "services: {}\n").unwrap();

        let text = format_report(&collect(dir.path()).unwrap());
        assert!(text.contains("current:  v1"));
        assert!(text.contains("previous: none"));
        let v2_line = text.find("  v2").unwrap();
        let v1_line = text.find("* v1").unwrap();
        assert!(v2_line < v1_line);
        assert!(text.contains("uncommitted"));
    }
}
