//! `docker compose` CLI driver.
//!
//! Every release runs as its own compose project (`-p <release.project>`)
//! built from the definition file stored in the release directory, so two
//! releases never share containers even when their services have the same
//! names.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use keel_core::{HealthStatus, Release};

use crate::error::{EngineError, EngineResult};
use crate::{ContainerEngine, DefinitionResolver, EngineFuture};

/// Drives containers through the `docker` CLI.
#[derive(Debug, Clone)]
pub struct ComposeEngine {
    program: PathBuf,
}

impl Default for ComposeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ComposeEngine {
    /// Use `docker` from `$PATH`, or `$KEEL_DOCKER` when set.
    pub fn new() -> Self {
        let program = std::env::var_os("KEEL_DOCKER")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("docker"));
        Self { program }
    }

    /// Use a specific engine binary (anything CLI-compatible with docker).
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn project_args(release: &Release) -> Vec<OsString> {
        vec![
            "compose".into(),
            "--project-name".into(),
            release.project.clone().into(),
            "--project-directory".into(),
            release.dir.clone().into(),
            "--file".into(),
            release.definition.clone().into(),
        ]
    }

    async fn compose(&self, release: &Release, action: &[&str]) -> EngineResult<String> {
        let mut args = Self::project_args(release);
        args.extend(action.iter().map(OsString::from));
        self.run(&args).await
    }

    async fn run(&self, args: &[OsString]) -> EngineResult<String> {
        let command = display_command(&self.program, args);
        debug!(%command, "engine call");

        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| EngineError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(EngineError::Command {
                command,
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn inspect(&self, container: &str) -> EngineResult<InspectSummary> {
        let out = self.run(&["inspect".into(), container.into()]).await?;
        parse_inspect(&out)
    }
}

impl ContainerEngine for ComposeEngine {
    fn create<'a>(&'a self, release: &'a Release) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            self.compose(release, &["create", "--remove-orphans"]).await?;
            Ok(())
        })
    }

    fn start<'a>(&'a self, release: &'a Release) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            self.compose(release, &["start"]).await?;
            Ok(())
        })
    }

    fn stop<'a>(&'a self, release: &'a Release) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            self.compose(release, &["stop"]).await?;
            Ok(())
        })
    }

    fn remove<'a>(&'a self, release: &'a Release) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            self.compose(release, &["down", "--remove-orphans"]).await?;
            Ok(())
        })
    }

    fn container_id<'a>(
        &'a self,
        release: &'a Release,
        service: &'a str,
    ) -> EngineFuture<'a, Option<String>> {
        Box::pin(async move {
            let out = self.compose(release, &["ps", "--all", "--quiet", service]).await?;
            Ok(out
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(str::to_string))
        })
    }

    fn has_healthcheck<'a>(&'a self, container: &'a str) -> EngineFuture<'a, bool> {
        Box::pin(async move { Ok(self.inspect(container).await?.has_healthcheck) })
    }

    fn health_status<'a>(&'a self, container: &'a str) -> EngineFuture<'a, HealthStatus> {
        Box::pin(async move {
            let summary = self.inspect(container).await?;
            if !summary.has_healthcheck {
                return Ok(HealthStatus::Unsupported);
            }
            Ok(summary.status)
        })
    }
}

impl DefinitionResolver for ComposeEngine {
    fn resolve<'a>(
        &'a self,
        fragments: &'a [PathBuf],
        pin_digests: bool,
    ) -> EngineFuture<'a, String> {
        Box::pin(async move {
            let mut args: Vec<OsString> = vec!["compose".into()];
            for fragment in fragments {
                args.push("--file".into());
                args.push(fragment.clone().into());
            }
            args.push("config".into());
            if pin_digests {
                args.push("--resolve-image-digests".into());
            }
            self.run(&args).await
        })
    }
}

/// The parts of `docker inspect` output keel cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectSummary {
    pub has_healthcheck: bool,
    pub status: HealthStatus,
}

/// Parse the JSON array printed by `docker inspect <container>`.
///
/// A health signal is declared when `Config.Healthcheck.Test` is present
/// and is not `["NONE"]`.
pub fn parse_inspect(raw: &str) -> EngineResult<InspectSummary> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| EngineError::Parse(e.to_string()))?;
    let container = value
        .as_array()
        .and_then(|items| items.first())
        .ok_or_else(|| EngineError::Parse("empty inspect result".to_string()))?;

    let test = container
        .pointer("/Config/Healthcheck/Test")
        .and_then(|t| t.as_array());
    let has_healthcheck = match test {
        Some(parts) => match parts.first().and_then(|p| p.as_str()) {
            None | Some("NONE") => false,
            Some(_) => true,
        },
        None => false,
    };

    let status = container
        .pointer("/State/Health/Status")
        .and_then(|s| s.as_str())
        .map(HealthStatus::from_engine)
        .unwrap_or(HealthStatus::Absent);

    Ok(InspectSummary {
        has_healthcheck,
        status,
    })
}

fn display_command(program: &Path, args: &[OsString]) -> String {
    let mut parts = vec![program.display().to_string()];
    parts.extend(args.iter().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}
