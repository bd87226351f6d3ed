//! `keel deploy` and the embedded-plan entry point.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use keel_core::DeployPlan;
use keel_engine::ComposeEngine;
use keel_rollout::{DeploySettings, Deployment};

/// Run a plan file written by `keel plan`.
pub async fn deploy(path: &Path) -> anyhow::Result<ExitCode> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let plan: DeployPlan =
        serde_json::from_str(&raw).with_context(|| format!("parsing plan {}", path.display()))?;
    keel_plan::verify(&plan)?;
    run(plan).await
}

/// Execute a plan and print its summary. The exit code is the
/// disposition's; errors that stop the attempt early exit with 1.
pub async fn run(plan: DeployPlan) -> anyhow::Result<ExitCode> {
    info!(
        version = %plan.version,
        workdir = %plan.workdir.display(),
        probe = %plan.probe,
        "running deployment plan"
    );

    let engine = Arc::new(ComposeEngine::new());
    let mut deployment = Deployment::new(engine, DeploySettings::from(&plan));
    let outcome = deployment
        .run()
        .await
        .with_context(|| format!("deployment of {} aborted", plan.version))?;

    print!("{outcome}");
    Ok(ExitCode::from(exit_status(outcome.exit_code())))
}

fn exit_status(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}
