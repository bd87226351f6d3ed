use std::fmt::Write;
use std::path::Path;
use std::process::ExitCode;

use anyhow::bail;
use keel_core::DeployPlan;

pub fn inspect(artifact: &Path, with_definition: bool) -> anyhow::Result<ExitCode> {
    let Some(plan) = keel_plan::read_embedded(artifact)? else {
        bail!("{} does not contain a deployment plan", artifact.display());
    };
    print!("{}", describe(&plan, with_definition));
    Ok(ExitCode::SUCCESS)
}

fn describe(plan: &DeployPlan, with_definition: bool) -> String {
    let compiled = chrono::DateTime::from_timestamp(plan.compiled_at as i64, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| plan.compiled_at.to_string());
    let services = keel_plan::service_names(&plan.definition)
        .map(|s| s.into_iter().collect::<Vec<_>>().join(", "))
        .unwrap_or_else(|e| format!("unreadable ({e})"));

    let mut out = String::new();
    let _ = writeln!(out, "version:      {}", plan.version);
    let _ = writeln!(out, "workdir:      {}", plan.workdir.display());
    let _ = writeln!(out, "probe:        {}", plan.probe);
    let _ = writeln!(out, "services:     {services}");
    let _ = writeln!(
        out,
        "health gate:  {} check(s), {}s apart",
        plan.max_retries, plan.interval_secs
    );
    let _ = writeln!(out, "retain:       {}", plan.retain);
    let _ = writeln!(out, "pin digests:  {}", plan.pin_digests);
    let _ = writeln!(out, "compiled at:  {compiled}");
    let _ = writeln!(out, "definition:   sha256 {}", plan.definition_sha256);
    if with_definition {
        let _ = writeln!(out, "---");
        out.push_str(&plan.definition);
        if !plan.definition.ends_with('\n') {
            out.push('\n');
        }
    }
    out
}
