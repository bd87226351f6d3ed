//! `keel compile` and `keel plan`.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use keel_core::KeelConfig;
use keel_engine::ComposeEngine;
use keel_plan::PlanInputs;

use crate::PlanArgs;

const DEFAULT_CONFIG: &str = "keel.toml";

pub async fn compile(args: PlanArgs, runtime: Option<PathBuf>) -> anyhow::Result<ExitCode> {
    let inputs = collect_inputs(args, Path::new(DEFAULT_CONFIG))?;
    let runtime = match runtime {
        Some(path) => path,
        None => std::env::current_exe().context("locating the keel runtime")?,
    };

    match keel_plan::compile(&ComposeEngine::new(), &inputs, &runtime).await {
        Ok(result) => {
            println!(
                "✓ Compiled deployment ({:.1} MB)",
                result.size_bytes as f64 / 1_048_576.0
            );
            println!("  Output: {}", result.path.display());
            println!("  SHA256: {}", result.sha256);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("Compile failed: {e}");
            Err(e.into())
        }
    }
}

pub async fn plan(args: PlanArgs) -> anyhow::Result<ExitCode> {
    let inputs = collect_inputs(args, Path::new(DEFAULT_CONFIG))?;
    let plan = keel_plan::plan(&ComposeEngine::new(), &inputs).await?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(ExitCode::SUCCESS)
}

/// Merge `keel.toml` under the flag/environment layer.
///
/// An explicit `--config` must exist; the default file is optional.
fn collect_inputs(args: PlanArgs, default_config: &Path) -> anyhow::Result<PlanInputs> {
    let config_path = args
        .config
        .clone()
        .or_else(|| default_config.is_file().then(|| default_config.to_path_buf()));

    let base = match &config_path {
        Some(path) => {
            let config = KeelConfig::from_file(path)
                .with_context(|| format!("reading {}", path.display()))?;
            PlanInputs::from(&config.deploy)
        }
        None => PlanInputs::default(),
    };
    Ok(base.overlay(args.into_inputs()))
}

impl PlanArgs {
    fn into_inputs(self) -> PlanInputs {
        PlanInputs {
            version: self.release_version,
            files: self.files,
            workdir: self.workdir,
            probe: self.probe,
            max_retries: self.max_retries,
            interval_secs: self.interval_secs,
            pin_digests: if self.no_pin_digests {
                Some(false)
            } else {
                self.pin_digests
            },
            retain: self.retain,
        }
    }
}
