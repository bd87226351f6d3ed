//! keel plan — compile a deployment into one executable file.
//!
//! The compiler validates every input, resolves the application definition
//! exactly once, checks the probe target against the resolved services and
//! embeds the result into a copy of the keel runtime. The artifact needs
//! nothing at run time except the container engine and the working
//! directory.

use std::path::Path;

use keel_core::DeployPlan;
use keel_engine::DefinitionResolver;

pub mod artifact;
pub mod compile;
pub mod error;
pub mod inputs;

pub use artifact::{ArtifactInfo, current_exe_plan, read_embedded, write_artifact};
pub use compile::{build_plan, service_names, verify};
pub use error::{PlanError, PlanResult};
pub use inputs::{PlanInputs, ValidInputs};

/// Validate `inputs` and resolve them into a plan.
pub async fn plan(resolver: &dyn DefinitionResolver, inputs: &PlanInputs) -> PlanResult<DeployPlan> {
    let valid = inputs.validate()?;
    build_plan(resolver, valid).await
}

/// Validate, resolve, and write an artifact built on `runtime`.
///
/// Returns the artifact's location; it is not executed.
pub async fn compile(
    resolver: &dyn DefinitionResolver,
    inputs: &PlanInputs,
    runtime: &Path,
) -> PlanResult<ArtifactInfo> {
    let plan = plan(resolver, inputs).await?;
    write_artifact(runtime, &plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::ValidationError;
    use keel_engine::testing::{Call, ScriptedEngine};
    use std::fs;
    use std::path::PathBuf;

    #[tokio::test]
    async fn invalid_inputs_never_reach_the_resolver() {
        let engine = ScriptedEngine::new();
        let inputs = PlanInputs {
            version: Some("v1".to_string()),
            ..Default::default()
        };
        let err = plan(&engine, &inputs).await.unwrap_err();
        assert!(matches!(
            err,
            PlanError::Validation(ValidationError::Missing("files"))
        ));
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn compile_writes_runnable_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let fragment = dir.path().join("compose.yml");
        fs::write(&fragment, "services:\n  web:\n    image: shop\n").unwrap();
        let runtime = dir.path().join("keel");
        fs::write(&runtime, b"runtime").unwrap();

        let engine = ScriptedEngine::new();
        engine.set_resolved("services:\n  web:\n    image: shop@sha256:aa\n");
        let inputs = PlanInputs {
            version: Some("2026.10.19".to_string()),
            files: vec![fragment],
            workdir: Some(PathBuf::from("/srv/shop")),
            probe: Some("web".to_string()),
            max_retries: Some(4),
            ..Default::default()
        };

        let info = compile(&engine, &inputs, &runtime).await.unwrap();
        let embedded = read_embedded(&info.path).unwrap().unwrap();
        fs::remove_file(&info.path).unwrap();

        assert_eq!(embedded.version.as_str(), "2026.10.19");
        assert_eq!(embedded.max_retries, 4);
        assert!(embedded.definition.contains("sha256:aa"));
    }
}
