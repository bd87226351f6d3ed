//! Plan compilation: resolve the definition once and freeze every input.

use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use keel_core::{DeployPlan, ValidationError};
use keel_engine::DefinitionResolver;

use crate::error::{PlanError, PlanResult};
use crate::inputs::ValidInputs;

/// Resolve the definition fragments and build a plan from validated inputs.
///
/// Fails with `UnknownProbeTarget` if the probe is not one of the resolved
/// services.
pub async fn build_plan(
    resolver: &dyn DefinitionResolver,
    inputs: ValidInputs,
) -> PlanResult<DeployPlan> {
    info!(
        version = %inputs.version,
        fragments = inputs.files.len(),
        pin_digests = inputs.pin_digests,
        "resolving application definition"
    );
    let definition = resolver.resolve(&inputs.files, inputs.pin_digests).await?;

    let services = service_names(&definition)?;
    debug!(?services, "resolved services");
    if !services.contains(&inputs.probe) {
        return Err(ValidationError::UnknownProbeTarget {
            probe: inputs.probe,
            available: if services.is_empty() {
                "none".to_string()
            } else {
                services.into_iter().collect::<Vec<_>>().join(", ")
            },
        }
        .into());
    }

    let compiled_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    Ok(DeployPlan {
        version: inputs.version,
        workdir: inputs.workdir,
        probe: inputs.probe,
        max_retries: inputs.max_retries,
        interval_secs: inputs.interval_secs,
        retain: inputs.retain,
        pin_digests: inputs.pin_digests,
        definition_sha256: sha256_hex(definition.as_bytes()),
        definition,
        compiled_at,
    })
}

/// Service names declared by a resolved definition.
pub fn service_names(definition: &str) -> PlanResult<BTreeSet<String>> {
    let doc: serde_yaml::Value =
        serde_yaml::from_str(definition).map_err(|e| PlanError::Definition(e.to_string()))?;
    let services = match doc.get("services") {
        Some(serde_yaml::Value::Mapping(map)) => map,
        Some(serde_yaml::Value::Null) | None => return Ok(BTreeSet::new()),
        Some(_) => {
            return Err(PlanError::Definition(
                "`services` is not a mapping".to_string(),
            ));
        }
    };
    Ok(services
        .keys()
        .filter_map(|k| k.as_str().map(str::to_string))
        .collect())
}

/// Check that the embedded definition is the one that was compiled.
pub fn verify(plan: &DeployPlan) -> PlanResult<()> {
    let actual = sha256_hex(plan.definition.as_bytes());
    if actual != plan.definition_sha256 {
        return Err(PlanError::ChecksumMismatch {
            expected: plan.definition_sha256.clone(),
            actual,
        });
    }
    Ok(())
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::Version;
    use keel_engine::testing::{Call, ScriptedEngine};
    use std::path::PathBuf;

    const RESOLVED: &str = "\
name: shop
services:
  db:
    image: postgres@sha256:0a1b
  web:
    image: shop@sha256:9f8e
    environment:
      DATABASE_URL: postgres://db/shop
";

    fn inputs(probe: &str) -> ValidInputs {
        ValidInputs {
            version: Version::parse("v7").unwrap(),
            files: vec![PathBuf::from("/src/compose.yml")],
            workdir: PathBuf::from("/srv/shop"),
            probe: probe.to_string(),
            max_retries: 30,
            interval_secs: 5,
            pin_digests: true,
            retain: 3,
        }
    }

    #[tokio::test]
    async fn plan_embeds_resolved_definition() {
        let engine = ScriptedEngine::new();
        engine.set_resolved(RESOLVED);

        let plan = build_plan(&engine, inputs("web")).await.unwrap();
        assert_eq!(plan.definition, RESOLVED);
        assert_eq!(plan.definition_sha256.len(), 64);
        assert_eq!(plan.version.as_str(), "v7");
        assert!(plan.compiled_at > 0);
        verify(&plan).unwrap();
        assert_eq!(engine.calls(), vec![Call::Resolve]);
    }

    #[tokio::test]
    async fn unknown_probe_fails_at_compile_time() {
        let engine = ScriptedEngine::new();
        engine.set_resolved(RESOLVED);

        let err = build_plan(&engine, inputs("worker")).await.unwrap_err();
        match err {
            PlanError::Validation(ValidationError::UnknownProbeTarget { probe, available }) => {
                assert_eq!(probe, "worker");
                assert_eq!(available, "db, web");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn service_names_edge_cases() {
        assert!(service_names("services:\n").unwrap().is_empty());
        assert!(service_names("version: '3'\n").unwrap().is_empty());
        assert!(matches!(
            service_names("services: [web]\n"),
            Err(PlanError::Definition(_))
        ));
        assert!(matches!(
            service_names("services: {web: [}\n"),
            Err(PlanError::Definition(_))
        ));
    }

    #[tokio::test]
    async fn tampered_definition_fails_verification() {
        let engine = ScriptedEngine::new();
        engine.set_resolved(RESOLVED);
        let mut plan = build_plan(&engine, inputs("web")).await.unwrap();

        plan.definition.push_str("  evil:\n    image: miner\n");
        assert!(matches!(verify(&plan), Err(PlanError::ChecksumMismatch { .. })));
    }
}
