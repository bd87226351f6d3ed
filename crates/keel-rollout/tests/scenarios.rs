//! End-to-end deployment scenarios.
//!
//! Drives full `Deployment` runs against a scripted engine and a real
//! working directory, then checks pointers, release directories, and what
//! the engine was asked to do.

use std::sync::Arc;
use std::time::Duration;

use keel_core::Version;
use keel_engine::testing::{Call, HealthScript, ScriptedEngine};
use keel_health::{PollConfig, ProbeOutcome};
use keel_release::ReleaseStore;
use keel_rollout::{DeploySettings, DeployState, Deployment, Disposition, Outcome};
use tempfile::TempDir;

const DEFINITION: &str = "services:\n  web:\n    image: shop:latest\n  db:\n    image: postgres:16\n";

fn v(s: &str) -> Version {
    Version::parse(s).unwrap()
}

fn settings(dir: &TempDir, version: &str) -> DeploySettings {
    DeploySettings::new(v(version), dir.path(), "web", DEFINITION)
        .with_poll(PollConfig::new(Duration::ZERO, 10))
}

async fn deploy(engine: &ScriptedEngine, dir: &TempDir, version: &str) -> Outcome {
    Deployment::new(Arc::new(engine.clone()), settings(dir, version))
        .run()
        .await
        .unwrap()
}

fn pointers(dir: &TempDir) -> (Option<Version>, Option<Version>) {
    let store = ReleaseStore::open(dir.path()).unwrap();
    (store.read_current().unwrap(), store.read_previous().unwrap())
}

#[tokio::test]
async fn scenario_a_first_deploy_commits() {
    let dir = TempDir::new().unwrap();
    let engine = ScriptedEngine::new();
    engine.script("v1", HealthScript::healthy_after(2));

    let outcome = deploy(&engine, &dir, "v1").await;

    assert_eq!(outcome.disposition, Disposition::Committed);
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(outcome.probe, Some(ProbeOutcome::Healthy { attempts: 3 }));
    assert_eq!(pointers(&dir), (Some(v("v1")), None));
    assert!(dir.path().join("releases/v1/RELEASE_DATE").is_file());
    assert!(engine.is_running("v1"));
}

#[tokio::test]
async fn scenario_b_second_deploy_moves_previous() {
    let dir = TempDir::new().unwrap();
    let engine = ScriptedEngine::new();
    deploy(&engine, &dir, "v1").await;

    let outcome = deploy(&engine, &dir, "v2").await;

    assert_eq!(outcome.disposition, Disposition::Committed);
    assert_eq!(outcome.previous, Some(v("v1")));
    assert_eq!(pointers(&dir), (Some(v("v2")), Some(v("v1"))));
    assert!(engine.is_running("v2"));
    assert!(!engine.is_running("v1"));

    let calls = engine.calls();
    let stop_old = calls.iter().position(|c| *c == Call::Stop("v1".into())).unwrap();
    let create_new = calls.iter().position(|c| *c == Call::Create("v2".into())).unwrap();
    assert!(stop_old < create_new, "old release must stop before the new one is created");
}

#[tokio::test]
async fn scenario_c_unhealthy_release_rolls_back() {
    let dir = TempDir::new().unwrap();
    let engine = ScriptedEngine::new();
    deploy(&engine, &dir, "v1").await;
    deploy(&engine, &dir, "v2").await;
    engine.script("v3", HealthScript::never_healthy());

    let outcome = deploy(&engine, &dir, "v3").await;

    assert_eq!(outcome.disposition, Disposition::RolledBack);
    assert_eq!(outcome.exit_code(), 2);
    assert_eq!(outcome.running(), Some(&v("v2")));
    assert_eq!(engine.health_reads("v3"), 10);
    assert_eq!(pointers(&dir), (Some(v("v2")), Some(v("v1"))));
    assert!(!dir.path().join("releases/v3").exists());
    assert!(engine.is_running("v2"));
    assert!(!engine.exists("v3"));
    assert!(outcome.to_string().contains("FAILED, ROLLED BACK"));
}

#[tokio::test]
async fn scenario_d_first_deploy_failure_has_nothing_to_roll_back_to() {
    let dir = TempDir::new().unwrap();
    let engine = ScriptedEngine::new();
    engine.script("v1", HealthScript::never_healthy());

    let outcome = deploy(&engine, &dir, "v1").await;

    assert_eq!(outcome.disposition, Disposition::NoRollback);
    assert_eq!(outcome.exit_code(), 3);
    assert_eq!(outcome.running(), None);
    assert_eq!(pointers(&dir), (None, None));
    assert!(!engine.is_running("v1"));
    // Kept for inspection, but never committed.
    assert!(!dir.path().join("releases/v1/RELEASE_DATE").exists());
}

#[tokio::test]
async fn scenario_e_concurrent_deploy_is_rejected() {
    let dir = TempDir::new().unwrap();
    let engine = ScriptedEngine::new();
    deploy(&engine, &dir, "v1").await;

    let gate = engine.hold_health("v2");
    let first = {
        let engine = engine.clone();
        let settings = settings(&dir, "v2");
        tokio::spawn(async move {
            Deployment::new(Arc::new(engine), settings).run().await
        })
    };
    gate.reached.notified().await;

    let mut second = Deployment::new(Arc::new(engine.clone()), settings(&dir, "v3"));
    let rejected = second.run().await.unwrap();
    assert_eq!(rejected.disposition, Disposition::LockContention);
    assert_eq!(rejected.exit_code(), 4);
    assert_eq!(second.history(), &[DeployState::Init, DeployState::LockFailed]);
    assert!(!dir.path().join("releases/v3").exists());
    assert!(!engine.calls().contains(&Call::Create("v3".into())));

    gate.release.notify_one();
    let completed = first.await.unwrap().unwrap();
    assert_eq!(completed.disposition, Disposition::Committed);
    assert_eq!(pointers(&dir), (Some(v("v2")), Some(v("v1"))));
}

#[tokio::test]
async fn lock_is_free_after_every_disposition() {
    let dir = TempDir::new().unwrap();
    let engine = ScriptedEngine::new();
    engine.script("v1", HealthScript::never_healthy());
    assert_eq!(deploy(&engine, &dir, "v1").await.disposition, Disposition::NoRollback);

    // The failed v1 directory is still there; a fresh version goes through.
    assert_eq!(deploy(&engine, &dir, "v2").await.disposition, Disposition::Committed);
    engine.script("v3", HealthScript::never_healthy());
    assert_eq!(deploy(&engine, &dir, "v3").await.disposition, Disposition::RolledBack);
    assert_eq!(deploy(&engine, &dir, "v4").await.disposition, Disposition::Committed);
}

#[tokio::test]
async fn retention_after_many_deploys() {
    let dir = TempDir::new().unwrap();
    let engine = ScriptedEngine::new();
    for version in ["r1", "r2", "r3", "r4", "r5", "r6"] {
        assert!(deploy(&engine, &dir, version).await.disposition.is_success());
    }

    let store = ReleaseStore::open(dir.path()).unwrap();
    let kept: Vec<String> = store
        .list()
        .unwrap()
        .into_iter()
        .map(|r| r.version.to_string())
        .collect();
    assert_eq!(kept, vec!["r4", "r5", "r6"]);
    assert_eq!(pointers(&dir), (Some(v("r6")), Some(v("r5"))));
}

#[tokio::test]
async fn pruned_releases_are_removed_from_the_engine() {
    let dir = TempDir::new().unwrap();
    let engine = ScriptedEngine::new();
    for version in ["v1", "v2", "v3", "v4", "v5"] {
        assert!(deploy(&engine, &dir, version).await.disposition.is_success());
    }

    for gone in ["v1", "v2"] {
        assert!(!engine.exists(gone), "{gone} still has containers");
        assert!(engine.calls().contains(&Call::Remove(gone.into())));
        assert!(!dir.path().join("releases").join(gone).exists());
    }
    for kept in ["v3", "v4", "v5"] {
        assert!(engine.exists(kept));
        assert!(!engine.calls().contains(&Call::Remove(kept.into())));
    }
    assert!(engine.is_running("v5"));
    assert!(!engine.is_running("v4"));
}

#[tokio::test]
async fn unhealthy_release_never_becomes_current() {
    let dir = TempDir::new().unwrap();
    let engine = ScriptedEngine::new();
    deploy(&engine, &dir, "v1").await;
    engine.script("v2", HealthScript::healthy_after(20));

    // Would turn healthy on read 21, but the gate only allows 10.
    let outcome = deploy(&engine, &dir, "v2").await;
    assert_eq!(outcome.disposition, Disposition::RolledBack);
    assert_eq!(pointers(&dir).0, Some(v("v1")));
}
