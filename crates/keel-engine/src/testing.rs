//! In-memory engine for tests.
//!
//! `ScriptedEngine` records every call, tracks which releases are running,
//! and answers health reads from a per-version script. Failures can be
//! injected per operation and version, and a health read can be held open
//! so a test can act while a deployment sits in its probe loop.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use keel_core::{HealthStatus, Release};

use crate::error::{EngineError, EngineResult};
use crate::{ContainerEngine, DefinitionResolver, EngineFuture};

/// One recorded engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(String),
    Start(String),
    Stop(String),
    Remove(String),
    Locate(String),
    InspectSupport(String),
    HealthRead(String),
    Resolve,
}

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Create,
    Start,
    Stop,
    Remove,
}

/// Health behaviour of one version's probe target.
#[derive(Debug, Clone)]
pub struct HealthScript {
    pub healthcheck: bool,
    /// Statuses returned in order; the last one repeats forever.
    pub statuses: VecDeque<HealthStatus>,
}

impl HealthScript {
    pub fn healthy_after(pending: usize) -> Self {
        let mut statuses: VecDeque<_> = std::iter::repeat_n(HealthStatus::Starting, pending).collect();
        statuses.push_back(HealthStatus::Healthy);
        Self {
            healthcheck: true,
            statuses,
        }
    }

    pub fn never_healthy() -> Self {
        Self {
            healthcheck: true,
            statuses: VecDeque::from([HealthStatus::Starting, HealthStatus::Unhealthy]),
        }
    }

    pub fn no_healthcheck() -> Self {
        Self {
            healthcheck: false,
            statuses: VecDeque::from([HealthStatus::Unsupported]),
        }
    }
}

/// Handshake for a held health read.
///
/// `reached` fires when the deployment enters the read; the read then
/// waits for `release`.
#[derive(Debug, Default)]
pub struct HealthGate {
    pub reached: Notify,
    pub release: Notify,
}

#[derive(Debug, Default)]
struct Inner {
    calls: Vec<Call>,
    scripts: HashMap<String, HealthScript>,
    created: HashSet<String>,
    running: HashSet<String>,
    containers: HashMap<String, String>,
    failures: HashSet<(Op, String)>,
    gates: HashMap<String, Arc<HealthGate>>,
    /// Reads that return absent before the container becomes queryable.
    unqueryable: HashMap<String, u32>,
    resolved: String,
}

/// Scripted [`ContainerEngine`] and [`DefinitionResolver`].
#[derive(Debug, Clone, Default)]
pub struct ScriptedEngine {
    inner: Arc<Mutex<Inner>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking test thread must not hide the calls recorded so far.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Set the health script for `version`. Unscripted versions are healthy
    /// on the first read.
    pub fn script(&self, version: &str, script: HealthScript) -> &Self {
        self.lock().scripts.insert(version.to_string(), script);
        self
    }

    pub fn fail(&self, op: Op, version: &str) -> &Self {
        self.lock().failures.insert((op, version.to_string()));
        self
    }

    /// The first `reads` locate calls for `version` find no container.
    pub fn unqueryable_for(&self, version: &str, reads: u32) -> &Self {
        self.lock().unqueryable.insert(version.to_string(), reads);
        self
    }

    /// Hold the next health read of `version` until the gate is released.
    pub fn hold_health(&self, version: &str) -> Arc<HealthGate> {
        let gate = Arc::new(HealthGate::default());
        self.lock().gates.insert(version.to_string(), gate.clone());
        gate
    }

    /// Output of [`DefinitionResolver::resolve`].
    pub fn set_resolved(&self, document: &str) -> &Self {
        self.lock().resolved = document.to_string();
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn health_reads(&self, version: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, Call::HealthRead(v) if v == version))
            .count()
    }

    pub fn is_running(&self, version: &str) -> bool {
        self.lock().running.contains(version)
    }

    pub fn exists(&self, version: &str) -> bool {
        self.lock().created.contains(version)
    }

    fn step(&self, op: Op, call: Call, release: &Release) -> EngineResult<()> {
        let version = release.version.to_string();
        let mut inner = self.lock();
        inner.calls.push(call);
        if inner.failures.contains(&(op, version.clone())) {
            return Err(EngineError::Other(format!("{op:?} failed for {version}")));
        }
        match op {
            Op::Create => {
                inner.created.insert(version);
            }
            Op::Start => {
                if !inner.created.contains(&version) {
                    return Err(EngineError::Other(format!("{version} was never created")));
                }
                inner.running.insert(version);
            }
            Op::Stop => {
                inner.running.remove(&version);
            }
            Op::Remove => {
                inner.running.remove(&version);
                inner.created.remove(&version);
                inner.containers.retain(|_, v| *v != version);
            }
        }
        Ok(())
    }
}

impl ContainerEngine for ScriptedEngine {
    fn create<'a>(&'a self, release: &'a Release) -> EngineFuture<'a, ()> {
        let result = self.step(Op::Create, Call::Create(release.version.to_string()), release);
        Box::pin(async move { result })
    }

    fn start<'a>(&'a self, release: &'a Release) -> EngineFuture<'a, ()> {
        let result = self.step(Op::Start, Call::Start(release.version.to_string()), release);
        Box::pin(async move { result })
    }

    fn stop<'a>(&'a self, release: &'a Release) -> EngineFuture<'a, ()> {
        let result = self.step(Op::Stop, Call::Stop(release.version.to_string()), release);
        Box::pin(async move { result })
    }

    fn remove<'a>(&'a self, release: &'a Release) -> EngineFuture<'a, ()> {
        let result = self.step(Op::Remove, Call::Remove(release.version.to_string()), release);
        Box::pin(async move { result })
    }

    fn container_id<'a>(
        &'a self,
        release: &'a Release,
        service: &'a str,
    ) -> EngineFuture<'a, Option<String>> {
        let version = release.version.to_string();
        let mut inner = self.lock();
        inner.calls.push(Call::Locate(version.clone()));

        let hidden = inner.unqueryable.get_mut(&version).is_some_and(|n| {
            if *n > 0 {
                *n -= 1;
                true
            } else {
                false
            }
        });

        let id = if hidden || !inner.created.contains(&version) {
            None
        } else {
            let id = format!("{}-{service}-1", release.project);
            inner.containers.insert(id.clone(), version);
            Some(id)
        };
        Box::pin(async move { Ok(id) })
    }

    fn has_healthcheck<'a>(&'a self, container: &'a str) -> EngineFuture<'a, bool> {
        let mut inner = self.lock();
        let version = inner.containers.get(container).cloned().unwrap_or_default();
        inner.calls.push(Call::InspectSupport(version.clone()));
        let supported = inner.scripts.get(&version).is_none_or(|s| s.healthcheck);
        Box::pin(async move { Ok(supported) })
    }

    fn health_status<'a>(&'a self, container: &'a str) -> EngineFuture<'a, HealthStatus> {
        Box::pin(async move {
            let (version, gate) = {
                let mut inner = self.lock();
                let version = inner.containers.get(container).cloned().unwrap_or_default();
                inner.calls.push(Call::HealthRead(version.clone()));
                let gate = inner.gates.remove(&version);
                (version, gate)
            };

            if let Some(gate) = gate {
                gate.reached.notify_one();
                gate.release.notified().await;
            }

            let mut inner = self.lock();
            if !inner.running.contains(&version) {
                return Ok(HealthStatus::Stopped);
            }
            let status = match inner.scripts.get_mut(&version) {
                None => HealthStatus::Healthy,
                Some(script) if !script.healthcheck => HealthStatus::Unsupported,
                Some(script) if script.statuses.len() > 1 => {
                    script.statuses.pop_front().unwrap_or(HealthStatus::Absent)
                }
                Some(script) => script.statuses.front().copied().unwrap_or(HealthStatus::Absent),
            };
            Ok(status)
        })
    }
}

impl DefinitionResolver for ScriptedEngine {
    fn resolve<'a>(
        &'a self,
        _fragments: &'a [PathBuf],
        _pin_digests: bool,
    ) -> EngineFuture<'a, String> {
        let resolved = {
            let mut inner = self.lock();
            inner.calls.push(Call::Resolve);
            inner.resolved.clone()
        };
        Box::pin(async move { Ok(resolved) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::Version;

    fn release(v: &str) -> Release {
        Release {
            version: Version::parse(v).unwrap(),
            dir: PathBuf::from(format!("/w/releases/{v}")),
            definition: PathBuf::from(format!("/w/releases/{v}/docker-compose.yml")),
            project: format!("w-{v}"),
        }
    }

    #[tokio::test]
    async fn script_replays_then_repeats_last() {
        let engine = ScriptedEngine::new();
        engine.script("v1", HealthScript::healthy_after(2));
        let r = release("v1");
        engine.create(&r).await.unwrap();
        engine.start(&r).await.unwrap();

        let id = engine.container_id(&r, "web").await.unwrap().unwrap();
        assert_eq!(id, "w-v1-web-1");
        assert_eq!(engine.health_status(&id).await.unwrap(), HealthStatus::Starting);
        assert_eq!(engine.health_status(&id).await.unwrap(), HealthStatus::Starting);
        assert_eq!(engine.health_status(&id).await.unwrap(), HealthStatus::Healthy);
        assert_eq!(engine.health_status(&id).await.unwrap(), HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn stopped_release_reports_stopped() {
        let engine = ScriptedEngine::new();
        let r = release("v1");
        engine.create(&r).await.unwrap();
        let id = engine.container_id(&r, "web").await.unwrap().unwrap();
        assert_eq!(engine.health_status(&id).await.unwrap(), HealthStatus::Stopped);
    }

    #[tokio::test]
    async fn injected_failure() {
        let engine = ScriptedEngine::new();
        engine.fail(Op::Start, "v1");
        let r = release("v1");
        engine.create(&r).await.unwrap();
        assert!(engine.start(&r).await.is_err());
        assert!(!engine.is_running("v1"));
    }

    #[tokio::test]
    async fn remove_forgets_containers() {
        let engine = ScriptedEngine::new();
        let r = release("v1");
        engine.create(&r).await.unwrap();
        engine.remove(&r).await.unwrap();
        assert!(!engine.exists("v1"));
        assert_eq!(engine.container_id(&r, "web").await.unwrap(), None);
    }
}
