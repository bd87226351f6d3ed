//! Deployment controller — drives one deployment attempt to a terminal state.
//!
//! The controller takes the working-directory lock, stops the current
//! release, creates and starts the new one, runs the health gate, and then
//! either commits or rolls back. Every transition is logged and recorded.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};

use keel_core::{DEFAULT_RETAIN, DeployPlan, Release, Version};
use keel_engine::{ContainerEngine, EngineError};
use keel_health::{HealthPoller, HealthSupport, PollConfig, ProbeOutcome};
use keel_release::{DeployLock, LockError, ReleaseStore, StoreError};

use crate::outcome::{Disposition, Outcome};

/// Position of a deployment in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployState {
    Init,
    Locked,
    OldStopped,
    NewCreated,
    NewStarted,
    Probing,
    Committed,
    RolledBack,
    NoRollback,
    LockFailed,
    RollbackFailed,
}

impl DeployState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeployState::Committed
                | DeployState::RolledBack
                | DeployState::NoRollback
                | DeployState::LockFailed
                | DeployState::RollbackFailed
        )
    }
}

/// Errors that stop an attempt before it can reach a disposition.
///
/// None of these leave the working directory changed, except `StopOld`,
/// after which the prior release is restarted on a best-effort basis.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("failed to stop release {version}: {source}")]
    StopOld {
        version: String,
        #[source]
        source: EngineError,
    },
}

/// Inputs of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploySettings {
    pub version: Version,
    pub workdir: PathBuf,
    pub probe: String,
    pub definition: String,
    pub poll: PollConfig,
    pub retain: usize,
}

impl DeploySettings {
    pub fn new(version: Version, workdir: impl Into<PathBuf>, probe: &str, definition: &str) -> Self {
        Self {
            version,
            workdir: workdir.into(),
            probe: probe.to_string(),
            definition: definition.to_string(),
            poll: PollConfig::default(),
            retain: DEFAULT_RETAIN,
        }
    }

    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }
}

impl From<&DeployPlan> for DeploySettings {
    fn from(plan: &DeployPlan) -> Self {
        Self {
            version: plan.version.clone(),
            workdir: plan.workdir.clone(),
            probe: plan.probe.clone(),
            definition: plan.definition.clone(),
            poll: PollConfig::new(Duration::from_secs(plan.interval_secs), plan.max_retries),
            retain: plan.retain,
        }
    }
}

/// One deployment attempt.
pub struct Deployment {
    settings: DeploySettings,
    engine: Arc<dyn ContainerEngine>,
    state: DeployState,
    history: Vec<DeployState>,
}

impl Deployment {
    pub fn new(engine: Arc<dyn ContainerEngine>, settings: DeploySettings) -> Self {
        Self {
            settings,
            engine,
            state: DeployState::Init,
            history: vec![DeployState::Init],
        }
    }

    pub fn state(&self) -> DeployState {
        self.state
    }

    /// Every state visited so far, starting with `Init`.
    pub fn history(&self) -> &[DeployState] {
        &self.history
    }

    fn transition(&mut self, next: DeployState) {
        info!(version = %self.settings.version, from = ?self.state, to = ?next, "deploy state");
        self.state = next;
        self.history.push(next);
    }

    /// Run the attempt to a terminal state.
    ///
    /// The lock is held from the first step until this returns, on every
    /// path.
    pub async fn run(&mut self) -> Result<Outcome, DeployError> {
        let version = self.settings.version.clone();
        let workdir = self.settings.workdir.clone();

        // ── Init → Locked ──────────────────────────────────────────
        let _lock = match DeployLock::acquire(&workdir) {
            Ok(lock) => lock,
            Err(LockError::Contended(path)) => {
                warn!(%version, lock = %path.display(), "deployment already in progress");
                self.transition(DeployState::LockFailed);
                // Pointer reads are safe without the lock.
                let previous = ReleaseStore::open_existing(&workdir)
                    .read_current()
                    .ok()
                    .flatten();
                let mut outcome = self.outcome(Disposition::LockContention, previous, None);
                outcome.reason = Some(format!("lock held on {}", path.display()));
                return Ok(outcome);
            }
            Err(e) => return Err(e.into()),
        };
        self.transition(DeployState::Locked);
        info!(%version, workdir = %workdir.display(), "deployment started");

        let store = ReleaseStore::open(&workdir)?.with_retain(self.settings.retain);
        let old = store.read_current()?;
        if store.exists(&version) {
            return Err(StoreError::ReleaseExists(version.to_string()).into());
        }

        // ── Locked → OldStopped ────────────────────────────────────
        let old_release = old.as_ref().map(|v| store.release(v));
        if let Some(old_release) = &old_release {
            info!(version = %old_release.version, "stopping current release");
            if let Err(source) = self.engine.stop(old_release).await {
                if let Err(e) = self.engine.start(old_release).await {
                    error!(version = %old_release.version, error = %e, "restart after failed stop also failed");
                }
                return Err(DeployError::StopOld {
                    version: old_release.version.to_string(),
                    source,
                });
            }
        } else {
            info!("no current release; first deployment");
        }
        self.transition(DeployState::OldStopped);

        // ── OldStopped → … → Probing ───────────────────────────────
        let new_release = store.release(&version);
        let mut warnings = Vec::new();
        let probe = match self.bring_up(&store, &new_release, &mut warnings).await {
            Ok(probe) if probe.passed() => probe,
            Ok(probe) => {
                let reason = match probe {
                    ProbeOutcome::TimedOut { attempts, last } => format!(
                        "health gate timed out: {} not healthy after {attempts} check(s) (last status {last})",
                        self.settings.probe
                    ),
                    _ => "health gate failed".to_string(),
                };
                return Ok(self
                    .fail(&store, &new_release, old_release.as_ref(), Some(probe), reason, warnings)
                    .await);
            }
            Err(reason) => {
                return Ok(self
                    .fail(&store, &new_release, old_release.as_ref(), None, reason, warnings)
                    .await);
            }
        };

        // ── Probing → Committed ────────────────────────────────────
        if let Err(e) = store.commit(&version, old.as_ref()) {
            let reason = format!("commit failed: {e}");
            return Ok(self
                .fail(&store, &new_release, old_release.as_ref(), Some(probe), reason, warnings)
                .await);
        }
        self.prune(&store).await;
        self.transition(DeployState::Committed);
        info!(%version, previous = ?old.as_ref().map(Version::as_str), "deployment committed");

        let mut outcome = self.outcome(Disposition::Committed, old, Some(probe));
        outcome.warnings = warnings;
        Ok(outcome)
    }

    /// Create, start, and health-check the new release. `Err` carries the
    /// reason an engine or store step failed before the gate could run.
    async fn bring_up(
        &mut self,
        store: &ReleaseStore,
        release: &Release,
        warnings: &mut Vec<String>,
    ) -> Result<ProbeOutcome, String> {
        let poller = HealthPoller::new(self.engine.clone(), self.settings.poll);
        let probe = self.settings.probe.clone();

        store
            .create_release(&release.version, &self.settings.definition)
            .map_err(|e| format!("creating release: {e}"))?;
        self.engine
            .create(release)
            .await
            .map_err(|e| format!("creating containers: {e}"))?;
        self.transition(DeployState::NewCreated);

        let support = poller.inspect_support(release, &probe).await;

        self.engine
            .start(release)
            .await
            .map_err(|e| format!("starting containers: {e}"))?;
        self.transition(DeployState::NewStarted);

        self.transition(DeployState::Probing);
        let outcome = if support == HealthSupport::Missing {
            warn!(version = %release.version, %probe, "probe target has no healthcheck; trusting successful start");
            ProbeOutcome::NoHealthcheck
        } else {
            poller.poll(release, &probe).await
        };

        if outcome == ProbeOutcome::NoHealthcheck {
            warnings.push(format!(
                "{probe} declares no healthcheck; release trusted because it started"
            ));
        }
        Ok(outcome)
    }

    /// Tear down and delete releases outside the retention window. Never
    /// fails the deployment. A release whose containers cannot be removed
    /// keeps its directory, which the compose engine needs to retry.
    async fn prune(&self, store: &ReleaseStore) -> Vec<Version> {
        let mut torn_down = Vec::new();
        for version in store.expired() {
            let release = store.release(&version);
            match self.engine.remove(&release).await {
                Ok(()) => torn_down.push(version),
                Err(e) => {
                    warn!(%version, error = %e, "failed to remove expired release's containers; keeping it");
                }
            }
        }
        store.remove_releases(&torn_down)
    }

    /// Failure branch: roll back to `old` if there is one.
    async fn fail(
        &mut self,
        store: &ReleaseStore,
        new_release: &Release,
        old: Option<&Release>,
        probe: Option<ProbeOutcome>,
        reason: String,
        warnings: Vec<String>,
    ) -> Outcome {
        warn!(version = %new_release.version, %reason, "deployment failed");
        let previous = old.map(|r| r.version.clone());

        let disposition = match old {
            Some(old) => {
                if let Err(e) = self.engine.remove(new_release).await {
                    warn!(version = %new_release.version, error = %e, "failed to remove new containers");
                }
                if let Err(e) = store.abort_release(&new_release.version) {
                    warn!(version = %new_release.version, error = %e, "failed to delete aborted release");
                }
                match self.engine.start(old).await {
                    Ok(()) => {
                        info!(version = %old.version, "rolled back");
                        self.transition(DeployState::RolledBack);
                        Disposition::RolledBack
                    }
                    Err(e) => {
                        error!(version = %old.version, error = %e, "rollback failed; nothing is running");
                        self.transition(DeployState::RollbackFailed);
                        let mut outcome = self.outcome(Disposition::RollbackFailed, previous, probe);
                        outcome.reason =
                            Some(format!("{reason}; restarting {} failed: {e}", old.version));
                        outcome.warnings = warnings;
                        return outcome;
                    }
                }
            }
            None => {
                // Keep the containers and directory for inspection, but
                // leave nothing running.
                if let Err(e) = self.engine.stop(new_release).await {
                    warn!(version = %new_release.version, error = %e, "failed to stop new containers");
                }
                error!(version = %new_release.version, "first deployment failed; no release to roll back to");
                self.transition(DeployState::NoRollback);
                Disposition::NoRollback
            }
        };

        let mut outcome = self.outcome(disposition, previous, probe);
        outcome.reason = Some(reason);
        outcome.warnings = warnings;
        outcome
    }

    fn outcome(
        &self,
        disposition: Disposition,
        previous: Option<Version>,
        probe: Option<ProbeOutcome>,
    ) -> Outcome {
        Outcome {
            disposition,
            version: self.settings.version.clone(),
            previous,
            probe_target: self.settings.probe.clone(),
            probe,
            reason: None,
            warnings: Vec::new(),
        }
    }
}
