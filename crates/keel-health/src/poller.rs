//! Health probe polling.
//!
//! Locates the probe-target container of a release, checks whether it has
//! a health signal at all, and polls its status with a bounded retry count.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use keel_core::{DEFAULT_INTERVAL_SECS, DEFAULT_MAX_RETRIES, HealthStatus, Release};
use keel_engine::ContainerEngine;

/// Polling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Pause between two status reads.
    pub interval: Duration,
    /// Total number of status reads before giving up. Zero is treated as one.
    pub max_retries: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl PollConfig {
    pub fn new(interval: Duration, max_retries: u32) -> Self {
        Self {
            interval,
            max_retries,
        }
    }

    /// Worst-case time spent sleeping.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_retries.max(1).saturating_sub(1)
    }
}

/// Whether the probe target's image declares a health signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthSupport {
    Declared,
    Missing,
    /// The container could not be inspected; polling decides.
    Unknown,
}

/// Result of the health gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// The probe target reported `healthy` on read number `attempts`.
    Healthy { attempts: u32 },
    /// No health signal; trusted because it started.
    NoHealthcheck,
    /// Every read came back not-healthy.
    TimedOut { attempts: u32, last: HealthStatus },
}

impl ProbeOutcome {
    /// Whether the release may be committed.
    pub fn passed(&self) -> bool {
        !matches!(self, ProbeOutcome::TimedOut { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            ProbeOutcome::Healthy { attempts } | ProbeOutcome::TimedOut { attempts, .. } => {
                *attempts
            }
            ProbeOutcome::NoHealthcheck => 0,
        }
    }
}

/// Polls one service of a release until it is healthy or retries run out.
#[derive(Clone)]
pub struct HealthPoller {
    engine: Arc<dyn ContainerEngine>,
    config: PollConfig,
}

impl HealthPoller {
    pub fn new(engine: Arc<dyn ContainerEngine>, config: PollConfig) -> Self {
        Self { engine, config }
    }

    pub fn config(&self) -> PollConfig {
        self.config
    }

    /// Check the created (not yet started) probe-target container for a
    /// health signal.
    pub async fn inspect_support(&self, release: &Release, target: &str) -> HealthSupport {
        let container = match self.engine.container_id(release, target).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                debug!(version = %release.version, %target, "probe target not found yet");
                return HealthSupport::Unknown;
            }
            Err(e) => {
                debug!(version = %release.version, %target, error = %e, "probe target lookup failed");
                return HealthSupport::Unknown;
            }
        };

        match self.engine.has_healthcheck(&container).await {
            Ok(true) => HealthSupport::Declared,
            Ok(false) => HealthSupport::Missing,
            Err(e) => {
                debug!(%container, error = %e, "healthcheck inspection failed");
                HealthSupport::Unknown
            }
        }
    }

    /// Poll the started probe target.
    pub async fn poll(&self, release: &Release, target: &str) -> ProbeOutcome {
        let max = self.config.max_retries.max(1);
        let mut last = HealthStatus::Absent;

        for attempt in 1..=max {
            last = self.read_status(release, target).await;
            match last {
                HealthStatus::Healthy => {
                    info!(version = %release.version, %target, attempt, "probe target healthy");
                    return ProbeOutcome::Healthy { attempts: attempt };
                }
                HealthStatus::Unsupported => {
                    warn!(
                        version = %release.version,
                        %target,
                        "probe target has no healthcheck; trusting successful start"
                    );
                    return ProbeOutcome::NoHealthcheck;
                }
                status => {
                    debug!(version = %release.version, %target, attempt, max, %status, "not healthy yet");
                }
            }
            if attempt < max {
                tokio::time::sleep(self.config.interval).await;
            }
        }

        warn!(version = %release.version, %target, attempts = max, %last, "health gate timed out");
        ProbeOutcome::TimedOut {
            attempts: max,
            last,
        }
    }

    /// Full gate: inspect support, then poll unless there is nothing to poll.
    pub async fn probe(&self, release: &Release, target: &str) -> ProbeOutcome {
        if self.inspect_support(release, target).await == HealthSupport::Missing {
            warn!(
                version = %release.version,
                %target,
                "probe target has no healthcheck; trusting successful start"
            );
            return ProbeOutcome::NoHealthcheck;
        }
        self.poll(release, target).await
    }

    /// One status read. Lookup and inspection failures read as `Absent`.
    async fn read_status(&self, release: &Release, target: &str) -> HealthStatus {
        let container = match self.engine.container_id(release, target).await {
            Ok(Some(id)) => id,
            Ok(None) => return HealthStatus::Absent,
            Err(e) => {
                debug!(error = %e, "probe target lookup failed");
                return HealthStatus::Absent;
            }
        };
        match self.engine.health_status(&container).await {
            Ok(status) => status,
            Err(e) => {
                debug!(%container, error = %e, "health read failed");
                HealthStatus::Absent
            }
        }
    }
}
