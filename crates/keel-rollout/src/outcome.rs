//! Terminal dispositions of a deployment attempt.

use std::fmt;

use serde::Serialize;

use keel_core::Version;
use keel_health::ProbeOutcome;

/// How a deployment attempt ended. Each maps to its own exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// The new release is current.
    Committed,
    /// The new release failed; the prior release is running again.
    RolledBack,
    /// The new release failed and there was nothing to roll back to.
    NoRollback,
    /// Another deployment holds the working directory.
    LockContention,
    /// The new release failed and the prior release did not restart.
    RollbackFailed,
}

impl Disposition {
    /// Process exit code. 1 is left for errors that abort before any
    /// disposition is reached.
    pub fn exit_code(self) -> i32 {
        match self {
            Disposition::Committed => 0,
            Disposition::RolledBack => 2,
            Disposition::NoRollback => 3,
            Disposition::LockContention => 4,
            Disposition::RollbackFailed => 5,
        }
    }

    pub fn is_success(self) -> bool {
        self == Disposition::Committed
    }

    pub fn label(self) -> &'static str {
        match self {
            Disposition::Committed => "DEPLOYED",
            Disposition::RolledBack => "FAILED, ROLLED BACK",
            Disposition::NoRollback => "FAILED, NO RELEASE TO ROLL BACK TO",
            Disposition::LockContention => "REJECTED, ANOTHER DEPLOYMENT IN PROGRESS",
            Disposition::RollbackFailed => "FAILED, ROLLBACK FAILED",
        }
    }
}

/// Everything reported about a finished attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub disposition: Disposition,
    pub version: Version,
    /// Release that was current when the attempt started.
    pub previous: Option<Version>,
    pub probe_target: String,
    pub probe: Option<ProbeOutcome>,
    pub reason: Option<String>,
    pub warnings: Vec<String>,
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        self.disposition.exit_code()
    }

    /// Release running after the attempt, if any.
    pub fn running(&self) -> Option<&Version> {
        match self.disposition {
            Disposition::Committed => Some(&self.version),
            Disposition::RolledBack | Disposition::LockContention => self.previous.as_ref(),
            Disposition::NoRollback | Disposition::RollbackFailed => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prior = self
            .previous
            .as_ref()
            .map(Version::as_str)
            .unwrap_or("none");

        writeln!(f, "deploy {}: {}", self.version, self.disposition.label())?;
        writeln!(f, "  attempted: {}", self.version)?;
        writeln!(f, "  prior:     {prior}")?;
        if let Some(reason) = &self.reason {
            writeln!(f, "  reason:    {reason}")?;
        }
        match self.probe {
            Some(ProbeOutcome::Healthy { attempts }) => {
                writeln!(f, "  probe:     {} healthy after {attempts} check(s)", self.probe_target)?;
            }
            Some(ProbeOutcome::NoHealthcheck) => {
                writeln!(f, "  probe:     {} has no healthcheck", self.probe_target)?;
            }
            Some(ProbeOutcome::TimedOut { attempts, last }) => {
                writeln!(
                    f,
                    "  probe:     {} not healthy after {attempts} check(s), last status {last}",
                    self.probe_target
                )?;
            }
            None => {}
        }
        match self.running() {
            Some(v) => writeln!(f, "  running:   {v}")?,
            None if self.disposition == Disposition::LockContention => {}
            None => writeln!(f, "  running:   nothing")?,
        }
        for warning in &self.warnings {
            writeln!(f, "  warning:   {warning}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::HealthStatus;

    fn outcome(disposition: Disposition, previous: Option<&str>) -> Outcome {
        Outcome {
            disposition,
            version: Version::parse("v3").unwrap(),
            previous: previous.map(|p| Version::parse(p).unwrap()),
            probe_target: "web".to_string(),
            probe: None,
            reason: None,
            warnings: Vec::new(),
        }
    }

    #[test]
    fn exit_codes_are_distinct() {
        let all = [
            Disposition::Committed,
            Disposition::RolledBack,
            Disposition::NoRollback,
            Disposition::LockContention,
            Disposition::RollbackFailed,
        ];
        let mut codes: Vec<i32> = all.iter().map(|d| d.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
        assert!(!codes.contains(&1));
        assert_eq!(Disposition::Committed.exit_code(), 0);
    }

    #[test]
    fn summary_for_rollback() {
        let mut o = outcome(Disposition::RolledBack, Some("v2"));
        o.reason = Some("health gate timed out".to_string());
        o.probe = Some(ProbeOutcome::TimedOut {
            attempts: 30,
            last: HealthStatus::Unhealthy,
        });
        let text = o.to_string();
        assert!(text.starts_with("deploy v3: FAILED, ROLLED BACK"));
        assert!(text.contains("prior:     v2"));
        assert!(text.contains("reason:    health gate timed out"));
        assert!(text.contains("not healthy after 30 check(s), last status unhealthy"));
        assert!(text.contains("running:   v2"));
    }

    #[test]
    fn summary_for_first_deploy_failure() {
        let text = outcome(Disposition::NoRollback, None).to_string();
        assert!(text.contains("NO RELEASE TO ROLL BACK TO"));
        assert!(text.contains("prior:     none"));
        assert!(text.contains("running:   nothing"));
    }

    #[test]
    fn serializes_snake_case() {
        let json = serde_json::to_string(&outcome(Disposition::LockContention, Some("v2"))).unwrap();
        assert!(json.contains("\"disposition\":\"lock_contention\""));
        assert!(json.contains("\"previous\":\"v2\""));
    }
}
