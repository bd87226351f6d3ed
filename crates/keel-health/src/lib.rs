//! keel-health — the health gate in front of every commit.
//!
//! One service per release, the probe target, stands in for the health of
//! the whole release. The poller reads its status at a fixed interval up to
//! a retry bound:
//!
//! ```text
//! inspect_support (after create)
//!   ├── no health signal  → NoHealthcheck (trusted on start, warned)
//!   └── declared/unknown  → poll (after start)
//!         ├── healthy            → Healthy { attempts }
//!         ├── starting/absent/…  → consume one retry, sleep, repeat
//!         └── retries exhausted  → TimedOut { attempts, last }
//! ```
//!
//! Timeouts are attempt-counted, not wall-clock: total wait is
//! `(max_retries - 1) * interval` plus the time spent in engine calls.
//! Inspection failures and missing containers are indistinguishable from
//! "not healthy yet" and only cost a retry.

pub mod poller;

pub use poller::{HealthPoller, HealthSupport, PollConfig, ProbeOutcome};
