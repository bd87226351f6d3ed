//! keel-rollout — the deployment state machine.
//!
//! One `Deployment` is one attempt to make a version current in a working
//! directory. It is strictly sequential:
//!
//! ```text
//! Init ─lock─▶ Locked ─stop old─▶ OldStopped ─create─▶ NewCreated
//!   │                                                     │ start
//!   ▼                                                     ▼
//! LockFailed                       Probing ◀──────── NewStarted
//!                                     │
//!            ┌────────────────────────┼──────────────────────┐
//!            ▼ healthy                ▼ timeout, old exists  ▼ timeout, first deploy
//!        Committed                RolledBack             NoRollback
//!                                     │ old restart fails
//!                                     ▼
//!                               RollbackFailed
//! ```
//!
//! # Components
//!
//! - **`controller`** — `Deployment`, the state machine itself
//! - **`outcome`** — terminal `Disposition`, exit codes, and the summary

pub mod controller;
pub mod outcome;

pub use controller::{DeployError, DeploySettings, DeployState, Deployment};
pub use outcome::{Disposition, Outcome};
