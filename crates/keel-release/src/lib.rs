//! keel-release — on-disk release state for one working directory.
//!
//! The working directory is the whole database: a catalog of release
//! directories, two pointers into it, and a lock file.
//!
//! # Architecture
//!
//! ```text
//! <workdir>/
//!   ├── .deploy.lock          DeployLock (exclusive, non-blocking)
//!   ├── releases/<version>/   ReleaseStore catalog
//!   │   ├── docker-compose.yml
//!   │   └── RELEASE_DATE      written on commit only
//!   ├── current  -> releases/<version>
//!   └── previous -> releases/<version>
//! ```
//!
//! Only a process holding the `DeployLock` mutates the catalog or the
//! pointers, so `ReleaseStore` itself does no locking. Pointer updates are
//! a symlink created under a temporary name and renamed into place, so a
//! reader sees either the old or the new target, never a missing pointer.

pub mod error;
pub mod layout;
pub mod lock;
pub mod store;

pub use error::{LockError, StoreError, StoreResult};
pub use lock::DeployLock;
pub use store::{ReleaseInfo, ReleaseStore};
