//! keel-engine — the container-engine control plane seen by keel.
//!
//! keel never talks to containers directly. Everything it needs from the
//! engine goes through two traits:
//!
//! - **`ContainerEngine`**: create/start/stop/remove the containers of a
//!   release, locate a service's container, and read its health.
//! - **`DefinitionResolver`**: merge definition fragments into one fully
//!   resolved document at plan-compile time.
//!
//! # Architecture
//!
//! ```text
//! ContainerEngine / DefinitionResolver
//!   ├── ComposeEngine (docker compose CLI via tokio::process)
//!   └── testing::ScriptedEngine (feature "test-support")
//! ```
//!
//! Futures are boxed so the traits stay object-safe; the orchestrator holds
//! an `Arc<dyn ContainerEngine>`.

pub mod compose;
pub mod error;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use keel_core::{HealthStatus, Release};

pub use compose::ComposeEngine;
pub use error::{EngineError, EngineResult};

/// Boxed future returned by engine operations.
pub type EngineFuture<'a, T> = Pin<Box<dyn Future<Output = EngineResult<T>> + Send + 'a>>;

/// Control-plane operations over the containers of one release.
pub trait ContainerEngine: Send + Sync {
    /// Create (but do not start) every container of the release.
    fn create<'a>(&'a self, release: &'a Release) -> EngineFuture<'a, ()>;

    /// Start the release's containers.
    fn start<'a>(&'a self, release: &'a Release) -> EngineFuture<'a, ()>;

    /// Stop the release's containers, keeping them for a later restart.
    fn stop<'a>(&'a self, release: &'a Release) -> EngineFuture<'a, ()>;

    /// Stop and remove the release's containers.
    fn remove<'a>(&'a self, release: &'a Release) -> EngineFuture<'a, ()>;

    /// Identifier of the container running `service`, if one exists.
    fn container_id<'a>(
        &'a self,
        release: &'a Release,
        service: &'a str,
    ) -> EngineFuture<'a, Option<String>>;

    /// Whether the container's image declares a health signal at all.
    fn has_healthcheck<'a>(&'a self, container: &'a str) -> EngineFuture<'a, bool>;

    /// Current health of the container.
    fn health_status<'a>(&'a self, container: &'a str) -> EngineFuture<'a, HealthStatus>;
}

/// Generation-time merge of definition fragments.
pub trait DefinitionResolver: Send + Sync {
    /// Merge `fragments` in order, expand environment substitutions and,
    /// when `pin_digests` is set, replace image tags with content digests.
    fn resolve<'a>(&'a self, fragments: &'a [PathBuf], pin_digests: bool)
    -> EngineFuture<'a, String>;
}
