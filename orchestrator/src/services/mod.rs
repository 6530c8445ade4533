//! Boundary operations
//!
//! Each operation resolves the caller's token, runs its domain logic inside
//! one unit of work, commits through the event bus and only then performs
//! side effects such as launching a deploy task.

pub mod auth;
pub mod catalog;
pub mod deployments;

use std::sync::Arc;

use crate::authn::passwords::PasswordHasher;
use crate::authn::tokens::TokenService;
use crate::bus::EventBus;
use crate::deploy::environment::PipelineConfig;
use crate::deploy::launcher::Launcher;
use crate::storage::uow::Store;

pub use deployments::DeploymentDetails;

/// Origin recorded when a service token carries none
pub const DEFAULT_ORIGIN: &str = "api";

/// The collaborators the boundary operations work with
#[derive(Clone)]
pub struct Orchestrator {
    pub store: Store,
    pub bus: Arc<EventBus>,
    pub tokens: Arc<TokenService>,
    pub hasher: Arc<dyn PasswordHasher>,
    pub launcher: Arc<dyn Launcher>,
    pub pipeline: Arc<PipelineConfig>,
}

impl Orchestrator {
    pub fn new(
        store: Store,
        bus: Arc<EventBus>,
        tokens: Arc<TokenService>,
        hasher: Arc<dyn PasswordHasher>,
        launcher: Arc<dyn Launcher>,
        pipeline: PipelineConfig,
    ) -> Self {
        Self {
            store,
            bus,
            tokens,
            hasher,
            launcher,
            pipeline: Arc::new(pipeline),
        }
    }
}
