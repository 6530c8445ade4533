//! Wire models for the fastdeploy API
//!
//! Shared between the orchestrator's HTTP layer and the deploy tasks that
//! stream step progress back to it.

pub mod models;

pub use models::*;
