//! Deployment execution pipeline
//!
//! The orchestrator launches a detached deploy task per deployment. The task
//! runs the service's deploy script, reads its stdout line by line and posts
//! every parsed step report back to the orchestrator, authenticated with the
//! deployment token it was started with.

pub mod environment;
pub mod launcher;
pub mod relay;
pub mod task;
