//! Server state

use std::sync::Arc;

use crate::bus::BroadcastHandler;
use crate::services::Orchestrator;

/// Server state shared across handlers
pub struct ServerState {
    pub orchestrator: Orchestrator,

    /// Live feed behind `GET /events`
    pub events: Arc<BroadcastHandler>,
}

impl ServerState {
    pub fn new(orchestrator: Orchestrator, events: Arc<BroadcastHandler>) -> Self {
        Self {
            orchestrator,
            events,
        }
    }
}
