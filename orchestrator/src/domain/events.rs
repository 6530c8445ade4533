//! Domain events

use serde::Serialize;

use crate::domain::model::{Deployment, Service, Step};

/// Kind of a domain event, used to register handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ServiceCreated,
    ServiceUpdated,
    ServiceDeleted,
    DeploymentStarted,
    DeploymentFinished,
    StepChanged,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::ServiceCreated,
        EventKind::ServiceUpdated,
        EventKind::ServiceDeleted,
        EventKind::DeploymentStarted,
        EventKind::DeploymentFinished,
        EventKind::StepChanged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ServiceCreated => "service_created",
            EventKind::ServiceUpdated => "service_updated",
            EventKind::ServiceDeleted => "service_deleted",
            EventKind::DeploymentStarted => "deployment_started",
            EventKind::DeploymentFinished => "deployment_finished",
            EventKind::StepChanged => "step_changed",
        }
    }
}

/// Something that happened to a persisted entity
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    ServiceCreated { service: Service },
    ServiceUpdated { service: Service },
    ServiceDeleted { id: i64, name: String },
    DeploymentStarted { deployment: Deployment },
    DeploymentFinished { deployment: Deployment },
    StepChanged { step: Step },
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::ServiceCreated { .. } => EventKind::ServiceCreated,
            DomainEvent::ServiceUpdated { .. } => EventKind::ServiceUpdated,
            DomainEvent::ServiceDeleted { .. } => EventKind::ServiceDeleted,
            DomainEvent::DeploymentStarted { .. } => EventKind::DeploymentStarted,
            DomainEvent::DeploymentFinished { .. } => EventKind::DeploymentFinished,
            DomainEvent::StepChanged { .. } => EventKind::StepChanged,
        }
    }
}
