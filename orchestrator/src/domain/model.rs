//! Domain entities
//!
//! Entities are plain values. Repositories take and return fully materialized
//! copies, so nothing changes in storage unless it goes back through a
//! repository of an open unit of work.

use chrono::{DateTime, Utc};
use deploy_api::{DeploymentContext, StepState};
use serde::{Deserialize, Serialize};

use crate::domain::events::DomainEvent;
use crate::errors::AppError;

/// Name of the step used when nothing better is known
pub const PLACEHOLDER_STEP: &str = "Unknown step";

/// Deploy script used when a service does not configure one
pub const DEFAULT_DEPLOY_SCRIPT: &str = "deploy.sh";

/// A human operator
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Option<i64>,
    pub name: String,
    /// Password hash, never the plain password
    pub password: String,
}

impl User {
    pub fn new(name: impl Into<String>, password_hash: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            password: password_hash.into(),
        }
    }
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A deployable service.
///
/// `data` is the service configuration as read from its config file. The
/// orchestrator only interprets `steps` (list of `{name}`) and
/// `deploy_script`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Service {
    pub fn new(name: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: None,
            name: name.into(),
            data,
        }
    }

    /// Step names declared in the service configuration, in order
    pub fn step_templates(&self) -> Vec<String> {
        self.data
            .get("steps")
            .and_then(|steps| steps.as_array())
            .map(|steps| {
                steps
                    .iter()
                    .filter_map(|step| step.get("name").and_then(|n| n.as_str()))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Deploy script path relative to the deploy root: `<service>/<script>`.
    ///
    /// Slashes are stripped from the configured script name so it cannot
    /// escape the service directory.
    pub fn deploy_script(&self) -> String {
        let script = self
            .data
            .get("deploy_script")
            .and_then(|s| s.as_str())
            .unwrap_or(DEFAULT_DEPLOY_SCRIPT)
            .replace('/', "");
        format!("{}/{}", self.name, script)
    }

    /// Mark the service deleted
    pub fn delete(self) -> (Self, Vec<DomainEvent>) {
        let events = match self.id {
            Some(id) => vec![DomainEvent::ServiceDeleted {
                id,
                name: self.name.clone(),
            }],
            None => Vec::new(),
        };
        (self, events)
    }
}

/// A single deployment of a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: Option<i64>,
    pub service_id: i64,
    /// Who or what triggered the deployment (GitHub, frontend, ...)
    pub origin: String,
    pub user: String,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    #[serde(default)]
    pub context: DeploymentContext,
}

impl Deployment {
    pub fn new(service_id: i64, origin: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            id: None,
            service_id,
            origin: origin.into(),
            user: user.into(),
            started: None,
            finished: None,
            context: DeploymentContext::default(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    /// Fail unless the deployment is in flight (started and not finished)
    pub fn ensure_in_flight(&self) -> Result<(), AppError> {
        let id = self.id.unwrap_or_default();
        if self.started.is_none() {
            return Err(AppError::DeploymentNotStarted(id));
        }
        if self.finished.is_some() {
            return Err(AppError::DeploymentAlreadyFinished(id));
        }
        Ok(())
    }

    /// Set `finished`; never earlier than `started`
    pub fn finish(mut self, now: DateTime<Utc>) -> Result<(Self, Vec<DomainEvent>), AppError> {
        self.ensure_in_flight()?;
        let finished = match self.started {
            Some(started) if started > now => started,
            _ => now,
        };
        self.finished = Some(finished);
        let events = vec![DomainEvent::DeploymentFinished {
            deployment: self.clone(),
        }];
        Ok((self, events))
    }
}

/// A step of a deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub id: Option<i64>,
    pub deployment_id: Option<i64>,
    pub name: String,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    #[serde(default)]
    pub state: StepState,
    #[serde(default)]
    pub message: String,
}

impl Step {
    /// A not yet persisted pending step
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            id: None,
            deployment_id: None,
            name: name.into(),
            started: None,
            finished: None,
            state: StepState::Pending,
            message: String::new(),
        }
    }
}
