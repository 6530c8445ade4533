//! Deployment steps: expected pipeline and reconciliation of progress reports

use chrono::{DateTime, Utc};
use deploy_api::{DeploymentContext, StepReport, StepState};
use tracing::debug;

use crate::domain::events::DomainEvent;
use crate::domain::model::{Deployment, Service, Step, PLACEHOLDER_STEP};
use crate::errors::AppError;
use crate::storage::uow::UnitOfWork;

/// Steps that probably have to be executed for the next deployment of
/// `service`, all pending and unsaved.
///
/// Taken from the last successful deployment if there is one, else from the
/// service configuration, else a single placeholder. Only used for display;
/// reconciliation does not depend on it.
pub fn get_steps_to_do(uow: &mut UnitOfWork, service: &Service) -> Vec<Step> {
    if let Some(service_id) = service.id {
        if let Some(last) = uow.deployments().last_successful(service_id) {
            let past: Vec<Step> = last
                .id
                .map(|id| uow.steps().list_by_deployment(id))
                .unwrap_or_default()
                .into_iter()
                .map(|step| Step::pending(step.name))
                .collect();
            if !past.is_empty() {
                return past;
            }
        }
    }

    let mut steps: Vec<Step> = service
        .step_templates()
        .into_iter()
        .map(Step::pending)
        .collect();
    if steps.is_empty() {
        steps.push(Step::pending(PLACEHOLDER_STEP));
    }
    steps
}

/// Create a started deployment of `service` and its expected steps.
///
/// The first expected step is marked running so the first finished report
/// advances the pipeline.
pub fn start_deployment(
    uow: &mut UnitOfWork,
    service: &Service,
    origin: &str,
    user: &str,
    context: DeploymentContext,
    now: DateTime<Utc>,
) -> Result<(Deployment, Vec<DomainEvent>), AppError> {
    let service_id = service
        .id
        .ok_or_else(|| AppError::NotFound("Service".to_string()))?;

    let expected = get_steps_to_do(uow, service);

    let mut deployment = Deployment::new(service_id, origin, user);
    deployment.started = Some(now);
    deployment.context = context;
    let deployment = uow.deployments().add(deployment)?;

    let mut events = vec![DomainEvent::DeploymentStarted {
        deployment: deployment.clone(),
    }];
    for (position, mut step) in expected.into_iter().enumerate() {
        step.deployment_id = deployment.id;
        if position == 0 {
            step.state = StepState::Running;
        }
        let step = uow.steps().add(step)?;
        events.push(DomainEvent::StepChanged { step });
    }

    Ok((deployment, events))
}

/// Reconcile one progress report with the persisted steps of `deployment`.
///
/// A report closing a running step takes priority over one matching a pending
/// step, so a step reported twice updates the same row. When a running step
/// closes without failure, the earliest pending step becomes running. Reports
/// for unknown steps create a new step. Returns the created or updated step.
pub fn process_step(
    uow: &mut UnitOfWork,
    deployment: &Deployment,
    report: StepReport,
    now: DateTime<Utc>,
) -> Result<(Step, Vec<DomainEvent>), AppError> {
    deployment.ensure_in_flight()?;
    let deployment_id = deployment
        .id
        .ok_or_else(|| AppError::NotFound("Deployment".to_string()))?;

    let steps = uow.steps().list_by_deployment(deployment_id);
    let mut events = Vec::new();

    let running_match = steps
        .iter()
        .find(|s| s.state == StepState::Running && s.name == report.name)
        .cloned();

    let known_step = match running_match {
        Some(running) => {
            if report.state != StepState::Failure {
                if let Some(mut next) = steps.iter().find(|s| s.state == StepState::Pending).cloned() {
                    debug!("Promoting step {} of deployment {}", next.name, deployment_id);
                    next.state = StepState::Running;
                    let next = uow.steps().update(next)?;
                    events.push(DomainEvent::StepChanged { step: next });
                }
            }
            Some(running)
        }
        None => steps
            .iter()
            .find(|s| s.state == StepState::Pending && s.name == report.name)
            .cloned(),
    };

    let step = match known_step {
        Some(mut step) => {
            step.started = report.started;
            step.finished = Some(now);
            step.state = report.state;
            step.message = report.message;
            uow.steps().update(step)?
        }
        None => {
            debug!("Unknown step {} for deployment {}", report.name, deployment_id);
            let step = Step {
                id: None,
                deployment_id: Some(deployment_id),
                name: report.name,
                started: report.started,
                finished: Some(now),
                state: report.state,
                message: report.message,
            };
            uow.steps().add(step)?
        }
    };

    events.push(DomainEvent::StepChanged { step: step.clone() });
    Ok((step, events))
}
