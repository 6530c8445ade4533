//! Deployment lifecycle and step ingestion

use chrono::Utc;
use deploy_api::{Receipt, StartDeploymentRequest, StepReport};
use serde::Serialize;
use tracing::{error, info};

use crate::deploy::environment::deploy_environment;
use crate::domain::model::{Deployment, Step};
use crate::domain::steps;
use crate::errors::AppError;
use crate::services::{Orchestrator, DEFAULT_ORIGIN};

/// A deployment together with its steps in creation order
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentDetails {
    #[serde(flatten)]
    pub deployment: Deployment,
    pub steps: Vec<Step>,
}

impl Orchestrator {
    /// Start a deployment of the service the token names, then launch its
    /// deploy task.
    ///
    /// The deployment is committed before the task is launched, so a launch
    /// failure leaves a started deployment that never finishes.
    pub async fn start_deployment(
        &self,
        service_token: &str,
        request: StartDeploymentRequest,
    ) -> Result<Deployment, AppError> {
        let principal = self.tokens.resolve_service(service_token, &self.store).await?;
        let service = principal.service;
        let origin = principal
            .origin
            .unwrap_or_else(|| DEFAULT_ORIGIN.to_string());
        let user = principal.user.unwrap_or_else(|| service.name.clone());

        let mut uow = self.store.begin().await;
        let (deployment, events) =
            steps::start_deployment(&mut uow, &service, &origin, &user, request.context, Utc::now())?;
        uow.record(events);
        self.bus.commit(uow).await?;

        let deployment_id = deployment
            .id
            .ok_or_else(|| AppError::Internal("committed deployment without id".to_string()))?;
        info!(
            "Started deployment {} of {} (origin {}, user {})",
            deployment_id, service.name, origin, user
        );

        let env = deploy_environment(&self.tokens, &self.pipeline, &service, &deployment)?;
        if let Err(e) = self.launcher.launch(deployment_id, env).await {
            error!("Failed to launch deployment {}: {}", deployment_id, e);
            return Err(e);
        }

        Ok(deployment)
    }

    /// Finish the deployment the token belongs to
    pub async fn finish_deployment(&self, deployment_token: &str) -> Result<Deployment, AppError> {
        let deployment = self
            .tokens
            .resolve_deployment(deployment_token, &self.store)
            .await?;
        let deployment_id = deployment.id.unwrap_or_default();

        let mut uow = self.store.begin().await;
        // reload inside the transaction, it may have changed since resolving
        let deployment = uow.deployments().get(deployment_id)?;
        let (deployment, events) = deployment.finish(Utc::now())?;
        let deployment = uow.deployments().update(deployment)?;
        uow.record(events);
        self.bus.commit(uow).await?;

        info!("Finished deployment {}", deployment_id);
        Ok(deployment)
    }

    /// Reconcile a step report sent by a deploy task
    pub async fn ingest_step(
        &self,
        deployment_token: &str,
        report: StepReport,
    ) -> Result<Receipt, AppError> {
        let deployment = self
            .tokens
            .resolve_deployment(deployment_token, &self.store)
            .await?;
        let deployment_id = deployment.id.unwrap_or_default();

        let mut uow = self.store.begin().await;
        let deployment = uow.deployments().get(deployment_id)?;
        let (step, events) = steps::process_step(&mut uow, &deployment, report, Utc::now())?;
        uow.record(events);
        self.bus.commit(uow).await?;

        info!(
            "Deployment {}: step {} is {}",
            deployment_id, step.name, step.state
        );
        Ok(Receipt { received: true })
    }

    pub async fn list_deployments(&self, user_token: &str) -> Result<Vec<Deployment>, AppError> {
        self.tokens.resolve_user(user_token, &self.store).await?;

        let mut uow = self.store.begin().await;
        let deployments = uow.deployments().list();
        uow.rollback();
        Ok(deployments)
    }

    /// A deployment of the service the token names, with its steps
    pub async fn get_deployment_details(
        &self,
        service_token: &str,
        deployment_id: i64,
    ) -> Result<DeploymentDetails, AppError> {
        let principal = self.tokens.resolve_service(service_token, &self.store).await?;

        let mut uow = self.store.begin().await;
        let deployment = uow.deployments().get(deployment_id);
        let steps = uow.steps().list_by_deployment(deployment_id);
        uow.rollback();
        let deployment = deployment?;

        if Some(deployment.service_id) != principal.service.id {
            return Err(AppError::WrongService {
                deployment: deployment_id,
                service: principal.service.name,
            });
        }

        Ok(DeploymentDetails { deployment, steps })
    }
}
