//! Service catalog: listing, deleting and syncing services

use tracing::info;

use crate::domain::events::DomainEvent;
use crate::domain::model::{Service, Step};
use crate::domain::steps::get_steps_to_do;
use crate::domain::sync::{sync_services, ServiceSync};
use crate::errors::AppError;
use crate::services::Orchestrator;
use crate::sources::ServiceSource;

impl Orchestrator {
    pub async fn list_services(&self, user_token: &str) -> Result<Vec<Service>, AppError> {
        self.tokens.resolve_user(user_token, &self.store).await?;

        let mut uow = self.store.begin().await;
        let services = uow.services().list();
        uow.rollback();
        Ok(services)
    }

    /// Steps the next deployment of a service will probably run
    pub async fn steps_to_do(&self, user_token: &str, service_id: i64) -> Result<Vec<Step>, AppError> {
        self.tokens.resolve_user(user_token, &self.store).await?;

        let mut uow = self.store.begin().await;
        let service = uow.services().get(service_id);
        let steps = match service {
            Ok(service) => Ok(get_steps_to_do(&mut uow, &service)),
            Err(e) => Err(e),
        };
        uow.rollback();
        steps
    }

    /// Delete a service with its deployments and their steps
    pub async fn delete_service(&self, user_token: &str, service_id: i64) -> Result<Service, AppError> {
        let user = self.tokens.resolve_user(user_token, &self.store).await?;

        let mut uow = self.store.begin().await;
        let service = uow.services().get(service_id)?;
        let (service, events) = service.delete();
        uow.services().delete(service_id)?;
        uow.record(events);
        self.bus.commit(uow).await?;

        info!("User {} deleted service {}", user.name, service.name);
        Ok(service)
    }

    /// Make the persisted services match `source`, in one transaction
    pub async fn sync_services_from_source(
        &self,
        source: &dyn ServiceSource,
    ) -> Result<ServiceSync, AppError> {
        let configured = source.services().await?;

        let mut uow = self.store.begin().await;
        let persisted = uow.services().list();
        let sync = sync_services(&configured, &persisted);

        let mut events = Vec::new();
        for service in &sync.updated {
            if service.id.is_some() {
                let service = uow.services().update(service.clone())?;
                events.push(DomainEvent::ServiceUpdated { service });
            } else {
                let service = uow.services().add(service.clone())?;
                events.push(DomainEvent::ServiceCreated { service });
            }
        }
        for service in &sync.deleted {
            let (service, deleted) = service.clone().delete();
            if let Some(id) = service.id {
                uow.services().delete(id)?;
            }
            events.extend(deleted);
        }

        uow.record(events);
        self.bus.commit(uow).await?;

        info!(
            "Synced services: {} added or updated, {} deleted",
            sync.updated.len(),
            sync.deleted.len()
        );
        Ok(sync)
    }
}
