//! Repositories bound to an open unit of work

use deploy_api::StepState;

use crate::domain::model::{Deployment, Service, Step, User};
use crate::errors::AppError;
use crate::storage::table::Tables;

/// Users, looked up by their unique name
pub struct UserRepository<'a> {
    tables: &'a mut Tables,
}

impl<'a> UserRepository<'a> {
    pub(crate) fn new(tables: &'a mut Tables) -> Self {
        Self { tables }
    }

    pub fn get(&self, name: &str) -> Result<User, AppError> {
        self.tables
            .users
            .find(|u| u.name == name)
            .ok_or_else(|| AppError::NotFound("User".to_string()))
    }

    pub fn get_by_id(&self, id: i64) -> Result<User, AppError> {
        self.tables.users.get(id)
    }

    pub fn list(&self) -> Vec<User> {
        self.tables.users.list()
    }

    pub fn add(&mut self, user: User) -> Result<User, AppError> {
        if self.tables.users.find(|u| u.name == user.name).is_some() {
            return Err(AppError::Conflict(format!("user {} already exists", user.name)));
        }
        Ok(self.tables.users.insert(user))
    }

    pub fn update(&mut self, user: User) -> Result<User, AppError> {
        self.tables.users.replace(user)
    }

    pub fn delete(&mut self, id: i64) -> Result<User, AppError> {
        self.tables.users.remove(id)
    }
}

/// Services, unique by name
pub struct ServiceRepository<'a> {
    tables: &'a mut Tables,
}

impl<'a> ServiceRepository<'a> {
    pub(crate) fn new(tables: &'a mut Tables) -> Self {
        Self { tables }
    }

    pub fn get(&self, id: i64) -> Result<Service, AppError> {
        self.tables.services.get(id)
    }

    pub fn get_by_name(&self, name: &str) -> Result<Service, AppError> {
        self.tables
            .services
            .find(|s| s.name == name)
            .ok_or_else(|| AppError::NotFound("Service".to_string()))
    }

    pub fn list(&self) -> Vec<Service> {
        self.tables.services.list()
    }

    pub fn add(&mut self, service: Service) -> Result<Service, AppError> {
        if self.tables.services.find(|s| s.name == service.name).is_some() {
            return Err(AppError::Conflict(format!(
                "service {} already exists",
                service.name
            )));
        }
        Ok(self.tables.services.insert(service))
    }

    pub fn update(&mut self, service: Service) -> Result<Service, AppError> {
        let clash = self
            .tables
            .services
            .find(|s| s.name == service.name && s.id != service.id);
        if clash.is_some() {
            return Err(AppError::Conflict(format!(
                "service {} already exists",
                service.name
            )));
        }
        self.tables.services.replace(service)
    }

    /// Delete a service together with its deployments and their steps
    pub fn delete(&mut self, id: i64) -> Result<Service, AppError> {
        let service = self.tables.services.remove(id)?;
        for deployment in self.tables.deployments.remove_group(id) {
            if let Some(deployment_id) = deployment.id {
                self.tables.steps.remove_group(deployment_id);
            }
        }
        Ok(service)
    }
}

/// Deployments
pub struct DeploymentRepository<'a> {
    tables: &'a mut Tables,
}

impl<'a> DeploymentRepository<'a> {
    pub(crate) fn new(tables: &'a mut Tables) -> Self {
        Self { tables }
    }

    pub fn get(&self, id: i64) -> Result<Deployment, AppError> {
        self.tables.deployments.get(id)
    }

    pub fn list(&self) -> Vec<Deployment> {
        self.tables.deployments.list()
    }

    pub fn list_by_service(&self, service_id: i64) -> Vec<Deployment> {
        self.tables.deployments.in_group(service_id)
    }

    pub fn add(&mut self, deployment: Deployment) -> Result<Deployment, AppError> {
        self.tables.services.get(deployment.service_id)?;
        Ok(self.tables.deployments.insert(deployment))
    }

    pub fn update(&mut self, deployment: Deployment) -> Result<Deployment, AppError> {
        self.tables.deployments.replace(deployment)
    }

    /// The most recently finished deployment of a service whose steps all
    /// succeeded (a deployment without steps does not count)
    pub fn last_successful(&self, service_id: i64) -> Option<Deployment> {
        let steps = &self.tables.steps;
        self.tables
            .deployments
            .group_values(service_id)
            .filter(|d| d.finished.is_some())
            .filter(|d| {
                let Some(id) = d.id else {
                    return false;
                };
                let mut own = steps.group_values(id).peekable();
                own.peek().is_some() && own.all(|s| s.state == StepState::Success)
            })
            .max_by_key(|d| (d.finished, d.id))
            .cloned()
    }
}

/// Steps, kept in creation order
pub struct StepRepository<'a> {
    tables: &'a mut Tables,
}

impl<'a> StepRepository<'a> {
    pub(crate) fn new(tables: &'a mut Tables) -> Self {
        Self { tables }
    }

    pub fn get(&self, id: i64) -> Result<Step, AppError> {
        self.tables.steps.get(id)
    }

    pub fn list(&self) -> Vec<Step> {
        self.tables.steps.list()
    }

    /// Steps of a deployment in creation order
    pub fn list_by_deployment(&self, deployment_id: i64) -> Vec<Step> {
        self.tables.steps.in_group(deployment_id)
    }

    pub fn add(&mut self, step: Step) -> Result<Step, AppError> {
        let deployment_id = step
            .deployment_id
            .ok_or_else(|| AppError::StorageError("step without deployment".to_string()))?;
        self.tables.deployments.get(deployment_id)?;
        Ok(self.tables.steps.insert(step))
    }

    pub fn update(&mut self, step: Step) -> Result<Step, AppError> {
        self.tables.steps.replace(step)
    }

    pub fn delete(&mut self, id: i64) -> Result<Step, AppError> {
        self.tables.steps.remove(id)
    }
}
