//! Where service configurations come from

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::domain::model::Service;
use crate::errors::AppError;
use crate::filesys::dir::Dir;

/// Name of the configuration file inside a service directory
pub const CONFIG_FILE: &str = "config.json";

/// A source of truth for the set of deployable services
#[async_trait]
pub trait ServiceSource: Send + Sync {
    /// Names of all configured services
    async fn list(&self) -> Result<Vec<String>, AppError>;

    /// Configuration data of the service `name`
    async fn get_config_by_name(&self, name: &str) -> Result<serde_json::Value, AppError>;

    /// All configured services, unsaved
    async fn services(&self) -> Result<Vec<Service>, AppError> {
        let mut services = Vec::new();
        for name in self.list().await? {
            let data = self.get_config_by_name(&name).await?;
            services.push(Service::new(name, data));
        }
        Ok(services)
    }
}

/// Reads `<root>/<service>/config.json`
pub struct DirServiceSource {
    root: Dir,
}

impl DirServiceSource {
    pub fn new(root: Dir) -> Self {
        Self { root }
    }
}

#[async_trait]
impl ServiceSource for DirServiceSource {
    async fn list(&self) -> Result<Vec<String>, AppError> {
        if !self.root.exists().await {
            warn!("Services directory {} does not exist", self.root.path().display());
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for name in self.root.list_dir_names().await? {
            if self.root.subdir(&name).file(CONFIG_FILE).exists().await {
                names.push(name);
            } else {
                debug!("Skipping {}: no {}", name, CONFIG_FILE);
            }
        }
        Ok(names)
    }

    async fn get_config_by_name(&self, name: &str) -> Result<serde_json::Value, AppError> {
        let file = self.root.subdir(name).file(CONFIG_FILE);
        if !file.exists().await {
            return Err(AppError::NotFound(format!("Service config {}", name)));
        }
        file.read_json().await
    }
}
