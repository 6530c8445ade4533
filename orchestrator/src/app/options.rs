//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use crate::deploy::environment::PipelineConfig;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{ServerSettings, Settings};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Storage layout paths
    pub layout: StorageLayout,

    /// Keep the database in `database.json` instead of memory only
    pub persist_database: bool,

    /// Sync services from `services_root` before serving
    pub sync_services_on_start: bool,

    /// Absolute directory holding the service configurations
    pub services_root: PathBuf,

    /// Server configuration
    pub server: ServerSettings,

    /// Deploy task configuration
    pub pipeline: PipelineConfig,

    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl AppOptions {
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        Self {
            persist_database: settings.persist_database,
            sync_services_on_start: settings.sync_services_on_start,
            services_root: layout.resolve(&settings.services_root),
            server: settings.server.clone(),
            pipeline: PipelineConfig::from_settings(settings, &layout),
            max_shutdown_delay: Duration::from_secs(30),
            layout,
        }
    }
}
