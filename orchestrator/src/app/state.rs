//! Application state management

use std::sync::Arc;

use secrecy::SecretString;
use tracing::info;

use crate::app::options::AppOptions;
use crate::authn::passwords::Argon2Hasher;
use crate::authn::tokens::TokenService;
use crate::bus::{BroadcastHandler, EventBus, LogHandler};
use crate::deploy::launcher::Launcher;
use crate::errors::AppError;
use crate::services::Orchestrator;
use crate::storage::uow::Store;

/// Capacity of the live event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Main application state
pub struct AppState {
    pub orchestrator: Orchestrator,

    /// Live feed of committed domain events
    pub events: Arc<BroadcastHandler>,
}

impl AppState {
    pub async fn init(
        options: &AppOptions,
        secret_key: SecretString,
        sign_algorithm: &str,
        launcher: Arc<dyn Launcher>,
    ) -> Result<Self, AppError> {
        let tokens = Arc::new(TokenService::new(secret_key, sign_algorithm)?);

        let store = if options.persist_database {
            Store::open(options.layout.database_file()).await?
        } else {
            info!("Using an in-memory database");
            Store::in_memory()
        };

        let events = Arc::new(BroadcastHandler::new(EVENT_CHANNEL_CAPACITY));
        let bus = EventBus::builder()
            .on_all(Arc::new(LogHandler))
            .on_all(events.clone())
            .build();

        let orchestrator = Orchestrator::new(
            store,
            Arc::new(bus),
            tokens,
            Arc::new(Argon2Hasher::default()),
            launcher,
            options.pipeline.clone(),
        );

        Ok(Self {
            orchestrator,
            events,
        })
    }
}
