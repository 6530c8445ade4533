//! Main application run loop

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app::options::AppOptions;
use crate::app::state::AppState;
use crate::deploy::launcher::Launcher;
use crate::errors::AppError;
use crate::filesys::dir::Dir;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::sources::DirServiceSource;

/// Run the orchestrator until `shutdown_signal` resolves
pub async fn run(
    options: AppOptions,
    secret_key: SecretString,
    sign_algorithm: &str,
    launcher: Arc<dyn Launcher>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), AppError> {
    info!("Initializing fastdeploy...");

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager =
        ShutdownManager::new(shutdown_tx.clone(), options.max_shutdown_delay);

    let result = init(
        &options,
        secret_key,
        sign_algorithm,
        launcher,
        &shutdown_tx,
        &mut shutdown_manager,
    )
    .await;
    if let Err(e) = result {
        error!("Failed to start fastdeploy: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    secret_key: SecretString,
    sign_algorithm: &str,
    launcher: Arc<dyn Launcher>,
    shutdown_tx: &broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), AppError> {
    options.layout.setup().await?;
    let app_state = AppState::init(options, secret_key, sign_algorithm, launcher).await?;

    if options.sync_services_on_start {
        sync_services(options, &app_state).await;
    }

    init_server(options, app_state, shutdown_manager, shutdown_tx.subscribe()).await
}

/// Failing to sync is not fatal: the persisted services stay as they are
async fn sync_services(options: &AppOptions, app_state: &AppState) {
    let source = DirServiceSource::new(Dir::new(&options.services_root));
    match app_state
        .orchestrator
        .sync_services_from_source(&source)
        .await
    {
        Ok(sync) => info!(
            "Services synced from {}: {} added or updated, {} deleted",
            options.services_root.display(),
            sync.updated.len(),
            sync.deleted.len()
        ),
        Err(e) => warn!(
            "Failed to sync services from {}: {}",
            options.services_root.display(),
            e
        ),
    }
}

async fn init_server(
    options: &AppOptions,
    app_state: AppState,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), AppError> {
    info!("Initializing HTTP server...");

    let server_state = ServerState::new(app_state.orchestrator, app_state.events);
    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(server_handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    max_shutdown_delay: Duration,
    server_handle: Option<JoinHandle<Result<(), AppError>>>,
}

impl ShutdownManager {
    fn new(shutdown_tx: broadcast::Sender<()>, max_shutdown_delay: Duration) -> Self {
        Self {
            shutdown_tx,
            max_shutdown_delay,
            server_handle: None,
        }
    }

    fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), AppError>>,
    ) -> Result<(), AppError> {
        if self.server_handle.is_some() {
            return Err(AppError::ServerError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), AppError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(self.max_shutdown_delay, self.shutdown_impl()).await {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), AppError> {
        info!("Shutting down fastdeploy...");

        if let Some(handle) = self.server_handle.take() {
            handle
                .await
                .map_err(|e| AppError::ServerError(e.to_string()))??;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
