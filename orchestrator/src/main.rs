//! fastdeploy - Entry Point
//!
//! Deployment orchestrator: tracks services, launches deploy scripts and
//! reconciles the step reports they send back.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use colored::Colorize;
use secrecy::ExposeSecret;

use fastdeploy::app::options::AppOptions;
use fastdeploy::app::run::run;
use fastdeploy::app::state::AppState;
use fastdeploy::deploy::launcher::{ProcessLauncher, DEPLOY_TASK_FLAG};
use fastdeploy::deploy::task::DeployTask;
use fastdeploy::errors::AppError;
use fastdeploy::logs::{init_logging, LogLevel, LogOptions};
use fastdeploy::storage::layout::StorageLayout;
use fastdeploy::storage::settings::Settings;
use fastdeploy::utils::{generate_secret, version_info};

use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    // Deploy tasks are started by the server with everything in the environment
    if cli_args.contains_key(DEPLOY_TASK_FLAG.trim_start_matches('-')) {
        std::process::exit(run_deploy_task().await);
    }

    let layout = StorageLayout::from_env();

    if cli_args.contains_key("init") {
        if let Err(e) = init_settings(&layout, cli_args.contains_key("force")).await {
            eprintln!("{} {}", "Failed to initialize settings:".red(), e);
            std::process::exit(1);
        }
        return;
    }

    // Retrieve the settings file
    let settings_file = layout.settings_file();
    let settings = match settings_file.read_json::<Settings>().await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!(
                "Unable to read settings file {}: {}",
                settings_file.path().display(),
                e
            );
            eprintln!("Run: fastdeploy --init");
            std::process::exit(1);
        }
    };
    if let Err(e) = settings.validate() {
        eprintln!("Invalid settings: {}", e);
        std::process::exit(1);
    }

    if cli_args.contains_key("create-user") {
        let (Some(username), Some(password)) = (cli_args.get("username"), cli_args.get("password"))
        else {
            eprintln!("Run: fastdeploy --create-user --username=<name> --password=<password>");
            std::process::exit(1);
        };
        if let Err(e) = create_user(&settings, layout, username, password).await {
            eprintln!("{} {}", "Failed to create user:".red(), e);
            std::process::exit(1);
        }
        return;
    }

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level,
        json_format: settings.log_json,
        log_dir: settings
            .log_to_file
            .then(|| layout.logs_dir().path().to_path_buf()),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    let launcher = match ProcessLauncher::current_exe() {
        Ok(launcher) => Arc::new(launcher),
        Err(e) => {
            error!("Unable to locate the fastdeploy binary: {}", e);
            std::process::exit(1);
        }
    };

    // Run the server
    let options = AppOptions::from_settings(&settings, layout);
    info!("Running fastdeploy {} with options: {:?}", version.version, options);
    let secret_key = settings.secret_key;
    let result = run(
        options,
        secret_key,
        &settings.token_sign_algorithm,
        launcher,
        await_shutdown_signal(),
    )
    .await;
    if let Err(e) = result {
        error!("Failed to run fastdeploy: {e}");
        std::process::exit(1);
    }
}

/// Run as a deploy task; returns the process exit code
async fn run_deploy_task() -> i32 {
    if let Err(e) = init_logging(LogOptions::default()) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let task = match DeployTask::from_env() {
        Ok(task) => task,
        Err(e) => {
            error!("Invalid deploy task environment: {}", e);
            return 2;
        }
    };

    match task.run().await {
        Ok(summary) if summary.dropped == 0 => 0,
        Ok(_) => 1,
        Err(e) => {
            error!("Deploy task failed: {}", e);
            1
        }
    }
}

async fn init_settings(layout: &StorageLayout, force: bool) -> Result<(), AppError> {
    let settings_file = layout.settings_file();
    if settings_file.exists().await && !force {
        return Err(AppError::ConfigError(format!(
            "{} already exists, pass --force to overwrite it",
            settings_file.path().display()
        )));
    }

    let settings = serde_json::json!({
        "log_level": LogLevel::Info,
        "secret_key": generate_secret(),
        "token_sign_algorithm": "HS256",
        "steps_url": "http://localhost:8000/steps",
        "deploy_root": "deploy",
        "services_root": "services",
        "persist_database": true,
        "sync_services_on_start": true,
        "server": { "host": "127.0.0.1", "port": 8000 },
    });

    layout.setup().await?;
    settings_file.write_json(&settings).await?;
    settings_file.set_permissions_600().await?;

    println!(
        "{} {}",
        "Settings written to".green(),
        settings_file.path().display()
    );
    Ok(())
}

async fn create_user(
    settings: &Settings,
    layout: StorageLayout,
    username: &str,
    password: &str,
) -> Result<(), AppError> {
    let options = AppOptions::from_settings(settings, layout);
    let secret_key = secrecy::SecretString::from(settings.secret_key.expose_secret().to_string());
    let launcher = Arc::new(ProcessLauncher::current_exe()?);
    let state = AppState::init(&options, secret_key, &settings.token_sign_algorithm, launcher).await?;

    let user = state.orchestrator.create_user(username, password).await?;
    println!("{} {}", "Created user".green(), user.name.bold());
    Ok(())
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (Ok(mut sigterm), Ok(mut sigint)) = (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) else {
            error!("Failed to install signal handlers, waiting for Ctrl+C");
            let _ = tokio::signal::ctrl_c().await;
            return;
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
