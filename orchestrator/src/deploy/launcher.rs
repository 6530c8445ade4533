//! Start deploy tasks as detached processes

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::deploy::environment::redacted;
use crate::errors::AppError;

/// Flag that makes the binary run as a deploy task
pub const DEPLOY_TASK_FLAG: &str = "--deploy-task";

/// Starts the deploy task of a deployment without waiting for it
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, deployment_id: i64, env: BTreeMap<String, String>)
        -> Result<(), AppError>;
}

/// Runs the deploy task in a child process with exactly `env` as environment
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Re-execute the running binary as a deploy task
    pub fn current_exe() -> Result<Self, AppError> {
        let program = std::env::current_exe()?;
        Ok(Self::new(program, vec![DEPLOY_TASK_FLAG.to_string()]))
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(
        &self,
        deployment_id: i64,
        env: BTreeMap<String, String>,
    ) -> Result<(), AppError> {
        debug!("Deploy task environment: {:?}", redacted(&env));

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env_clear()
            .envs(&env)
            .stdin(Stdio::null());
        // own process group, so signals to the server do not reach the task
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| {
            AppError::LaunchError(format!(
                "Failed to start {}: {}",
                self.program.display(),
                e
            ))
        })?;
        info!(
            "Started deploy task for deployment {} (pid {:?})",
            deployment_id,
            child.id()
        );

        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => {
                    info!("Deploy task for deployment {} exited", deployment_id)
                }
                Ok(status) => warn!(
                    "Deploy task for deployment {} exited with {}",
                    deployment_id, status
                ),
                Err(e) => error!(
                    "Failed to wait for deploy task of deployment {}: {}",
                    deployment_id, e
                ),
            }
        });

        Ok(())
    }
}
