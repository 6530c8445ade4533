//! The deploy task: run a deploy script and relay its step reports

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use secrecy::SecretString;
use tokio::io::BufReader;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::deploy::environment::{
    ACCESS_TOKEN, DELIVERY_ATTEMPTS, DELIVERY_DELAY_SECS, DEPLOY_SCRIPT, STEPS_URL,
};
use crate::deploy::relay::{forward_lines, DeliveryPolicy, ForwardSummary, HttpStepSink};
use crate::errors::AppError;

/// Everything a deploy task needs, as handed over in its environment
pub struct DeployTask {
    pub deploy_script: PathBuf,
    pub steps_url: String,
    access_token: SecretString,
    pub policy: DeliveryPolicy,
}

impl std::fmt::Debug for DeployTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployTask")
            .field("deploy_script", &self.deploy_script)
            .field("steps_url", &self.steps_url)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl DeployTask {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<L>(lookup: L) -> Result<Self, AppError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| AppError::ConfigError(format!("{} is not set", name)))
        };

        let mut policy = DeliveryPolicy::default();
        if let Some(attempts) = lookup(DELIVERY_ATTEMPTS).and_then(|v| v.parse::<u32>().ok()) {
            policy.attempts = attempts.max(1);
        }
        if let Some(secs) = lookup(DELIVERY_DELAY_SECS).and_then(|v| v.parse::<u64>().ok()) {
            policy.delay = Duration::from_secs(secs);
        }

        Ok(Self {
            deploy_script: PathBuf::from(required(DEPLOY_SCRIPT)?),
            steps_url: required(STEPS_URL)?,
            access_token: SecretString::from(required(ACCESS_TOKEN)?),
            policy,
        })
    }

    /// Run the script to completion, forwarding its stdout
    pub async fn run(self) -> Result<ForwardSummary, AppError> {
        let sink = HttpStepSink::new(&self.steps_url, self.access_token)?;

        info!("Running deploy script {}", self.deploy_script.display());
        let mut child = Command::new(&self.deploy_script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| {
                AppError::LaunchError(format!(
                    "Failed to start {}: {}",
                    self.deploy_script.display(),
                    e
                ))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Internal("deploy script stdout not captured".to_string()))?;

        let summary = forward_lines(
            BufReader::new(stdout),
            &sink,
            &self.policy,
            tokio::time::sleep,
        )
        .await;

        match child.wait().await {
            Ok(status) if status.success() => info!("Deploy script finished"),
            Ok(status) => warn!("Deploy script exited with {}", status),
            Err(e) => error!("Failed to wait for deploy script: {}", e),
        }
        if summary.dropped > 0 {
            warn!("{} step report(s) could not be delivered", summary.dropped);
        }

        Ok(summary)
    }
}
