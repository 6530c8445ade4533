//! Environment handed to a deploy task

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::authn::tokens::{Principal, TokenService};
use crate::domain::model::{Deployment, Service};
use crate::errors::AppError;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{DeliverySettings, Settings};

pub const ACCESS_TOKEN: &str = "ACCESS_TOKEN";
pub const STEPS_URL: &str = "STEPS_URL";
pub const DEPLOY_SCRIPT: &str = "DEPLOY_SCRIPT";
pub const DELIVERY_ATTEMPTS: &str = "FASTDEPLOY_DELIVERY_ATTEMPTS";
pub const DELIVERY_DELAY_SECS: &str = "FASTDEPLOY_DELIVERY_DELAY_SECS";

/// The part of the settings the pipeline needs
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub steps_url: String,
    /// Absolute directory the per-service deploy scripts live under
    pub deploy_root: PathBuf,
    pub passthrough_env: Vec<String>,
    pub delivery: DeliverySettings,
}

impl PipelineConfig {
    pub fn from_settings(settings: &Settings, layout: &StorageLayout) -> Self {
        Self {
            steps_url: settings.steps_url.clone(),
            deploy_root: layout.resolve(&settings.deploy_root),
            passthrough_env: settings.passthrough_env.clone(),
            delivery: settings.delivery.clone(),
        }
    }
}

/// Environment for the deploy task of `deployment`, with pass-through
/// variables taken from this process' environment
pub fn deploy_environment(
    tokens: &TokenService,
    config: &PipelineConfig,
    service: &Service,
    deployment: &Deployment,
) -> Result<BTreeMap<String, String>, AppError> {
    build_environment(tokens, config, service, deployment, |name| {
        std::env::var(name).ok()
    })
}

/// Like [`deploy_environment`], reading pass-through variables via `lookup`.
///
/// Later entries win: context variables, then pass-through variables, then
/// the pipeline's own variables, which cannot be overridden.
pub fn build_environment<L>(
    tokens: &TokenService,
    config: &PipelineConfig,
    service: &Service,
    deployment: &Deployment,
    lookup: L,
) -> Result<BTreeMap<String, String>, AppError>
where
    L: Fn(&str) -> Option<String>,
{
    let deployment_id = deployment
        .id
        .ok_or_else(|| AppError::NotFound("Deployment".to_string()))?;
    let token = tokens.issue_default(Principal::deployment(deployment_id))?;

    let mut env: BTreeMap<String, String> = deployment
        .context
        .env
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    for name in &config.passthrough_env {
        if let Some(value) = lookup(name) {
            env.insert(name.clone(), value);
        }
    }

    let script = config.deploy_root.join(service.deploy_script());
    env.insert(ACCESS_TOKEN.to_string(), token);
    env.insert(STEPS_URL.to_string(), config.steps_url.clone());
    env.insert(DEPLOY_SCRIPT.to_string(), script.display().to_string());
    env.insert(
        DELIVERY_ATTEMPTS.to_string(),
        config.delivery.attempts.to_string(),
    );
    env.insert(
        DELIVERY_DELAY_SECS.to_string(),
        config.delivery.delay_secs.to_string(),
    );

    Ok(env)
}

/// Redacted copy of `env` for logging
pub fn redacted(env: &BTreeMap<String, String>) -> BTreeMap<&str, &str> {
    env.iter()
        .map(|(k, v)| {
            let shown = if k == ACCESS_TOKEN { "***" } else { v.as_str() };
            (k.as_str(), shown)
        })
        .collect()
}
