//! Settings file management

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

use crate::errors::AppError;
use crate::logs::LogLevel;

/// Orchestrator settings, read from `settings.json`
#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    /// Also write rotated log files into the logs directory
    #[serde(default)]
    pub log_to_file: bool,

    /// Token signing secret
    #[serde(deserialize_with = "deserialize_secret")]
    pub secret_key: SecretString,

    #[serde(default = "default_sign_algorithm")]
    pub token_sign_algorithm: String,

    /// URL deploy tasks POST step reports to
    #[serde(default = "default_steps_url")]
    pub steps_url: String,

    /// Directory holding one directory of deploy scripts per service
    #[serde(default = "default_deploy_root")]
    pub deploy_root: PathBuf,

    /// Directory holding one `config.json` per service
    #[serde(default = "default_services_root")]
    pub services_root: PathBuf,

    /// Keep the database as a JSON file next to the settings
    #[serde(default = "default_true")]
    pub persist_database: bool,

    /// Sync services from `services_root` at startup
    #[serde(default = "default_true")]
    pub sync_services_on_start: bool,

    /// Variables copied from the orchestrator's environment into deploy tasks,
    /// which otherwise start with an empty environment
    #[serde(default = "default_passthrough_env")]
    pub passthrough_env: Vec<String>,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub delivery: DeliverySettings,
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

fn default_true() -> bool {
    true
}

fn default_sign_algorithm() -> String {
    "HS256".to_string()
}

fn default_steps_url() -> String {
    "http://localhost:8000/steps".to_string()
}

fn default_deploy_root() -> PathBuf {
    PathBuf::from("deploy")
}

fn default_services_root() -> PathBuf {
    PathBuf::from("services")
}

fn default_passthrough_env() -> Vec<String> {
    ["PATH", "HOME", "SSH_AUTH_SOCK"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

impl Settings {
    /// Check values serde cannot check
    pub fn validate(&self) -> Result<(), AppError> {
        url::Url::parse(&self.steps_url)
            .map_err(|e| AppError::ConfigError(format!("Invalid steps_url {}: {}", self.steps_url, e)))?;
        if self.delivery.attempts == 0 {
            return Err(AppError::ConfigError(
                "delivery.attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Step report delivery settings for deploy tasks
#[derive(Debug, Clone, Deserialize)]
pub struct DeliverySettings {
    /// Total attempts per report
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Fixed delay between attempts
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
}

fn default_attempts() -> u32 {
    3
}

fn default_delay_secs() -> u64 {
    3
}

impl DeliverySettings {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            delay_secs: default_delay_secs(),
        }
    }
}
