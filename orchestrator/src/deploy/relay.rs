//! Step report relay: deploy script output to the orchestrator

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use deploy_api::{Receipt, StepReport};
use reqwest::{header, Client};
use secrecy::{ExposeSecret, SecretString};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, error, info, warn};

use crate::errors::AppError;
use crate::storage::settings::DeliverySettings;

/// Destination of step reports
#[async_trait]
pub trait StepSink: Send + Sync {
    async fn send(&self, report: &StepReport) -> Result<Receipt, AppError>;
}

/// Posts step reports to the orchestrator's steps endpoint
pub struct HttpStepSink {
    client: Client,
    url: String,
    token: SecretString,
}

impl HttpStepSink {
    pub fn new(url: &str, token: SecretString) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            url: url.to_string(),
            token,
        })
    }
}

#[async_trait]
impl StepSink for HttpStepSink {
    async fn send(&self, report: &StepReport) -> Result<Receipt, AppError> {
        debug!("POST {} ({})", self.url, report.name);

        let response = self
            .client
            .post(&self.url)
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.token.expose_secret()),
            )
            .json(report)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::DeliveryRejected(format!("{}: {}", status, body)));
        }

        Ok(response.json().await?)
    }
}

/// How often and how patiently a report is retried
#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Fixed delay between attempts
    pub delay: Duration,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self::from(&DeliverySettings::default())
    }
}

impl From<&DeliverySettings> for DeliveryPolicy {
    fn from(settings: &DeliverySettings) -> Self {
        Self {
            attempts: settings.attempts.max(1),
            delay: settings.delay(),
        }
    }
}

/// Deliver one report, retrying transient failures.
///
/// Returns whether the report was accepted. A rejected report is not retried.
pub async fn deliver<S, F>(
    sink: &dyn StepSink,
    report: &StepReport,
    policy: &DeliveryPolicy,
    sleep_fn: &S,
) -> bool
where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        match sink.send(report).await {
            Ok(_) => {
                debug!("Delivered step {} on attempt {}", report.name, attempt);
                return true;
            }
            Err(e) if e.is_transient() && attempt < attempts => {
                warn!(
                    "Delivering step {} failed (attempt {}/{}): {}",
                    report.name, attempt, attempts, e
                );
                sleep_fn(policy.delay).await;
            }
            Err(e) if e.is_transient() => {
                error!(
                    "Dropping step {} after {} attempts: {}",
                    report.name, attempts, e
                );
                return false;
            }
            Err(e) => {
                error!("Dropping step {}: {}", report.name, e);
                return false;
            }
        }
    }
    false
}

/// Counts of what happened to the lines of one script run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardSummary {
    /// Reports accepted by the sink
    pub forwarded: usize,
    /// Non-empty lines that were not step reports
    pub skipped: usize,
    /// Reports that could not be delivered
    pub dropped: usize,
}

/// Parse each line of `reader` as a step report and deliver it, in order,
/// until EOF. Blank lines are ignored.
pub async fn forward_lines<R, S, F>(
    mut reader: R,
    sink: &dyn StepSink,
    policy: &DeliveryPolicy,
    sleep_fn: S,
) -> ForwardSummary
where
    R: AsyncBufRead + Unpin,
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    let mut summary = ForwardSummary::default();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                error!("Failed to read deploy script output: {}", e);
                break;
            }
        }

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let report = match serde_json::from_str::<StepReport>(line) {
            Ok(report) => report,
            Err(e) => {
                warn!("Skipping output line that is not a step report ({}): {}", e, line);
                summary.skipped += 1;
                continue;
            }
        };

        if deliver(sink, &report, policy, &sleep_fn).await {
            summary.forwarded += 1;
        } else {
            summary.dropped += 1;
        }
    }

    info!(
        "Script output done: {} forwarded, {} skipped, {} dropped",
        summary.forwarded, summary.skipped, summary.dropped
    );
    summary
}
